//! Message classification: LLM-backed structured analysis.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Max tokens for the classification call.
const CLASSIFY_MAX_TOKENS: u32 = 512;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Body characters sent to the classifier.
const BODY_PREVIEW_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" | "urgent" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// Structured analysis of a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub is_business: bool,
    pub priority: Priority,
    pub urgency: bool,
    /// Always within `[0, 1]`.
    pub confidence: f32,
    pub summary: String,
    pub suggested_reply: Option<String>,
}

/// Raw content → [`Classification`]. Fails with `ClassifierUnavailable`.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn analyze(
        &self,
        subject: &str,
        body: &str,
        from: &str,
    ) -> Result<Classification, PipelineError>;
}

/// [`Classifier`] that asks an [`LlmProvider`] for a JSON verdict.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
    business_context: Option<String>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            business_context: None,
        }
    }

    /// Extra description of the business, prepended to the system prompt.
    pub fn with_business_context(mut self, context: impl Into<String>) -> Self {
        self.business_context = Some(context.into());
        self
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn analyze(
        &self,
        subject: &str,
        body: &str,
        from: &str,
    ) -> Result<Classification, PipelineError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt(self.business_context.as_deref())),
            ChatMessage::user(build_user_prompt(subject, body, from)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await.map_err(|e| {
            PipelineError::ClassifierUnavailable(format!("LLM call failed: {e}"))
        })?;

        let classification = parse_classification(&response.content).map_err(|e| {
            warn!(
                raw_response = %response.content,
                error = %e,
                "Failed to parse classification"
            );
            PipelineError::ClassifierUnavailable(format!("parse failed: {e}"))
        })?;

        debug!(
            category = %classification.category,
            is_business = classification.is_business,
            confidence = classification.confidence,
            model = self.llm.model_name(),
            "Classified message"
        );
        Ok(classification)
    }
}

fn build_system_prompt(business_context: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(context) = business_context {
        prompt.push_str(context.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "You classify inbound emails for an automated reply system.\n\n\
         Respond with ONLY a JSON object:\n\
         {\"category\": \"...\", \"isBusiness\": true, \"priority\": \"high|medium|low\", \
         \"urgency\": false, \"summary\": \"...\", \"suggestedReply\": \"...\", \"confidence\": 0.0}\n\n\
         Categories: Business Inquiry, Pricing Question, Support Request, Partnership, Personal, Spam.\n\
         Rules:\n\
         - confidence is a number between 0 and 1\n\
         - summary is one short sentence\n\
         - do not wrap the JSON in markdown",
    );
    prompt
}

fn build_user_prompt(subject: &str, body: &str, from: &str) -> String {
    let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
    format!("Subject: {subject}\nFrom: {from}\nBody: {preview}")
}

/// Wire shape of the classifier verdict. Accepts camelCase or snake_case.
#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    #[serde(default)]
    category: String,
    #[serde(default, alias = "isBusiness")]
    is_business: bool,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    urgency: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    summary: String,
    #[serde(default, alias = "suggestedReply")]
    suggested_reply: Option<String>,
}

/// Parse the LLM output into a [`Classification`].
pub fn parse_classification(raw: &str) -> Result<Classification, String> {
    let json_str = extract_json_object(raw);
    let response: ClassificationResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    if response.category.trim().is_empty() {
        return Err("missing category".into());
    }

    let confidence = if response.confidence.is_nan() {
        0.0
    } else {
        response.confidence.clamp(0.0, 1.0)
    };

    Ok(Classification {
        category: response.category.trim().to_string(),
        is_business: response.is_business,
        priority: Priority::parse_lenient(&response.priority),
        urgency: response.urgency,
        confidence,
        summary: response.summary,
        suggested_reply: response.suggested_reply.filter(|r| !r.trim().is_empty()),
    })
}

/// Extract a JSON object from text that may be wrapped in markdown fences.
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};

    struct MockLlm {
        response: Result<String, ()>,
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-classifier"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            match &self.response {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 100,
                    output_tokens: 50,
                    finish_reason: FinishReason::Stop,
                }),
                Err(()) => Err(LlmError::RateLimited {
                    provider: "mock".into(),
                }),
            }
        }
    }

    #[test]
    fn parse_camel_case_verdict() {
        let c = parse_classification(
            r#"{"category": "Pricing Question", "isBusiness": true, "priority": "High",
                "urgency": false, "summary": "Asks for price", "suggestedReply": "Hi!", "confidence": 0.92}"#,
        )
        .unwrap();
        assert_eq!(c.category, "Pricing Question");
        assert!(c.is_business);
        assert_eq!(c.priority, Priority::High);
        assert!((c.confidence - 0.92).abs() < f32::EPSILON);
        assert_eq!(c.suggested_reply.as_deref(), Some("Hi!"));
    }

    #[test]
    fn parse_fenced_json() {
        let raw = "Sure:\n```json\n{\"category\": \"Spam\", \"is_business\": false, \"confidence\": 0.9}\n```";
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.category, "Spam");
        assert!(!c.is_business);
        assert_eq!(c.priority, Priority::Medium);
    }

    #[test]
    fn confidence_is_clamped() {
        let c = parse_classification(r#"{"category": "Partnership", "confidence": 1.7}"#).unwrap();
        assert_eq!(c.confidence, 1.0);
        let c = parse_classification(r#"{"category": "Partnership", "confidence": -2}"#).unwrap();
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn missing_category_is_error() {
        assert!(parse_classification(r#"{"isBusiness": true}"#).is_err());
        assert!(parse_classification("not json").is_err());
    }

    #[test]
    fn extract_json_object_variants() {
        assert_eq!(extract_json_object("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(extract_json_object("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json_object("Result: {\"a\":1} done"), "{\"a\":1}");
    }

    #[test]
    fn user_prompt_truncates_body() {
        let body = "x".repeat(5000);
        let prompt = build_user_prompt("Hi", &body, "a@x.com");
        assert!(prompt.len() < 2100);
        assert!(prompt.starts_with("Subject: Hi\nFrom: a@x.com"));
    }

    #[test]
    fn system_prompt_includes_business_context() {
        let prompt = build_system_prompt(Some("We build websites."));
        assert!(prompt.starts_with("We build websites."));
        assert!(prompt.contains("isBusiness"));
    }

    #[tokio::test]
    async fn llm_classifier_parses_response() {
        let classifier = LlmClassifier::new(Arc::new(MockLlm {
            response: Ok(r#"{"category": "Business Inquiry", "isBusiness": true, "confidence": 0.8}"#.into()),
        }));
        let c = classifier.analyze("Quote", "Need a site", "a@x.com").await.unwrap();
        assert_eq!(c.category, "Business Inquiry");
    }

    #[tokio::test]
    async fn llm_failure_is_classifier_unavailable() {
        let classifier = LlmClassifier::new(Arc::new(MockLlm { response: Err(()) }));
        let err = classifier.analyze("Quote", "", "a@x.com").await.unwrap_err();
        assert!(matches!(err, PipelineError::ClassifierUnavailable(_)));
    }

    #[tokio::test]
    async fn unparseable_output_fails_closed() {
        let classifier = LlmClassifier::new(Arc::new(MockLlm {
            response: Ok("I think this is business".into()),
        }));
        let err = classifier.analyze("Quote", "", "a@x.com").await.unwrap_err();
        assert!(matches!(err, PipelineError::ClassifierUnavailable(_)));
    }
}
