//! Reply text generation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::classifier::Classification;

const REPLY_MAX_TOKENS: u32 = 600;
const REPLY_TEMPERATURE: f32 = 0.4;

/// Content + classification → reply body. Fails with `GenerationFailed`.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        content: &str,
        classification: &Classification,
    ) -> Result<String, PipelineError>;
}

/// [`ReplyGenerator`] backed by an [`LlmProvider`].
pub struct LlmReplyGenerator {
    llm: Arc<dyn LlmProvider>,
    business_context: Option<String>,
    signature: Option<String>,
}

impl LlmReplyGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            business_context: None,
            signature: None,
        }
    }

    pub fn with_business_context(mut self, context: impl Into<String>) -> Self {
        self.business_context = Some(context.into());
        self
    }

    /// Sign-off appended to every reply that does not already end with it.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate(
        &self,
        content: &str,
        classification: &Classification,
    ) -> Result<String, PipelineError> {
        let mut system = String::new();
        if let Some(ref context) = self.business_context {
            system.push_str(context.trim());
            system.push_str("\n\n");
        }
        system.push_str(
            "Write a reply to the email below as plain text. No markdown, no code blocks. \
             Be professional, friendly and brief (150 words max). Do not include a subject line.",
        );

        let mut user = format!(
            "Category: {}\nSummary: {}\n",
            classification.category, classification.summary
        );
        if let Some(ref hint) = classification.suggested_reply {
            user.push_str(&format!("Suggested direction: {hint}\n"));
        }
        user.push_str(&format!("\nEmail:\n{content}"));

        let request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .with_temperature(REPLY_TEMPERATURE)
            .with_max_tokens(REPLY_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| PipelineError::GenerationFailed(format!("LLM call failed: {e}")))?;

        let body = clean_reply(&response.content);
        if body.is_empty() {
            return Err(PipelineError::GenerationFailed("empty reply".into()));
        }

        debug!(chars = body.len(), "Generated reply");
        Ok(match self.signature {
            Some(ref sig) if !body.trim_end().ends_with(sig.trim()) => {
                format!("{body}\n\n{}", sig.trim())
            }
            _ => body,
        })
    }
}

/// Strip code fences the model may add despite instructions.
fn clean_reply(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};
    use crate::pipeline::classifier::Priority;

    struct MockLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-writer"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn classification() -> Classification {
        Classification {
            category: "Pricing Question".into(),
            is_business: true,
            priority: Priority::High,
            urgency: false,
            confidence: 0.9,
            summary: "Asks about pricing".into(),
            suggested_reply: None,
        }
    }

    #[test]
    fn clean_reply_drops_fences() {
        assert_eq!(clean_reply("```\nHello there\n```"), "Hello there");
        assert_eq!(clean_reply("  Plain  "), "Plain");
    }

    #[tokio::test]
    async fn appends_signature_once() {
        let generator = LlmReplyGenerator::new(Arc::new(MockLlm {
            response: "Thanks for reaching out.".into(),
        }))
        .with_signature("Best regards,\nThe Team");
        let reply = generator.generate("Subject: Hi", &classification()).await.unwrap();
        assert!(reply.starts_with("Thanks for reaching out."));
        assert!(reply.ends_with("The Team"));

        let signed = LlmReplyGenerator::new(Arc::new(MockLlm {
            response: "Thanks.\n\nBest regards,\nThe Team".into(),
        }))
        .with_signature("Best regards,\nThe Team");
        let reply = signed.generate("Subject: Hi", &classification()).await.unwrap();
        assert_eq!(reply.matches("The Team").count(), 1);
    }

    #[tokio::test]
    async fn empty_output_is_generation_failure() {
        let generator = LlmReplyGenerator::new(Arc::new(MockLlm {
            response: "```\n```".into(),
        }));
        let err = generator.generate("x", &classification()).await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailed(_)));
    }
}
