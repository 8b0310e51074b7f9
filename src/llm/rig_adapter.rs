//! Bridge from rig's `CompletionModel` to our [`LlmProvider`].

use async_trait::async_trait;
use rig::completion::{CompletionError, CompletionModel};
use rig::message::{AssistantContent, Message as RigMessage};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }
}

/// A request split the way rig takes it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RigParts {
    pub preamble: Option<String>,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
}

/// System turns become the preamble; the trailing user turn is the prompt.
pub(crate) fn split_request(request: &CompletionRequest) -> Result<RigParts, LlmError> {
    let preamble = request.system_prompt();
    let mut turns: Vec<ChatMessage> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    let prompt = match turns.pop() {
        Some(last) if last.role == Role::User => last.content,
        _ => {
            return Err(LlmError::InvalidResponse {
                provider: "rig".into(),
                reason: "request must end with a user turn".into(),
            });
        }
    };

    Ok(RigParts {
        preamble,
        history: turns,
        prompt,
    })
}

fn to_rig(message: ChatMessage) -> RigMessage {
    match message.role {
        Role::Assistant => RigMessage::assistant(message.content),
        Role::User | Role::System => RigMessage::user(message.content),
    }
}

fn map_error(model: &str, e: CompletionError) -> LlmError {
    let reason = e.to_string();
    let lower = reason.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        LlmError::RateLimited {
            provider: model.to_string(),
        }
    } else if lower.contains("401") || lower.contains("unauthorized") {
        LlmError::AuthFailed {
            provider: model.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: model.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let parts = split_request(&request)?;

        let mut builder = self
            .model
            .completion_request(RigMessage::user(parts.prompt))
            .messages(parts.history.into_iter().map(to_rig).collect());
        if let Some(preamble) = parts.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_error(&self.model_name, e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            finish_reason: FinishReason::Stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_moves_system_turns_to_preamble() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You triage email."),
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("Subject: Pricing"),
        ]);
        let parts = split_request(&request).unwrap();
        assert_eq!(parts.preamble.as_deref(), Some("You triage email."));
        assert_eq!(parts.prompt, "Subject: Pricing");
        assert_eq!(
            parts.history,
            vec![ChatMessage::user("first"), ChatMessage::assistant("ok")]
        );
    }

    #[test]
    fn split_requires_trailing_user_turn() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("s"),
            ChatMessage::assistant("dangling"),
        ]);
        assert!(split_request(&request).is_err());
        assert!(split_request(&CompletionRequest::new(vec![])).is_err());
    }
}
