//! Error types for the auto-reply engine.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
///
/// A per-user configuration error never escapes a poll cycle: the worker
/// treats it as "disabled" and skips the cycle.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No auto-reply configuration for {user}")]
    NotConfigured { user: String },
}

/// Persistence errors (config store, reply record store).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mailbox (message store) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Mailbox authentication failed: {0}")]
    AuthFailed(String),

    #[error("Message {id} not found")]
    NotFound { id: String },

    #[error("Invalid mailbox response: {0}")]
    InvalidResponse(String),

    #[error("Failed to compose reply: {0}")]
    Compose(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while processing a single message.
///
/// All of these are transient from the worker's point of view: the message
/// is recorded as failed and the batch moves on.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Reply generation failed: {0}")]
    GenerationFailed(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[source] MailboxError),

    #[error("Send failed: {0}")]
    Send(#[source] MailboxError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_operation() {
        let err = PipelineError::Timeout {
            operation: "classify",
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "classify timed out after 30s");
    }

    #[test]
    fn mailbox_error_converts_into_top_level() {
        let err: Error = MailboxError::NotFound { id: "m1".into() }.into();
        assert!(matches!(err, Error::Mailbox(_)));
        assert!(err.to_string().contains("m1"));
    }
}
