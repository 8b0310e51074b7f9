//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Terms that mark a message as relevant for an automated reply.
pub const DEFAULT_RELEVANCE_KEYWORDS: &[&str] = &[
    "price",
    "pricing",
    "cost",
    "how much",
    "quote",
    "gmail agent",
    "website",
    "chatbot",
    "automation",
    "partnership",
    "collaboration",
    "service",
    "inquiry",
];

/// Categories enabled for auto-reply when a config is written without any.
pub const DEFAULT_ALLOWED_CATEGORIES: &[&str] =
    &["Business Inquiry", "Pricing Question", "Partnership"];

/// Worker timers, TTLs and the relevance allow-list.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fixed interval between poll ticks.
    pub poll_interval: Duration,
    /// How long a processed message id stays in the dedup cache.
    pub dedup_ttl: Duration,
    /// Minimum spacing between two replies to the same sender.
    pub sender_cooldown: Duration,
    /// Length of the per-user rate limit window.
    pub rate_window: Duration,
    /// Interval of the TTL reaper.
    pub reaper_interval: Duration,
    /// Upper bound for every external call (fetch, classify, generate, send).
    pub call_timeout: Duration,
    /// Lower-cased relevance keywords (stage 7).
    pub relevance_keywords: Vec<String>,
    /// Account whose config and rate limit apply. Resolved from the mailbox when unset.
    pub user_email: Option<String>,
    /// Initial state of the global switch.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            dedup_ttl: Duration::from_secs(3600), // 1 hour
            sender_cooldown: Duration::from_secs(3600), // 1 hour
            rate_window: Duration::from_secs(3600), // 1 hour
            reaper_interval: Duration::from_secs(3600),
            call_timeout: Duration::from_secs(30),
            relevance_keywords: DEFAULT_RELEVANCE_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            user_email: None,
            enabled: false,
        }
    }
}

impl WorkerConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let secs = |key: &str, fallback: Duration| -> Duration {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        let relevance_keywords = std::env::var("AUTO_REPLY_KEYWORDS")
            .ok()
            .map(|raw| parse_keywords(&raw))
            .filter(|k| !k.is_empty())
            .unwrap_or(defaults.relevance_keywords);

        let user_email = std::env::var("AUTO_REPLY_USER_EMAIL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let enabled = std::env::var("AUTO_REPLY_ENABLED")
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.enabled);

        Self {
            poll_interval: secs("AUTO_REPLY_POLL_INTERVAL_SECS", defaults.poll_interval),
            dedup_ttl: secs("AUTO_REPLY_DEDUP_TTL_SECS", defaults.dedup_ttl),
            sender_cooldown: secs("AUTO_REPLY_COOLDOWN_SECS", defaults.sender_cooldown),
            rate_window: secs("AUTO_REPLY_RATE_WINDOW_SECS", defaults.rate_window),
            reaper_interval: secs("AUTO_REPLY_REAPER_INTERVAL_SECS", defaults.reaper_interval),
            call_timeout: secs("AUTO_REPLY_CALL_TIMEOUT_SECS", defaults.call_timeout),
            relevance_keywords,
            user_email,
            enabled,
        }
    }
}

/// Split a comma-separated keyword list into trimmed, lower-cased terms.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Per-user auto-reply settings.
///
/// Read once per poll cycle and treated as an immutable snapshot for the
/// whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoReplyConfig {
    pub enabled: bool,
    pub allowed_categories: Vec<String>,
    pub min_confidence: f32,
    pub max_replies_per_hour: u32,
}

impl Default for AutoReplyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_categories: DEFAULT_ALLOWED_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            min_confidence: 0.7,
            max_replies_per_hour: 20,
        }
    }
}

impl AutoReplyConfig {
    /// Reject values the gate pipeline cannot act on safely.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "min_confidence".into(),
                message: format!("{} is outside [0, 1]", self.min_confidence),
            });
        }
        if self.max_replies_per_hour == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_replies_per_hour".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Case-sensitive category membership, matching the classifier's labels.
    pub fn allows_category(&self, category: &str) -> bool {
        self.allowed_categories.iter().any(|c| c == category)
    }
}
