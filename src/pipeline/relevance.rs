//! Keyword relevance filter (no LLM).
//!
//! A message is relevant when its subject or body contains any allow-listed
//! keyword, compared case-insensitively as plain substrings.

use tracing::debug;

use crate::config::DEFAULT_RELEVANCE_KEYWORDS;

/// Case-insensitive substring allow-list over subject + body.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    keywords: Vec<String>,
}

impl RelevanceFilter {
    /// Build from keywords; blanks are dropped and the rest lower-cased.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Filter with the built-in keyword list.
    pub fn default_keywords() -> Self {
        Self::new(DEFAULT_RELEVANCE_KEYWORDS)
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// First keyword found in `subject` or `body`.
    pub fn first_match(&self, subject: &str, body: &str) -> Option<&str> {
        let haystack = format!("{subject} {body}").to_lowercase();
        let hit = self
            .keywords
            .iter()
            .find(|k| haystack.contains(k.as_str()))
            .map(String::as_str);
        if let Some(keyword) = hit {
            debug!(keyword, "Relevance keyword matched");
        }
        hit
    }

    pub fn is_relevant(&self, subject: &str, body: &str) -> bool {
        self.first_match(subject, body).is_some()
    }
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self::default_keywords()
    }
}
