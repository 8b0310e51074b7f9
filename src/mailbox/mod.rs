//! Mailbox contract: change log, message fetch and reply send.
//!
//! The worker only talks to a mailbox through [`MessageStore`]. The Gmail
//! adapter lives in [`gmail`]; tests use scripted in-memory stores.

pub mod compose;
pub mod gmail;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

pub use compose::{AUTO_REPLY_HEADER, ComposedReply, reply_subject};
pub use gmail::{GmailConfig, GmailMailbox};

/// Label carried by drafts.
pub const LABEL_DRAFT: &str = "DRAFT";
/// Label carried by messages the account sent.
pub const LABEL_SENT: &str = "SENT";

static ANGLE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<([^<>]+)>").unwrap());

// ── Cursor ──────────────────────────────────────────────────────────

/// Opaque, monotonically increasing position in the mailbox change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    pub const fn new(position: u64) -> Self {
        Self(position)
    }

    pub fn position(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

// ── Change feed ─────────────────────────────────────────────────────

/// Kind of change reported by the mailbox. Only additions are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    MessageAdded,
}

/// A single entry of the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub message_id: String,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn message_added(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            kind: ChangeKind::MessageAdded,
        }
    }
}

/// Events strictly after the requested cursor, in arrival order, plus the
/// position the log has reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub events: Vec<ChangeEvent>,
    pub cursor: Cursor,
}

/// Result of asking the mailbox for changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFeed {
    Changes(ChangeSet),
    /// The cursor is unknown or too old for the mailbox to answer from.
    Invalidated,
}

// ── Message ─────────────────────────────────────────────────────────

/// A fetched mailbox message (headers and plain-text body only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    /// Raw `From` value, e.g. `Alice <alice@example.com>`.
    pub from_address: String,
    pub body_text: String,
    pub labels: Vec<String>,
    pub headers: Vec<(String, String)>,
}

impl Message {
    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether this message was produced by the auto-reply engine itself.
    pub fn is_auto_reply(&self) -> bool {
        self.header(AUTO_REPLY_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// Whether the message is a draft or a sent item.
    pub fn is_draft_or_sent(&self) -> bool {
        self.labels.iter().any(|l| l == LABEL_DRAFT || l == LABEL_SENT)
    }

    /// Bare lower-cased sender address.
    pub fn sender_address(&self) -> String {
        extract_address(&self.from_address)
    }

    /// The `Message-ID` header, used for `In-Reply-To` / `References`.
    pub fn message_id_header(&self) -> Option<&str> {
        self.header("Message-ID")
    }
}

/// Extract the bare address from a `From`-style value.
///
/// `Alice <Alice@Example.com>` → `alice@example.com`; a value without angle
/// brackets is trimmed and lower-cased as-is.
pub fn extract_address(from: &str) -> String {
    ANGLE_ADDRESS
        .captures(from)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(from)
        .trim()
        .to_lowercase()
}

/// Acknowledgement returned by a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAck {
    pub message_id: String,
}

// ── Store trait ─────────────────────────────────────────────────────

/// Mailbox operations consumed by the worker. Pure I/O, no gating logic.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Address of the account that owns the mailbox.
    async fn account_address(&self) -> Result<String, MailboxError>;

    /// Current head of the change log.
    async fn current_cursor(&self) -> Result<Cursor, MailboxError>;

    /// Message additions strictly after `cursor`.
    async fn changes_since(&self, cursor: Cursor) -> Result<ChangeFeed, MailboxError>;

    /// Fetch a single message.
    async fn get(&self, id: &str) -> Result<Message, MailboxError>;

    /// Send a reply into the given thread.
    async fn send(&self, reply: &ComposedReply, thread_id: &str) -> Result<SendAck, MailboxError>;
}
