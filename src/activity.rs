//! Activity feed: one event per pipeline transition.
//!
//! [`ActivityLog`] keeps the newest entries in memory and fans every new
//! event out over a `broadcast` channel for live subscribers.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use crate::mailbox::Cursor;

/// Entries kept by [`ActivityLog`].
pub const ACTIVITY_LOG_CAPACITY: usize = 100;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    /// First cycle read the mailbox head; history before it is ignored.
    CursorInitialized { cursor: Cursor },
    /// Mailbox rejected the cursor; events between the two are skipped.
    CursorReset {
        previous: Option<Cursor>,
        cursor: Cursor,
    },
    /// Cycle aborted before fetching because auto-reply is off.
    CycleDisabled { reason: String },
    /// Change feed could not be read; cursor untouched.
    FetchFailed { error: String },
    /// A message left the pipeline without a reply.
    Skipped {
        message_id: String,
        reason: String,
        detail: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// A reply was sent.
    Replied {
        message_id: String,
        recipient: String,
        subject: String,
        category: String,
    },
    /// A transient failure (fetch, generate, send, timeout) on one message.
    Failed {
        message_id: String,
        stage: String,
        error: String,
    },
}

impl ActivityKind {
    /// Matches the serde tag.
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::CursorInitialized { .. } => "cursor_initialized",
            Self::CursorReset { .. } => "cursor_reset",
            Self::CycleDisabled { .. } => "cycle_disabled",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::Skipped { .. } => "skipped",
            Self::Replied { .. } => "replied",
            Self::Failed { .. } => "failed",
        }
    }

    /// Message the event refers to, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Skipped { message_id, .. }
            | Self::Replied { message_id, .. }
            | Self::Failed { message_id, .. } => Some(message_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_email: String,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

impl ActivityEvent {
    pub fn new(user_email: impl Into<String>, kind: ActivityKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            user_email: user_email.into(),
            kind,
        }
    }
}

/// Sink for activity events. Never fails the caller.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    async fn append(&self, event: ActivityEvent);
}

/// In-memory capped feed, newest first.
pub struct ActivityLog {
    entries: RwLock<VecDeque<ActivityEvent>>,
    capacity: usize,
    tx: broadcast::Sender<ActivityEvent>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::with_capacity(ACTIVITY_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
        }
    }

    /// Receive every event appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.tx.subscribe()
    }

    /// Up to `limit` most recent events, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<ActivityEvent> {
        self.entries.read().await.iter().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityRecorder for ActivityLog {
    async fn append(&self, event: ActivityEvent) {
        debug!(
            action = event.kind.action_type(),
            message_id = event.kind.message_id().unwrap_or("-"),
            "Activity"
        );
        {
            let mut entries = self.entries.write().await;
            entries.push_front(event.clone());
            entries.truncate(self.capacity);
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(id: &str) -> ActivityEvent {
        ActivityEvent::new(
            "owner@example.com",
            ActivityKind::Skipped {
                message_id: id.into(),
                reason: "duplicate".into(),
                detail: "duplicate".into(),
                sender: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn newest_first_and_capped() {
        let log = ActivityLog::with_capacity(3);
        for i in 0..5 {
            log.append(skipped(&format!("m{i}"))).await;
        }
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].kind.message_id(), Some("m4"));
        assert_eq!(recent[2].kind.message_id(), Some("m2"));
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let log = ActivityLog::new();
        let mut rx = log.subscribe();
        log.append(skipped("m1")).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind.action_type(), "skipped");
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = ActivityEvent::new(
            "owner@example.com",
            ActivityKind::CursorReset {
                previous: Some(Cursor::new(10)),
                cursor: Cursor::new(42),
            },
            Utc::now(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cursor_reset");
        assert_eq!(json["cursor"], 42);
        assert_eq!(json["previous"], 10);

        let back: ActivityEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
