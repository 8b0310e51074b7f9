//! Poll loop state machine and cycle results.

use serde::Serialize;

use crate::mailbox::Cursor;
use crate::pipeline::SkipReason;

/// State of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// Waiting for the next tick.
    Idle,
    /// Reading the change feed.
    Fetching,
    /// Change feed had nothing past the cursor.
    NoChange,
    /// Running fetched events through the pipeline.
    ProcessingBatch,
}

impl PollState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: PollState) -> bool {
        use PollState::*;

        matches!(
            (self, target),
            (Idle, Fetching)
                | (Fetching, NoChange)
                | (Fetching, ProcessingBatch)
                | (Fetching, Idle)
                | (NoChange, Idle)
                | (ProcessingBatch, Idle)
        )
    }
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::NoChange => "no_change",
            Self::ProcessingBatch => "processing_batch",
        };
        write!(f, "{s}")
    }
}

/// What happened to one change event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    Replied {
        message_id: String,
        recipient: String,
        category: String,
    },
    Skipped {
        message_id: String,
        reason: SkipReason,
    },
    Failed {
        message_id: String,
        stage: &'static str,
        error: String,
    },
}

impl MessageOutcome {
    pub fn message_id(&self) -> &str {
        match self {
            Self::Replied { message_id, .. }
            | Self::Skipped { message_id, .. }
            | Self::Failed { message_id, .. } => message_id,
        }
    }

    /// `"replied"`, `"failed"`, or the skip reason label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replied { .. } => "replied",
            Self::Skipped { reason, .. } => reason.label(),
            Self::Failed { .. } => "failed",
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    /// Another cycle was still running; this tick was dropped.
    Overlapped,
    /// Auto-reply is off (global switch, missing or invalid config).
    Disabled { reason: String },
    /// First cycle: cursor set to the mailbox head, history ignored.
    Bootstrapped { cursor: Cursor },
    NoChange { cursor: Cursor },
    /// Mailbox rejected the cursor; re-initialized at the head.
    Reset {
        previous: Option<Cursor>,
        cursor: Cursor,
    },
    /// Change feed unavailable; cursor untouched.
    FetchFailed { error: String },
    Processed {
        cursor: Cursor,
        outcomes: Vec<MessageOutcome>,
    },
}

impl CycleReport {
    pub fn outcomes(&self) -> &[MessageOutcome] {
        match self {
            Self::Processed { outcomes, .. } => outcomes,
            _ => &[],
        }
    }

    pub fn replied(&self) -> usize {
        self.outcomes()
            .iter()
            .filter(|o| matches!(o, MessageOutcome::Replied { .. }))
            .count()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Overlapped => "overlapped",
            Self::Disabled { .. } => "disabled",
            Self::Bootstrapped { .. } => "bootstrapped",
            Self::NoChange { .. } => "no_change",
            Self::Reset { .. } => "reset",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::Processed { .. } => "processed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use PollState::*;
        assert!(Idle.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(NoChange));
        assert!(Fetching.can_transition_to(ProcessingBatch));
        assert!(NoChange.can_transition_to(Idle));
        assert!(ProcessingBatch.can_transition_to(Idle));
    }

    #[test]
    fn invalid_transitions() {
        use PollState::*;
        assert!(!Idle.can_transition_to(ProcessingBatch));
        assert!(!NoChange.can_transition_to(ProcessingBatch));
        assert!(!ProcessingBatch.can_transition_to(Fetching));
    }

    #[test]
    fn report_counts_replies() {
        let report = CycleReport::Processed {
            cursor: Cursor::new(5),
            outcomes: vec![
                MessageOutcome::Replied {
                    message_id: "a".into(),
                    recipient: "x@y.com".into(),
                    category: "Partnership".into(),
                },
                MessageOutcome::Skipped {
                    message_id: "b".into(),
                    reason: SkipReason::Duplicate,
                },
            ],
        };
        assert_eq!(report.replied(), 1);
        assert_eq!(report.outcomes()[1].label(), "duplicate");
        assert_eq!(report.kind(), "processed");
        assert!(CycleReport::Overlapped.outcomes().is_empty());
    }

    #[test]
    fn state_display() {
        assert_eq!(PollState::ProcessingBatch.to_string(), "processing_batch");
    }
}
