//! Change-log position owned by the poll loop.

use tracing::{debug, warn};

use crate::mailbox::Cursor;

/// Tracks the last processed position in the mailbox change log.
///
/// The position only ever moves forward. A regression is logged and ignored.
#[derive(Debug, Default)]
pub struct CursorTracker {
    current: Option<Cursor>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position, `None` until the first initialize/advance.
    pub fn current(&self) -> Option<Cursor> {
        self.current
    }

    /// Set the position without processing any history before it.
    ///
    /// Used on bootstrap and after the mailbox reports the cursor invalid;
    /// this is the only way the position can move backwards.
    pub fn initialize(&mut self, position: Cursor) -> Option<Cursor> {
        let previous = self.current.replace(position);
        debug!(
            previous = ?previous.map(|c| c.position()),
            position = %position,
            "Cursor initialized"
        );
        previous
    }

    /// Move forward to `new`. Returns `true` if the position changed.
    pub fn advance(&mut self, new: Cursor) -> bool {
        match self.current {
            None => {
                self.current = Some(new);
                true
            }
            Some(current) if new > current => {
                self.current = Some(new);
                true
            }
            Some(current) if new == current => false,
            Some(current) => {
                warn!(
                    current = %current,
                    requested = %new,
                    "Ignoring cursor regression"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized() {
        let tracker = CursorTracker::new();
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn advance_moves_forward() {
        let mut tracker = CursorTracker::new();
        tracker.initialize(Cursor::new(10));
        assert!(tracker.advance(Cursor::new(15)));
        assert_eq!(tracker.current(), Some(Cursor::new(15)));
    }

    #[test]
    fn advance_is_idempotent() {
        let mut tracker = CursorTracker::new();
        tracker.initialize(Cursor::new(10));
        assert!(!tracker.advance(Cursor::new(10)));
        assert_eq!(tracker.current(), Some(Cursor::new(10)));
    }

    #[test]
    fn advance_rejects_regression() {
        let mut tracker = CursorTracker::new();
        tracker.initialize(Cursor::new(10));
        tracker.advance(Cursor::new(20));
        assert!(!tracker.advance(Cursor::new(15)));
        assert_eq!(tracker.current(), Some(Cursor::new(20)));
    }

    #[test]
    fn advance_on_empty_sets_position() {
        let mut tracker = CursorTracker::new();
        assert!(tracker.advance(Cursor::new(3)));
        assert_eq!(tracker.current(), Some(Cursor::new(3)));
    }

    #[test]
    fn initialize_can_reset_backwards() {
        let mut tracker = CursorTracker::new();
        tracker.initialize(Cursor::new(50));
        let previous = tracker.initialize(Cursor::new(40));
        assert_eq!(previous, Some(Cursor::new(50)));
        assert_eq!(tracker.current(), Some(Cursor::new(40)));
    }
}
