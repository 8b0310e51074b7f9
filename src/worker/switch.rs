//! Global auto-reply switch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Process-wide on/off toggle checked at the start of every cycle.
///
/// Cheap to clone; all clones share one flag.
#[derive(Debug, Clone, Default)]
pub struct AutoReplySwitch {
    enabled: Arc<AtomicBool>,
}

impl AutoReplySwitch {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!("Auto-reply enabled");
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!("Auto-reply disabled");
        }
    }
}
