//! Auto-reply worker.
//!
//! - `orchestrator`: one poll cycle end to end
//! - `poller`: fixed-interval loop driving the orchestrator
//! - `state`: poll state machine and cycle reports
//! - `switch`: global on/off

pub mod orchestrator;
pub mod poller;
pub mod state;
pub mod switch;

pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use poller::spawn_poll_loop;
pub use state::{CycleReport, MessageOutcome, PollState};
pub use switch::AutoReplySwitch;
