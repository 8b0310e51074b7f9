//! Mail auto-reply engine: change-feed poller, gates and LLM replies.

pub mod activity;
pub mod config;
pub mod cursor;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod worker;
