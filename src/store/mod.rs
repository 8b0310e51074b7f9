//! Persistence: per-user config and the sent-reply log.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::{MemoryConfigStore, MemoryReplyRecordStore};
pub use traits::{
    AutoReplyRecord, ConfigStore, MAX_REPLY_RECORDS, ReplyRecordStore, ReplyStats, StatsWindow,
};
