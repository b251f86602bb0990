// src/store/mod.rs
//! Durable key-value storage

pub mod file;
pub mod history;
pub mod memory;
pub mod queued;

use crate::error::Result;
use std::sync::Arc;

pub use file::FileStore;
pub use history::ActivityHistory;
pub use memory::MemoryStore;
pub use queued::{QueuedStore, WriterHandle};

/// Key of the in-progress recording snapshot
pub const SNAPSHOT_KEY: &str = "current-run-state";
/// Key of the finalized activity list, newest first
pub const ACTIVITIES_KEY: &str = "activities";

/// Minimal get/set/remove contract of the platform store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;
