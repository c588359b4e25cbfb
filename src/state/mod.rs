//! State management module for the Terraplane engine.
//!
//! Provides persistent storage of applied resource records, state locking,
//! and run history.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{RunHistoryEntry, RunOperation, STATE_VERSION, StateFile, StateRecord};
