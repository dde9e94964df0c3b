//! State management module.
//!
//! This module provides persistent storage of stack snapshots: applied
//! resources with their provider identifiers and outputs, deposed
//! instances, apply history and advisory locks.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    ApplyHistoryEntry, ApplyOperation, DeposedResource, ResourceState, StateSnapshot, MAX_HISTORY,
    STATE_VERSION,
};
