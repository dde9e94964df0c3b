//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! A store instance is bound to one stack identifier; the identifier is
//! the key every backend files the snapshot under.

use async_trait::async_trait;

use crate::error::{Result, StateError};
use super::lock::LockInfo;
use super::types::{StateSnapshot, STATE_VERSION};

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the snapshot of the bound stack.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<StateSnapshot>>;

    /// Saves the snapshot of the bound stack.
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Deletes the snapshot and any lock.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires a lock on the state.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock on the state.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Extends the expiry of the lock identified by `lock_id`.
    ///
    /// Fails with `StateError::LockFailed` when that lock is no longer the
    /// one held.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Removes the lock regardless of its holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by an unexpired lock.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self.get_lock_info().await?.is_some_and(|l| !l.is_expired()))
    }

    /// Stack identifier this store is bound to.
    fn stack(&self) -> &str;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        (**self).load().await
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        (**self).save(snapshot).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).refresh_lock(lock_id).await
    }

    async fn force_unlock(&self) -> Result<()> {
        (**self).force_unlock().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn stack(&self) -> &str {
        (**self).stack()
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Parses a stored snapshot and checks it belongs to `stack`.
///
/// # Errors
///
/// Returns a state error if the content is not a snapshot, was written by
/// another format version or belongs to a different stack.
pub fn decode_snapshot(content: &str, stack: &str) -> Result<StateSnapshot> {
    let snapshot: StateSnapshot = serde_json::from_str(content).map_err(|e| StateError::Corrupted {
        message: format!("Failed to parse state: {e}"),
    })?;

    if snapshot.version != STATE_VERSION {
        return Err(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: snapshot.version,
        }
        .into());
    }

    if snapshot.stack != stack {
        return Err(StateError::Corrupted {
            message: format!(
                "State belongs to stack '{}', expected '{stack}'",
                snapshot.stack
            ),
        }
        .into());
    }

    Ok(snapshot)
}

/// Serializes a snapshot for storage.
///
/// # Errors
///
/// Returns a serialization error if the snapshot cannot be encoded.
pub fn encode_snapshot(snapshot: &StateSnapshot) -> Result<String> {
    serde_json::to_string_pretty(snapshot)
        .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackformError;

    #[test]
    fn test_decode_rejects_other_stack() {
        let encoded = encode_snapshot(&StateSnapshot::new("web-dev")).unwrap();

        assert_eq!(decode_snapshot(&encoded, "web-dev").unwrap().stack, "web-dev");
        assert!(matches!(
            decode_snapshot(&encoded, "web-prod"),
            Err(StackformError::State(StateError::Corrupted { .. }))
        ));
    }

    #[test]
    fn test_decode_rejects_other_version() {
        let mut snapshot = StateSnapshot::new("web-dev");
        snapshot.version = String::from("0.1");
        let encoded = encode_snapshot(&snapshot).unwrap();

        assert!(matches!(
            decode_snapshot(&encoded, "web-dev"),
            Err(StackformError::State(StateError::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_snapshot("not json", "web-dev").is_err());
    }
}
