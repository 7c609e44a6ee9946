//! Durable sentinel recording that an execution was aborted.

use chrono::{DateTime, Utc};
use quiesce_agent::{SessionKey, SessionStore, SessionStoreExt, StoreError};
use serde::{Deserialize, Serialize};

/// Reserved session field under which the marker is stored.
pub const INTERRUPTED_STATE_FIELD: &str = "interrupted_state";

/// Marker written to the session when an execution is aborted.
///
/// Its presence on a subsequent request with the same session key triggers
/// the automatic resume path; it is removed once the resume instruction has
/// been injected, or when an execution completes normally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptedMarker {
    /// Why the execution was aborted.
    pub reason: String,
    /// When the abort happened.
    pub interrupted_at: DateTime<Utc>,
}

impl InterruptedMarker {
    /// Create a marker stamped with the current instant.
    pub fn now(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            interrupted_at: Utc::now(),
        }
    }

    /// Read the marker for a session, if present.
    pub async fn load(
        store: &dyn SessionStore,
        key: &SessionKey,
    ) -> Result<Option<Self>, StoreError> {
        store.get_json(key, INTERRUPTED_STATE_FIELD).await
    }

    /// Persist this marker for a session.
    pub async fn write(
        &self,
        store: &dyn SessionStore,
        key: &SessionKey,
    ) -> Result<(), StoreError> {
        store.save_json(key, INTERRUPTED_STATE_FIELD, self).await
    }

    /// Remove the marker for a session. No-op when absent.
    pub async fn clear(store: &dyn SessionStore, key: &SessionKey) -> Result<(), StoreError> {
        store.delete(key, INTERRUPTED_STATE_FIELD).await
    }
}
