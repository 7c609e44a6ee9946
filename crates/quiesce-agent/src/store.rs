//! Durable session storage contract.
//!
//! A session is a long-lived record identified by a [`SessionKey`], holding
//! named fields (agent snapshots, coordination markers). The core never
//! deletes a session; it only writes and removes individual fields.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

mod file;
mod memory;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

/// Reserved field under which an agent serializes its snapshot.
pub const AGENT_STATE_FIELD: &str = "agent_state";

/// Opaque identifier for a durable execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Session storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Durable key-scoped map with per-field reads and writes.
///
/// Backends must be independently safe for concurrent use; the core does not
/// serialize access.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Overwrite-or-insert a field in a session record.
    async fn save(&self, key: &SessionKey, field: &str, value: Value) -> Result<(), StoreError>;

    /// Read a field. Returns `None` when the session or the field is absent.
    async fn get(&self, key: &SessionKey, field: &str) -> Result<Option<Value>, StoreError>;

    /// Remove a single field. No-op when absent. The session record itself
    /// is preserved.
    async fn delete(&self, key: &SessionKey, field: &str) -> Result<(), StoreError>;

    /// Whether any state exists under the key.
    async fn exists(&self, key: &SessionKey) -> Result<bool, StoreError>;
}

/// Typed convenience layer over the raw [`SessionStore`] contract.
#[async_trait]
pub trait SessionStoreExt: SessionStore {
    /// Serialize and save a typed value under a field.
    async fn save_json<T: Serialize + Sync>(
        &self,
        key: &SessionKey,
        field: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        self.save(key, field, serde_json::to_value(value)?).await
    }

    /// Read and deserialize a typed value from a field.
    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        key: &SessionKey,
        field: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(key, field).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}
