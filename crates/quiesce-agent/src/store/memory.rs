use super::*;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory session store for tests and single-process deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemorySessionStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, key: &SessionKey, field: &str, value: Value) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .entry(key.as_str().to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &SessionKey, field: &str) -> Result<Option<Value>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(key.as_str())
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    async fn delete(&self, key: &SessionKey, field: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if let Some(fields) = records.get_mut(key.as_str()) {
            fields.remove(field);
        }
        Ok(())
    }

    async fn exists(&self, key: &SessionKey) -> Result<bool, StoreError> {
        let records = self.records.read().await;
        Ok(records.contains_key(key.as_str()))
    }
}
