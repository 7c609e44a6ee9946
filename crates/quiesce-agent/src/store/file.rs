use super::*;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// File-backed session store: one JSON document per session key.
///
/// Records are replaced atomically (write to a temp file, fsync, rename) so
/// a crash mid-checkpoint leaves the previous record intact. Mutations hold
/// a store-wide write lock across the read-modify-write of the record.
pub struct FileSessionStore {
    base_path: PathBuf,
    lock: RwLock<()>,
}

impl FileSessionStore {
    /// Create a new file store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            lock: RwLock::new(()),
        }
    }

    fn session_path(&self, key: &SessionKey) -> Result<PathBuf, StoreError> {
        Self::validate_key(key)?;
        Ok(self.base_path.join(format!("{}.json", key.as_str())))
    }

    /// Validate that a session key is safe for use as a filename.
    /// Rejects path separators, `..`, and control characters.
    fn validate_key(key: &SessionKey) -> Result<(), StoreError> {
        let id = key.as_str();
        if id.is_empty() {
            return Err(StoreError::InvalidKey("session key cannot be empty".to_string()));
        }
        if id.contains('/') || id.contains('\\') || id.contains("..") || id.contains('\0') {
            return Err(StoreError::InvalidKey(format!(
                "session key contains invalid characters: {id:?}"
            )));
        }
        if id.chars().any(|c| c.is_control()) {
            return Err(StoreError::InvalidKey(format!(
                "session key contains control characters: {id:?}"
            )));
        }
        Ok(())
    }

    async fn load_record(&self, key: &SessionKey) -> Result<Option<HashMap<String, Value>>, StoreError> {
        let path = self.session_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_record(
        &self,
        key: &SessionKey,
        record: &HashMap<String, Value>,
    ) -> Result<(), StoreError> {
        let path = self.session_path(key)?;
        if !self.base_path.exists() {
            tokio::fs::create_dir_all(&self.base_path).await?;
        }
        let content = serde_json::to_vec(record)?;

        let tmp_path = self.base_path.join(format!(
            ".{}.{}.tmp",
            key.as_str(),
            uuid::Uuid::new_v4().simple()
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&content).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            match tokio::fs::rename(&tmp_path, &path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tokio::fs::remove_file(&path).await?;
                    tokio::fs::rename(&tmp_path, &path).await?;
                }
                Err(e) => return Err(e),
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, key: &SessionKey, field: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut record = self.load_record(key).await?.unwrap_or_default();
        record.insert(field.to_string(), value);
        self.save_record(key, &record).await
    }

    async fn get(&self, key: &SessionKey, field: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.read().await;
        Ok(self
            .load_record(key)
            .await?
            .and_then(|mut record| record.remove(field)))
    }

    async fn delete(&self, key: &SessionKey, field: &str) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let Some(mut record) = self.load_record(key).await? else {
            return Ok(());
        };
        if record.remove(field).is_some() {
            self.save_record(key, &record).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &SessionKey) -> Result<bool, StoreError> {
        let _guard = self.lock.read().await;
        let path = self.session_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}
