//! Per-execution record tracked by the lifecycle controller.

use crate::guard::SHUTDOWN_ABORT_REASON;
use crate::marker::InterruptedMarker;
use chrono::{DateTime, Utc};
use quiesce_agent::{Agent, SessionKey, SessionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Links a session key to its agent handle and start time, and encapsulates
/// "interrupt and checkpoint" for the forced-drain path.
pub struct RequestContext {
    session_id: SessionKey,
    agent: Arc<Agent>,
    store: Arc<dyn SessionStore>,
    started_at: DateTime<Utc>,
    interrupted: AtomicBool,
}

impl RequestContext {
    pub fn new(session_id: SessionKey, agent: Arc<Agent>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            session_id,
            agent,
            store,
            started_at: Utc::now(),
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &SessionKey {
        &self.session_id
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Interrupt the agent and checkpoint its state. Idempotent: the first
    /// caller wins, later calls return immediately.
    ///
    /// The interrupt is cooperative (the agent observes it at its next safe
    /// point), so the marker and the snapshot are written here rather than
    /// waiting for the agent to react. Persistence failures are logged and
    /// swallowed: they degrade resume, but must not block shutdown.
    pub async fn interrupt_and_save(&self) {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(session = %self.session_id, "interrupting execution");
        self.agent.interrupt();

        let marker = InterruptedMarker::now(SHUTDOWN_ABORT_REASON);
        if let Err(e) = marker.write(self.store.as_ref(), &self.session_id).await {
            error!(session = %self.session_id, error = %e, "failed to write interrupted marker");
        }
        match self
            .agent
            .checkpoint_to(self.store.as_ref(), &self.session_id)
            .await
        {
            Ok(()) => info!(session = %self.session_id, "state saved"),
            Err(e) => {
                error!(session = %self.session_id, error = %e, "failed to save state");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::INTERRUPTED_STATE_FIELD;
    use async_trait::async_trait;
    use quiesce_agent::{
        MemorySessionStore, Message, Planner, PlannerError, PlannerOutput, SessionStoreExt,
        StoreError, AGENT_STATE_FIELD,
    };
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    struct IdlePlanner;

    #[async_trait]
    impl Planner for IdlePlanner {
        async fn plan(&self, _messages: &[Message]) -> Result<PlannerOutput, PlannerError> {
            Ok(PlannerOutput::default())
        }
    }

    fn test_agent() -> Arc<Agent> {
        Agent::builder("test")
            .planner(Arc::new(IdlePlanner))
            .build()
            .unwrap()
    }

    /// Store wrapper counting writes, for idempotency checks.
    struct CountingStore {
        inner: MemorySessionStore,
        saves: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemorySessionStore::new(),
                saves: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn save(&self, key: &SessionKey, field: &str, value: Value) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(key, field, value).await
        }

        async fn get(&self, key: &SessionKey, field: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(key, field).await
        }

        async fn delete(&self, key: &SessionKey, field: &str) -> Result<(), StoreError> {
            self.inner.delete(key, field).await
        }

        async fn exists(&self, key: &SessionKey) -> Result<bool, StoreError> {
            self.inner.exists(key).await
        }
    }

    #[tokio::test]
    async fn test_interrupt_and_save_persists_marker_and_state() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let agent = test_agent();
        let ctx = RequestContext::new(SessionKey::from("s1"), agent.clone(), store.clone());

        ctx.interrupt_and_save().await;

        assert!(ctx.is_interrupted());
        assert!(agent.is_interrupted());
        let marker = InterruptedMarker::load(store.as_ref(), &SessionKey::from("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(marker.reason, SHUTDOWN_ABORT_REASON);
        assert!(store
            .get(&SessionKey::from("s1"), AGENT_STATE_FIELD)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_interrupt_and_save_is_idempotent() {
        let store = Arc::new(CountingStore::new());
        let ctx = RequestContext::new(
            SessionKey::from("s1"),
            test_agent(),
            store.clone() as Arc<dyn SessionStore>,
        );

        ctx.interrupt_and_save().await;
        let saves_after_first = store.saves.load(Ordering::SeqCst);
        ctx.interrupt_and_save().await;
        ctx.interrupt_and_save().await;

        assert_eq!(store.saves.load(Ordering::SeqCst), saves_after_first);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_propagate() {
        struct FailingStore;

        #[async_trait]
        impl SessionStore for FailingStore {
            async fn save(
                &self,
                _key: &SessionKey,
                _field: &str,
                _value: Value,
            ) -> Result<(), StoreError> {
                Err(StoreError::Backend("down".to_string()))
            }

            async fn get(
                &self,
                _key: &SessionKey,
                _field: &str,
            ) -> Result<Option<Value>, StoreError> {
                Err(StoreError::Backend("down".to_string()))
            }

            async fn delete(&self, _key: &SessionKey, _field: &str) -> Result<(), StoreError> {
                Err(StoreError::Backend("down".to_string()))
            }

            async fn exists(&self, _key: &SessionKey) -> Result<bool, StoreError> {
                Err(StoreError::Backend("down".to_string()))
            }
        }

        let ctx = RequestContext::new(
            SessionKey::from("s1"),
            test_agent(),
            Arc::new(FailingStore),
        );

        // Must not panic or propagate; the flag is still set.
        ctx.interrupt_and_save().await;
        assert!(ctx.is_interrupted());
    }

    #[tokio::test]
    async fn test_checkpointed_state_is_loadable() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let agent = test_agent();
        let ctx = RequestContext::new(SessionKey::from("s1"), agent, store.clone());

        ctx.interrupt_and_save().await;

        let replacement = test_agent();
        assert!(replacement
            .restore_if_present(store.as_ref(), &SessionKey::from("s1"))
            .await
            .unwrap());
        let _ = store
            .get_json::<InterruptedMarker>(&SessionKey::from("s1"), INTERRUPTED_STATE_FIELD)
            .await
            .unwrap()
            .unwrap();
    }
}
