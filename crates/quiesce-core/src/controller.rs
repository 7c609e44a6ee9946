//! Process-wide lifecycle controller.

use crate::context::RequestContext;
use crate::state::LifecycleState;
use dashmap::DashMap;
use quiesce_agent::{Agent, SessionKey, SessionStore};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Default window active executions get to finish once a drain starts.
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Registration errors.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("service is shutting down, not accepting new executions")]
    NotAccepting,
}

/// Tracks active executions and owns the shutdown state machine.
///
/// Registration and unregistration happen concurrently from many executions;
/// the drain sequence runs once, from the signal path. State transitions use
/// compare-and-swap so a racing registration observes the new state on its
/// next [`is_accepting`](Self::is_accepting) check.
pub struct LifecycleController {
    active: DashMap<SessionKey, Arc<RequestContext>>,
    state: AtomicU8,
    drained: Notify,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            state: AtomicU8::new(LifecycleState::Running.as_u8()),
            drained: Notify::new(),
        }
    }

    /// The process-wide controller. Binaries wire this one instance through
    /// their components; tests construct their own with [`new`](Self::new).
    pub fn global() -> Arc<LifecycleController> {
        static GLOBAL: OnceLock<Arc<LifecycleController>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(LifecycleController::new())).clone()
    }

    /// Track a new execution. Fails once draining has started.
    ///
    /// A session id that is already registered is replaced with a warning:
    /// the previous context is considered abandoned by its caller. Its own
    /// `complete()`/abort paths still work against the store, and
    /// unregistering an absent key is a no-op.
    pub fn register(
        &self,
        session_id: SessionKey,
        agent: Arc<Agent>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Arc<RequestContext>, RegisterError> {
        if !self.is_accepting() {
            return Err(RegisterError::NotAccepting);
        }

        let context = Arc::new(RequestContext::new(session_id.clone(), agent, store));
        if self.active.insert(session_id.clone(), context.clone()).is_some() {
            warn!(session = %session_id, "execution already registered, replacing");
        }
        debug!(session = %session_id, active = self.active.len(), "registered execution");
        Ok(context)
    }

    /// Stop tracking an execution. No-op for unknown keys. When draining and
    /// the table becomes empty, releases the drain waiter.
    pub fn unregister(&self, session_id: &SessionKey) {
        if self.active.remove(session_id).is_some() {
            debug!(session = %session_id, active = self.active.len(), "unregistered execution");
            if self.current_state() == LifecycleState::Draining && self.active.is_empty() {
                self.drained.notify_waiters();
            }
        }
    }

    /// Whether new executions are accepted.
    pub fn is_accepting(&self) -> bool {
        self.current_state() == LifecycleState::Running
    }

    pub fn current_state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Reverse lookup by agent identity.
    pub fn find_by_agent(&self, agent: &Arc<Agent>) -> Option<Arc<RequestContext>> {
        self.active
            .iter()
            .find(|entry| Arc::ptr_eq(entry.value().agent(), agent))
            .map(|entry| entry.value().clone())
    }

    /// Transition `Running → Draining`. Idempotent; once draining, new
    /// registrations fail and the readiness probe goes negative.
    pub fn initiate_drain(&self) {
        if self
            .state
            .compare_exchange(
                LifecycleState::Running.as_u8(),
                LifecycleState::Draining.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!(active = self.active.len(), "drain initiated, rejecting new executions");
        }
    }

    /// Block until the active table empties or the deadline elapses.
    ///
    /// Returns `true` when every execution finished on its own. On timeout,
    /// every remaining execution is interrupted and checkpointed, the table
    /// is cleared, and `false` is returned. Either way the state ends
    /// `Terminated`. Call only after [`initiate_drain`](Self::initiate_drain),
    /// from the single shutdown path.
    pub async fn await_drain(&self, deadline: Duration) -> bool {
        if self.current_state() != LifecycleState::Draining {
            warn!(state = %self.current_state(), "await_drain called while not draining");
            return true;
        }

        if self.active.is_empty() {
            self.state
                .store(LifecycleState::Terminated.as_u8(), Ordering::SeqCst);
            info!("no active executions, drain complete");
            return true;
        }

        info!(
            active = self.active.len(),
            deadline_secs = deadline.as_secs(),
            "waiting for active executions to finish"
        );

        let drained = tokio::time::timeout(deadline, async {
            // Register interest before each emptiness check so a wakeup
            // between the check and the await is not lost.
            let mut notified = std::pin::pin!(self.drained.notified());
            loop {
                notified.as_mut().enable();
                if self.active.is_empty() {
                    return;
                }
                notified.as_mut().await;
                notified.set(self.drained.notified());
            }
        })
        .await;

        match drained {
            Ok(()) => {
                self.state
                    .store(LifecycleState::Terminated.as_u8(), Ordering::SeqCst);
                info!("all executions finished normally");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.active.len(),
                    "drain deadline reached, force-checkpointing remaining executions"
                );
                self.force_checkpoint_all().await;
                self.state
                    .store(LifecycleState::Terminated.as_u8(), Ordering::SeqCst);
                false
            }
        }
    }

    /// Interrupt and checkpoint every remaining execution, then clear the
    /// table. Failures are contained per context inside `interrupt_and_save`.
    async fn force_checkpoint_all(&self) {
        let snapshot: Vec<Arc<RequestContext>> =
            self.active.iter().map(|entry| entry.value().clone()).collect();
        for context in snapshot {
            context.interrupt_and_save().await;
        }
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::InterruptedMarker;
    use async_trait::async_trait;
    use quiesce_agent::{
        MemorySessionStore, Message, Planner, PlannerError, PlannerOutput, AGENT_STATE_FIELD,
    };

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

    fn test_store() -> Arc<dyn SessionStore> {
        Arc::new(MemorySessionStore::new())
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let controller = LifecycleController::new();
        let key = SessionKey::from("s1");

        assert_eq!(controller.active_count(), 0);
        controller
            .register(key.clone(), test_agent(), test_store())
            .unwrap();
        assert_eq!(controller.active_count(), 1);

        controller.unregister(&key);
        assert_eq!(controller.active_count(), 0);

        // Unregistering an absent key is a no-op.
        controller.unregister(&key);
        assert_eq!(controller.active_count(), 0);
    }

    #[tokio::test]
    async fn test_register_fails_while_draining() {
        let controller = LifecycleController::new();
        controller.initiate_drain();

        let result = controller.register(SessionKey::from("s1"), test_agent(), test_store());
        assert!(matches!(result, Err(RegisterError::NotAccepting)));
        assert_eq!(controller.active_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_register_replaces() {
        let controller = LifecycleController::new();
        let key = SessionKey::from("s1");

        let first_agent = test_agent();
        controller
            .register(key.clone(), first_agent.clone(), test_store())
            .unwrap();
        let second_agent = test_agent();
        controller
            .register(key.clone(), second_agent.clone(), test_store())
            .unwrap();

        assert_eq!(controller.active_count(), 1);
        assert!(controller.find_by_agent(&first_agent).is_none());
        assert!(controller.find_by_agent(&second_agent).is_some());
    }

    #[tokio::test]
    async fn test_find_by_agent_identity() {
        let controller = LifecycleController::new();
        let agent = test_agent();
        let other = test_agent();

        controller
            .register(SessionKey::from("s1"), agent.clone(), test_store())
            .unwrap();

        let found = controller.find_by_agent(&agent).unwrap();
        assert_eq!(found.session_id(), &SessionKey::from("s1"));
        assert!(controller.find_by_agent(&other).is_none());
    }

    #[tokio::test]
    async fn test_initiate_drain_is_idempotent() {
        let controller = LifecycleController::new();
        assert!(controller.is_accepting());

        controller.initiate_drain();
        controller.initiate_drain();
        controller.initiate_drain();

        assert_eq!(controller.current_state(), LifecycleState::Draining);
        assert!(!controller.is_accepting());
    }

    #[tokio::test]
    async fn test_state_never_goes_backward() {
        let controller = LifecycleController::new();
        controller.initiate_drain();
        assert!(controller.await_drain(Duration::from_millis(10)).await);
        assert_eq!(controller.current_state(), LifecycleState::Terminated);

        // A late initiate_drain cannot leave Terminated.
        controller.initiate_drain();
        assert_eq!(controller.current_state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_await_drain_empty_returns_immediately() {
        let controller = LifecycleController::new();
        controller.initiate_drain();

        let clean = controller.await_drain(Duration::from_secs(3600)).await;
        assert!(clean);
        assert_eq!(controller.current_state(), LifecycleState::Terminated);
        assert_eq!(controller.active_count(), 0);
    }

    #[tokio::test]
    async fn test_await_drain_without_initiate_warns_and_returns() {
        let controller = LifecycleController::new();
        assert!(controller.await_drain(Duration::from_millis(10)).await);
        assert_eq!(controller.current_state(), LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_await_drain_releases_on_last_unregister() {
        let controller = Arc::new(LifecycleController::new());
        let key = SessionKey::from("s1");
        controller
            .register(key.clone(), test_agent(), test_store())
            .unwrap();
        controller.initiate_drain();

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.await_drain(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.unregister(&key);

        assert!(waiter.await.unwrap());
        assert_eq!(controller.current_state(), LifecycleState::Terminated);
        assert_eq!(controller.active_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_deadline_force_checkpoints() {
        let controller = LifecycleController::new();
        let store = test_store();
        let agent = test_agent();
        let key = SessionKey::from("s1");
        controller
            .register(key.clone(), agent.clone(), store.clone())
            .unwrap();
        controller.initiate_drain();

        let clean = controller.await_drain(Duration::ZERO).await;

        assert!(!clean);
        assert_eq!(controller.current_state(), LifecycleState::Terminated);
        assert_eq!(controller.active_count(), 0);
        assert!(agent.is_interrupted());
        assert!(InterruptedMarker::load(store.as_ref(), &key)
            .await
            .unwrap()
            .is_some());
        assert!(store.get(&key, AGENT_STATE_FIELD).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_force_checkpoint_failure_does_not_stop_others() {
        use serde_json::Value;
        use quiesce_agent::StoreError;

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
                Ok(None)
            }

            async fn delete(&self, _key: &SessionKey, _field: &str) -> Result<(), StoreError> {
                Ok(())
            }

            async fn exists(&self, _key: &SessionKey) -> Result<bool, StoreError> {
                Ok(false)
            }
        }

        let controller = LifecycleController::new();
        let healthy_store = test_store();
        let healthy_key = SessionKey::from("healthy");

        controller
            .register(SessionKey::from("broken"), test_agent(), Arc::new(FailingStore))
            .unwrap();
        controller
            .register(healthy_key.clone(), test_agent(), healthy_store.clone())
            .unwrap();
        controller.initiate_drain();

        assert!(!controller.await_drain(Duration::ZERO).await);
        assert_eq!(controller.active_count(), 0);
        // The healthy context was still checkpointed.
        assert!(InterruptedMarker::load(healthy_store.as_ref(), &healthy_key)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_global_returns_same_instance() {
        let a = LifecycleController::global();
        let b = LifecycleController::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
