//! Per-execution hook wiring an agent into the shutdown lifecycle.

use crate::controller::{LifecycleController, RegisterError};
use crate::marker::InterruptedMarker;
use async_trait::async_trait;
use quiesce_agent::{Agent, AgentHook, EventContext, HookPoint, Message, SessionKey, SessionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Reason attached to shutdown aborts and to the interrupted marker.
pub const SHUTDOWN_ABORT_REASON: &str = "Service is shutting down, please retry later";

/// Hook giving one agent execution graceful-shutdown behavior.
///
/// Registered at priority 0 so the abort decision gates every other hook.
/// On the first reasoning event it registers the execution with the
/// controller and, if the session carries an [`InterruptedMarker`], injects
/// a resume instruction and clears the marker. From then on every reasoning
/// and acting event first asks the controller whether the process still
/// accepts work; once draining, the event is turned into an abort with
/// checkpoint.
///
/// The surrounding handler must call [`complete`](Self::complete) after the
/// stream finishes normally, and must not call it on the abort path.
pub struct ShutdownGuard {
    store: Arc<dyn SessionStore>,
    session_key: SessionKey,
    controller: Arc<LifecycleController>,
    agent: OnceLock<Arc<Agent>>,
    registered: AtomicBool,
    resumed: AtomicBool,
    completed: AtomicBool,
}

impl ShutdownGuard {
    pub fn new(
        store: Arc<dyn SessionStore>,
        session_key: SessionKey,
        controller: Arc<LifecycleController>,
    ) -> Self {
        Self {
            store,
            session_key,
            controller,
            agent: OnceLock::new(),
            registered: AtomicBool::new(false),
            resumed: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Finish the execution successfully: clear the interrupted marker, save
    /// the agent's state, unregister from the controller. Idempotent.
    ///
    /// The session record itself is preserved for future executions.
    pub async fn complete(&self) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = InterruptedMarker::clear(self.store.as_ref(), &self.session_key).await {
            warn!(session = %self.session_key, error = %e, "failed to clear interrupted marker");
        }

        if let Some(agent) = self.agent.get() {
            match agent
                .checkpoint_to(self.store.as_ref(), &self.session_key)
                .await
            {
                Ok(()) => {
                    debug!(session = %self.session_key, "execution completed, state saved");
                }
                Err(e) => {
                    warn!(session = %self.session_key, error = %e, "failed to save state on completion");
                }
            }
        }

        if self.registered.load(Ordering::SeqCst) {
            self.controller.unregister(&self.session_key);
        }
    }

    /// Register with the controller on the first reasoning event. Returns
    /// `false` when registration was refused and the event was aborted.
    fn ensure_registered(&self, agent: &Arc<Agent>, event: &mut EventContext) -> bool {
        if self.registered.load(Ordering::SeqCst) {
            return true;
        }

        match self
            .controller
            .register(self.session_key.clone(), agent.clone(), self.store.clone())
        {
            Ok(_context) => {
                let _ = self.agent.set(agent.clone());
                self.registered.store(true, Ordering::SeqCst);
                debug!(session = %self.session_key, "registered execution with controller");
                true
            }
            Err(RegisterError::NotAccepting) => {
                // The drain won the race against this execution's first
                // event. Nothing ran yet, so there is no state to point a
                // resume marker at; abort plainly.
                info!(session = %self.session_key, "registration refused, aborting before first step");
                event.abort(SHUTDOWN_ABORT_REASON);
                false
            }
        }
    }

    /// Inject the resume instruction when the previous execution on this
    /// session was interrupted. Runs at most once per hook instance.
    async fn handle_resume(&self, event: &mut EventContext) {
        let marker = match InterruptedMarker::load(self.store.as_ref(), &self.session_key).await {
            Ok(Some(marker)) => marker,
            Ok(None) => return,
            Err(e) => {
                warn!(session = %self.session_key, error = %e, "failed to read interrupted marker");
                return;
            }
        };

        info!(
            session = %self.session_key,
            interrupted_at = %marker.interrupted_at,
            reason = %marker.reason,
            "detected interrupted execution, injecting resume message"
        );

        // Appended after the existing messages so it is the last
        // instruction the model sees.
        event.messages.push(Message::system(format!(
            "Your previous execution was interrupted at {} due to: {}. \
             Review your conversation history and continue from where you \
             left off. Do not restart from the beginning.",
            marker.interrupted_at, marker.reason
        )));

        if let Err(e) = InterruptedMarker::clear(self.store.as_ref(), &self.session_key).await {
            warn!(session = %self.session_key, error = %e, "failed to clear interrupted marker");
        }
        self.resumed.store(true, Ordering::SeqCst);
    }

    /// Turn the event into an abort-with-checkpoint once draining started.
    async fn handle_shutdown(&self, point: HookPoint, event: &mut EventContext) {
        info!(session = %self.session_key, point = %point, "aborting execution, saving state");

        let marker = InterruptedMarker::now(SHUTDOWN_ABORT_REASON);
        if let Err(e) = marker.write(self.store.as_ref(), &self.session_key).await {
            warn!(session = %self.session_key, error = %e, "failed to write interrupted marker");
        }

        event.abort_with_checkpoint(
            SHUTDOWN_ABORT_REASON,
            self.store.clone(),
            self.session_key.clone(),
        );
    }
}

#[async_trait]
impl AgentHook for ShutdownGuard {
    fn id(&self) -> &str {
        "shutdown_guard"
    }

    /// Must gate hooks with irreversible side effects.
    fn priority(&self) -> i32 {
        0
    }

    async fn on_event(&self, point: HookPoint, event: &mut EventContext, agent: &Arc<Agent>) {
        if point == HookPoint::PreReasoning {
            if !self.ensure_registered(agent, event) {
                return;
            }
            if !self.resumed.load(Ordering::SeqCst) {
                self.handle_resume(event).await;
            }
        }

        if !self.controller.is_accepting() {
            self.handle_shutdown(point, event).await;
        }
    }
}
