//! The agent: a bounded reasoning/acting loop with hook dispatch.
//!
//! Each step dispatches [`HookPoint::PreReasoning`] to the hook chain, asks
//! the [`Planner`] for the next action, then dispatches
//! [`HookPoint::PreActing`] per tool call before executing it. These are the
//! only suspension points: hooks may abort there, and the cooperative
//! interrupt flag is observed at step entry. Events flow through an mpsc
//! channel; the stream ends with `RunFinish` or a terminal [`Aborted`].

use crate::abort::Aborted;
use crate::hook::{AbortDirective, AgentHook, EventContext, HookPoint};
use crate::planner::{Planner, PlannerError};
use crate::store::{SessionKey, SessionStore, SessionStoreExt, StoreError, AGENT_STATE_FIELD};
use crate::stream::AgentEvent;
use crate::tool::{Tool, ToolResult};
use crate::types::{Message, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const INTERRUPT_REASON: &str = "Execution interrupted";

/// Terminal errors on an execution's event stream.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Aborted(#[from] Aborted),

    #[error("planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Builder-time errors.
#[derive(Debug, Error)]
pub enum AgentBuildError {
    #[error("agent '{0}' requires a planner")]
    MissingPlanner(String),
}

/// Serialized agent state: conversation plus step counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentSnapshot {
    messages: Vec<Message>,
    steps_completed: u32,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("system_prompt", &self.system_prompt)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_steps", &self.max_steps)
            .field("interrupted", &self.interrupted)
            .field("steps_completed", &self.steps_completed)
            .finish()
    }
}

/// A single agent instance bound to one execution at a time.
pub struct Agent {
    name: String,
    system_prompt: String,
    planner: Arc<dyn Planner>,
    tools: HashMap<String, Arc<dyn Tool>>,
    hooks: Vec<Arc<dyn AgentHook>>,
    max_steps: u32,
    memory: Mutex<Vec<Message>>,
    interrupted: AtomicBool,
    steps_completed: AtomicU32,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a cooperative stop. The flag is polled at step entry; the
    /// interrupting party is responsible for checkpointing state.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Snapshot of the conversation so far.
    pub async fn messages(&self) -> Vec<Message> {
        self.memory.lock().await.clone()
    }

    /// Serialize conversation and step counter into the session store.
    pub async fn checkpoint_to(
        &self,
        store: &dyn SessionStore,
        key: &SessionKey,
    ) -> Result<(), StoreError> {
        let snapshot = AgentSnapshot {
            messages: self.memory.lock().await.clone(),
            steps_completed: self.steps_completed.load(Ordering::SeqCst),
        };
        store.save_json(key, AGENT_STATE_FIELD, &snapshot).await
    }

    /// Restore a prior snapshot if one exists. Returns whether state was
    /// found.
    pub async fn restore_if_present(
        &self,
        store: &dyn SessionStore,
        key: &SessionKey,
    ) -> Result<bool, StoreError> {
        match store.get_json::<AgentSnapshot>(key, AGENT_STATE_FIELD).await? {
            Some(snapshot) => {
                debug!(
                    agent = %self.name,
                    session = %key,
                    messages = snapshot.messages.len(),
                    "restored agent state"
                );
                *self.memory.lock().await = snapshot.messages;
                self.steps_completed
                    .store(snapshot.steps_completed, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Spawn the execution loop; events arrive on the returned channel.
    ///
    /// The stream is finite and non-restartable: `RunFinish` or a terminal
    /// `Err` is always the last item.
    pub fn spawn_run(
        self: &Arc<Self>,
        session_id: SessionKey,
        input: Message,
    ) -> mpsc::Receiver<Result<AgentEvent, AgentError>> {
        let (tx, rx) = mpsc::channel(64);
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            agent.run_inner(session_id, input, tx).await;
        });
        rx
    }

    async fn run_inner(
        self: Arc<Self>,
        session_id: SessionKey,
        input: Message,
        tx: mpsc::Sender<Result<AgentEvent, AgentError>>,
    ) {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let _ = tx
            .send(Ok(AgentEvent::RunStart {
                session_id: session_id.to_string(),
                run_id,
            }))
            .await;

        self.memory.lock().await.push(input);

        loop {
            let step = self.steps_completed.load(Ordering::SeqCst);
            if step >= self.max_steps {
                warn!(agent = %self.name, max_steps = self.max_steps, "step budget exhausted");
                break;
            }
            if self.is_interrupted() {
                let _ = tx
                    .send(Err(AgentError::Aborted(Aborted {
                        reason: INTERRUPT_REASON.to_string(),
                        session_key: Some(session_id.clone()),
                        state_saved: true,
                    })))
                    .await;
                return;
            }
            let _ = tx.send(Ok(AgentEvent::StepStart { index: step })).await;

            let mut event = EventContext::for_reasoning(self.build_messages().await);
            self.dispatch(HookPoint::PreReasoning, &mut event).await;
            if let Some(directive) = event.take_abort() {
                self.abort_run(directive, &session_id, &tx).await;
                return;
            }

            let output = match self.planner.plan(&event.messages).await {
                Ok(output) => output,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            if !output.text.is_empty() {
                let _ = tx
                    .send(Ok(AgentEvent::Text {
                        content: output.text.clone(),
                    }))
                    .await;
            }
            self.memory
                .lock()
                .await
                .push(Message::assistant_with_tool_calls(
                    output.text,
                    output.tool_calls.clone(),
                ));

            if output.tool_calls.is_empty() {
                self.steps_completed.fetch_add(1, Ordering::SeqCst);
                break;
            }

            for call in output.tool_calls {
                let mut event = EventContext::for_acting(call);
                self.dispatch(HookPoint::PreActing, &mut event).await;
                if let Some(directive) = event.take_abort() {
                    self.abort_run(directive, &session_id, &tx).await;
                    return;
                }
                let Some(call) = event.tool_call.take() else {
                    continue;
                };

                let _ = tx
                    .send(Ok(AgentEvent::ToolCallStart {
                        id: call.id.clone(),
                        name: call.name.clone(),
                    }))
                    .await;
                let result = self.execute_tool(&call).await;
                self.memory
                    .lock()
                    .await
                    .push(Message::tool(call.id.clone(), result.data.to_string()));
                let _ = tx
                    .send(Ok(AgentEvent::ToolCallDone {
                        id: call.id,
                        result,
                    }))
                    .await;
            }

            self.steps_completed.fetch_add(1, Ordering::SeqCst);
        }

        let _ = tx
            .send(Ok(AgentEvent::RunFinish {
                session_id: session_id.to_string(),
            }))
            .await;
    }

    async fn build_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(self.memory.lock().await.iter().cloned());
        messages
    }

    async fn dispatch(self: &Arc<Self>, point: HookPoint, event: &mut EventContext) {
        for hook in &self.hooks {
            hook.on_event(point, event, self).await;
            if event.is_aborted() {
                debug!(hook = hook.id(), point = %point, "event aborted by hook");
                break;
            }
        }
    }

    async fn abort_run(
        &self,
        directive: AbortDirective,
        session_id: &SessionKey,
        tx: &mpsc::Sender<Result<AgentEvent, AgentError>>,
    ) {
        let session_key = directive
            .checkpoint
            .as_ref()
            .map(|(_, key)| key.clone())
            .unwrap_or_else(|| session_id.clone());
        let mut state_saved = false;
        if let Some((store, key)) = directive.checkpoint {
            match self.checkpoint_to(store.as_ref(), &key).await {
                Ok(()) => state_saved = true,
                Err(e) => {
                    warn!(agent = %self.name, session = %key, error = %e, "checkpoint on abort failed");
                }
            }
        }
        let _ = tx
            .send(Err(AgentError::Aborted(Aborted {
                reason: directive.reason,
                session_key: Some(session_key),
                state_saved,
            })))
            .await;
    }

    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::error(&call.name, format!("tool '{}' not found", call.name));
        };
        match tool.execute(call.arguments.clone()).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(&call.name, e.to_string()),
        }
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    name: String,
    system_prompt: String,
    planner: Option<Arc<dyn Planner>>,
    tools: Vec<Arc<dyn Tool>>,
    hooks: Vec<Arc<dyn AgentHook>>,
    max_steps: u32,
}

impl AgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: String::new(),
            planner: None,
            tools: Vec::new(),
            hooks: Vec::new(),
            max_steps: 10,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn build(self) -> Result<Arc<Agent>, AgentBuildError> {
        let planner = self
            .planner
            .ok_or_else(|| AgentBuildError::MissingPlanner(self.name.clone()))?;
        let tools = self
            .tools
            .into_iter()
            .map(|t| (t.descriptor().name, t))
            .collect();
        let mut hooks = self.hooks;
        hooks.sort_by_key(|h| h.priority());
        Ok(Arc::new(Agent {
            name: self.name,
            system_prompt: self.system_prompt,
            planner,
            tools,
            hooks,
            max_steps: self.max_steps,
            memory: Mutex::new(Vec::new()),
            interrupted: AtomicBool::new(false),
            steps_completed: AtomicU32::new(0),
        }))
    }
}
