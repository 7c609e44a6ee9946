//! Hook chain dispatched at the agent loop's safe points.
//!
//! Hooks observe every event the loop emits and may modify the pending step
//! (the message list before reasoning, the tool call before acting) or abort
//! the execution, optionally asking the agent to checkpoint into a session
//! store first.

use crate::agent::Agent;
use crate::store::{SessionKey, SessionStore};
use crate::types::{Message, ToolCall};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Safe points at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Just before a reasoning step (one planner call).
    PreReasoning,
    /// Just before a tool invocation.
    PreActing,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPoint::PreReasoning => write!(f, "PreReasoning"),
            HookPoint::PreActing => write!(f, "PreActing"),
        }
    }
}

pub(crate) struct AbortDirective {
    pub(crate) reason: String,
    pub(crate) checkpoint: Option<(Arc<dyn SessionStore>, SessionKey)>,
}

/// Mutable context passed through the hook chain for a single event.
pub struct EventContext {
    /// Messages for the upcoming reasoning step. Modifiable; only meaningful
    /// for [`HookPoint::PreReasoning`].
    pub messages: Vec<Message>,
    /// Tool call about to execute. Modifiable; only meaningful for
    /// [`HookPoint::PreActing`].
    pub tool_call: Option<ToolCall>,
    abort: Option<AbortDirective>,
}

impl EventContext {
    /// Context for a reasoning event.
    pub fn for_reasoning(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tool_call: None,
            abort: None,
        }
    }

    /// Context for an acting event.
    pub fn for_acting(call: ToolCall) -> Self {
        Self {
            messages: Vec::new(),
            tool_call: Some(call),
            abort: None,
        }
    }

    /// Mark the event as aborted. The agent raises [`crate::Aborted`]
    /// instead of proceeding.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.abort.is_none() {
            self.abort = Some(AbortDirective {
                reason: reason.into(),
                checkpoint: None,
            });
        }
    }

    /// Mark the event as aborted and ask the agent to serialize its state
    /// into `store` under `key` before raising the signal.
    pub fn abort_with_checkpoint(
        &mut self,
        reason: impl Into<String>,
        store: Arc<dyn SessionStore>,
        key: SessionKey,
    ) {
        if self.abort.is_none() {
            self.abort = Some(AbortDirective {
                reason: reason.into(),
                checkpoint: Some((store, key)),
            });
        }
    }

    /// Whether a hook has aborted this event.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    /// Abort reason, if aborted.
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort.as_ref().map(|a| a.reason.as_str())
    }

    /// Whether the abort asked for a checkpoint.
    pub fn checkpoint_requested(&self) -> bool {
        self.abort
            .as_ref()
            .is_some_and(|a| a.checkpoint.is_some())
    }

    pub(crate) fn take_abort(&mut self) -> Option<AbortDirective> {
        self.abort.take()
    }
}

/// Observer registered on an agent, dispatched at every safe point.
///
/// Hooks run in ascending [`priority`](AgentHook::priority) order; an abort
/// stops the chain so later hooks (which may have irreversible side effects)
/// never see the event.
#[async_trait]
pub trait AgentHook: Send + Sync {
    /// Hook identifier for logging.
    fn id(&self) -> &str;

    /// Dispatch order: lowest runs first.
    fn priority(&self) -> i32 {
        100
    }

    /// Observe one event. Mutate `event` to modify or abort the step.
    async fn on_event(&self, point: HookPoint, event: &mut EventContext, agent: &Arc<Agent>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use serde_json::json;

    #[test]
    fn test_reasoning_context() {
        let ctx = EventContext::for_reasoning(vec![Message::user("hi")]);
        assert_eq!(ctx.messages.len(), 1);
        assert!(ctx.tool_call.is_none());
        assert!(!ctx.is_aborted());
    }

    #[test]
    fn test_acting_context() {
        let ctx = EventContext::for_acting(ToolCall::new("call_1", "lookup", json!({})));
        assert!(ctx.messages.is_empty());
        assert_eq!(ctx.tool_call.as_ref().map(|c| c.name.as_str()), Some("lookup"));
    }

    #[test]
    fn test_abort_without_checkpoint() {
        let mut ctx = EventContext::for_reasoning(vec![]);
        ctx.abort("stop");
        assert!(ctx.is_aborted());
        assert_eq!(ctx.abort_reason(), Some("stop"));
        assert!(!ctx.checkpoint_requested());
    }

    #[test]
    fn test_abort_with_checkpoint() {
        let mut ctx = EventContext::for_reasoning(vec![]);
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        ctx.abort_with_checkpoint("stop", store, SessionKey::from("s1"));
        assert!(ctx.is_aborted());
        assert!(ctx.checkpoint_requested());
    }

    #[test]
    fn test_first_abort_wins() {
        let mut ctx = EventContext::for_reasoning(vec![]);
        ctx.abort("first");
        ctx.abort("second");
        assert_eq!(ctx.abort_reason(), Some("first"));
    }
}
