//! Agent-side contracts and a compact agent loop.
//!
//! This crate defines everything the shutdown coordination core
//! (`quiesce-core`) consumes from the agent side:
//!
//! - [`SessionStore`]: durable, field-scoped session storage with in-memory
//!   and file-backed implementations
//! - [`AgentHook`]: observers dispatched at the loop's safe points
//!   ([`HookPoint::PreReasoning`], [`HookPoint::PreActing`]) that can modify
//!   or abort the pending step
//! - [`Aborted`]: the distinguished failure raised on the event stream when
//!   a hook stops an execution
//! - [`Agent`]: a bounded reasoning/acting loop behind a [`Planner`] seam,
//!   with cooperative interrupt and snapshot checkpoint/restore

pub mod abort;
pub mod agent;
pub mod hook;
pub mod planner;
pub mod store;
pub mod stream;
pub mod tool;
pub mod types;

pub use abort::Aborted;
pub use agent::{Agent, AgentBuildError, AgentBuilder, AgentError};
pub use hook::{AgentHook, EventContext, HookPoint};
pub use planner::{Planner, PlannerError, PlannerOutput};
pub use store::{
    FileSessionStore, MemorySessionStore, SessionKey, SessionStore, SessionStoreExt, StoreError,
    AGENT_STATE_FIELD,
};
pub use stream::AgentEvent;
pub use tool::{Tool, ToolDescriptor, ToolError, ToolResult, ToolStatus};
pub use types::{Message, Role, ToolCall};
