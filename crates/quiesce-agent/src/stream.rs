//! Events emitted by a running agent.

use crate::tool::ToolResult;
use serde::{Deserialize, Serialize};

/// One item on an execution's event stream.
///
/// The stream is a lazy, finite sequence: it ends with `RunFinish` on
/// success or with a terminal [`crate::Aborted`] error when a hook stops the
/// execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Execution started.
    RunStart { session_id: String, run_id: String },
    /// A reasoning/acting step started.
    StepStart { index: u32 },
    /// Assistant text produced by a reasoning step.
    Text { content: String },
    /// Tool invocation started.
    ToolCallStart { id: String, name: String },
    /// Tool invocation finished.
    ToolCallDone { id: String, result: ToolResult },
    /// Execution completed normally.
    RunFinish { session_id: String },
}
