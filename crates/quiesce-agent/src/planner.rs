//! Reasoning seam for the agent loop.
//!
//! A [`Planner`] decides the next step from the conversation so far: some
//! text, zero or more tool calls. LLM-backed implementations live outside
//! this crate; tests and the demo use deterministic planners.

use crate::types::{Message, ToolCall};
use async_trait::async_trait;
use thiserror::Error;

/// Planner errors.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planning failed: {0}")]
    Failed(String),
}

/// Output of one reasoning step.
#[derive(Debug, Clone, Default)]
pub struct PlannerOutput {
    /// Assistant text for this step.
    pub text: String,
    /// Tool calls to execute before the next step. Empty means the run is
    /// complete.
    pub tool_calls: Vec<ToolCall>,
}

/// One reasoning step: conversation in, next action out.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, messages: &[Message]) -> Result<PlannerOutput, PlannerError>;
}
