//! Process lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the serving process.
///
/// Transitions are monotonic: `Running → Draining → Terminated`. Only
/// `Running` accepts new executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Normal operation, new executions are accepted.
    Running,
    /// Drain in progress: new executions are rejected, active ones get a
    /// bounded window to finish.
    Draining,
    /// Drain finished: every execution completed or was checkpointed.
    Terminated,
}

impl LifecycleState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Running => 0,
            LifecycleState::Draining => 1,
            LifecycleState::Terminated => 2,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> LifecycleState {
        match raw {
            0 => LifecycleState::Running,
            1 => LifecycleState::Draining,
            _ => LifecycleState::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Running => "RUNNING",
            LifecycleState::Draining => "DRAINING",
            LifecycleState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
