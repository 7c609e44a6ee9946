//! Graceful-shutdown coordination for long-running agent executions.
//!
//! When the host process receives a termination signal, in-flight executions
//! must stop accepting new work, drain within a bounded window, and
//! checkpoint anything that cannot finish so a replacement instance can
//! resume it. This crate provides the coordination machinery:
//!
//! - [`LifecycleController`]: process-wide registry of active executions and
//!   the `Running → Draining → Terminated` state machine
//! - [`ShutdownGuard`]: per-execution hook that registers lazily, injects a
//!   resume instruction after an interrupted run, and aborts with checkpoint
//!   once draining starts
//! - [`InterruptedMarker`]: durable sentinel distinguishing "aborted" from
//!   "completed" sessions
//! - [`drain_on_signal`]: binds SIGTERM/ctrl-c to the drain sequence
//! - [`ReadinessView`]: health projections for an external traffic router
//!
//! The agent, its planner, and the store backend are external collaborators;
//! their contracts live in `quiesce-agent`.

pub mod context;
pub mod controller;
pub mod guard;
pub mod marker;
pub mod readiness;
pub mod signal;
pub mod state;

pub use context::RequestContext;
pub use controller::{LifecycleController, RegisterError, DEFAULT_DRAIN_DEADLINE};
pub use guard::{ShutdownGuard, SHUTDOWN_ABORT_REASON};
pub use marker::{InterruptedMarker, INTERRUPTED_STATE_FIELD};
pub use readiness::{HealthReport, ProbeStatus, ReadinessView};
pub use signal::{drain_on_signal, run_drain};
pub use state::LifecycleState;
