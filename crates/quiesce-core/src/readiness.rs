//! Health projections of the controller's state.

use crate::controller::LifecycleController;
use crate::state::LifecycleState;
use serde::Serialize;
use std::sync::Arc;

/// Probe outcome on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeStatus {
    Up,
    Ready,
    NotReady,
}

/// Body of a health probe response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: ProbeStatus,
    pub lifecycle_state: LifecycleState,
    pub active_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Pure projection of controller state for external health polling.
///
/// Liveness is positive while the process runs; readiness goes negative the
/// moment a drain starts, so the traffic router stops sending new requests.
pub struct ReadinessView {
    controller: Arc<LifecycleController>,
}

impl ReadinessView {
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        Self { controller }
    }

    /// Liveness probe: always up while the process is alive.
    pub fn liveness(&self) -> HealthReport {
        HealthReport {
            status: ProbeStatus::Up,
            lifecycle_state: self.controller.current_state(),
            active_count: self.controller.active_count(),
            message: None,
        }
    }

    /// Readiness probe: `Ok` iff the controller accepts new executions.
    pub fn readiness(&self) -> Result<HealthReport, HealthReport> {
        let lifecycle_state = self.controller.current_state();
        let active_count = self.controller.active_count();
        if self.controller.is_accepting() {
            Ok(HealthReport {
                status: ProbeStatus::Ready,
                lifecycle_state,
                active_count,
                message: None,
            })
        } else {
            Err(HealthReport {
                status: ProbeStatus::NotReady,
                lifecycle_state,
                active_count,
                message: Some("Service is shutting down".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_always_up() {
        let controller = Arc::new(LifecycleController::new());
        let view = ReadinessView::new(controller.clone());

        let report = view.liveness();
        assert_eq!(report.status, ProbeStatus::Up);
        assert_eq!(report.lifecycle_state, LifecycleState::Running);

        controller.initiate_drain();
        let report = view.liveness();
        assert_eq!(report.status, ProbeStatus::Up);
        assert_eq!(report.lifecycle_state, LifecycleState::Draining);
    }

    #[test]
    fn test_readiness_follows_accepting() {
        let controller = Arc::new(LifecycleController::new());
        let view = ReadinessView::new(controller.clone());

        let report = view.readiness().unwrap();
        assert_eq!(report.status, ProbeStatus::Ready);

        controller.initiate_drain();
        let report = view.readiness().unwrap_err();
        assert_eq!(report.status, ProbeStatus::NotReady);
        assert_eq!(report.lifecycle_state, LifecycleState::Draining);
        assert!(report.message.is_some());
    }

    #[test]
    fn test_wire_format() {
        let controller = Arc::new(LifecycleController::new());
        let view = ReadinessView::new(controller);

        let raw = serde_json::to_value(view.liveness()).unwrap();
        assert_eq!(raw["status"], "UP");
        assert_eq!(raw["lifecycleState"], "RUNNING");
        assert_eq!(raw["activeCount"], 0);
        assert!(raw.get("message").is_none());
    }
}
