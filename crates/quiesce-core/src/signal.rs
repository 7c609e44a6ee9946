//! Binds process termination signals to the controller's drain sequence.

use crate::controller::LifecycleController;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Wait for SIGTERM/ctrl-c, then run the drain sequence.
///
/// Intended as the future handed to
/// `axum::serve(..).with_graceful_shutdown(..)`: when it returns, the
/// controller is `Terminated` and the process can exit.
pub async fn drain_on_signal(controller: Arc<LifecycleController>, deadline: Duration) {
    wait_for_termination().await;
    run_drain(&controller, deadline).await;
}

/// Execute the drain sequence: stop accepting, wait for active executions,
/// force-checkpoint whatever remains at the deadline. Returns whether the
/// drain was clean.
pub async fn run_drain(controller: &LifecycleController, deadline: Duration) -> bool {
    let active = controller.active_count();
    if active > 0 {
        info!(
            active,
            deadline_secs = deadline.as_secs(),
            "received shutdown signal, waiting for active executions"
        );
    } else {
        info!("received shutdown signal, no active executions");
    }

    controller.initiate_drain();
    let clean = controller.await_drain(deadline).await;

    if clean {
        info!("graceful shutdown complete, all executions finished normally");
    } else {
        warn!("graceful shutdown hit the deadline, remaining executions were interrupted and saved");
    }
    clean
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, falling back to ctrl-c");
            let _ = ctrl_c.await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LifecycleState;

    #[tokio::test]
    async fn test_run_drain_with_no_activity() {
        let controller = LifecycleController::new();
        assert!(run_drain(&controller, Duration::from_secs(1)).await);
        assert_eq!(controller.current_state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_run_drain_is_idempotent_on_state() {
        let controller = LifecycleController::new();
        assert!(run_drain(&controller, Duration::from_millis(10)).await);
        // A second signal arriving late finds the process terminated.
        assert!(run_drain(&controller, Duration::from_millis(10)).await);
        assert_eq!(controller.current_state(), LifecycleState::Terminated);
    }
}
