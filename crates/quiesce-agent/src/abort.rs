//! Distinguished abort signal for deliberately terminated executions.

use crate::store::SessionKey;
use thiserror::Error;

/// Raised on the event stream when a hook aborts an execution at a safe
/// point. Carries enough context for the caller to retry: the session key to
/// resume with and whether the agent checkpointed its state first.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct Aborted {
    /// Why the execution was stopped.
    pub reason: String,
    /// Session to retry with, when known.
    pub session_key: Option<SessionKey>,
    /// Whether the agent persisted its state before the signal was raised.
    pub state_saved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_reason() {
        let aborted = Aborted {
            reason: "shutting down".to_string(),
            session_key: Some(SessionKey::from("s1")),
            state_saved: true,
        };
        assert_eq!(aborted.to_string(), "shutting down");
    }
}
