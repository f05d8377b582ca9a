//! 会话生命周期状态与结束原因定义。

use std::fmt;

use serde::Serialize;

/// Lifecycle phases of a conversation session.
///
/// `Created -> Active -> Terminating -> Terminated`, plus the abort edge
/// `Created -> Terminated`. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Terminating,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Terminating => "terminating",
            SessionState::Terminated => "terminated",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Created, SessionState::Active)
                | (SessionState::Created, SessionState::Terminated)
                | (SessionState::Active, SessionState::Terminating)
                | (SessionState::Terminating, SessionState::Terminated)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended, carried by the `SessionEnded` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum EndReason {
    /// Normal stop: control message, transport disconnect or explicit terminate.
    Completed,
    /// Terminated before it was ever started.
    Aborted,
    /// A pipeline worker faulted irrecoverably.
    Failed(String),
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::Aborted => "aborted",
            EndReason::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_documented_transitions_are_allowed() {
        use SessionState::*;

        assert!(Created.can_transition_to(Active));
        assert!(Created.can_transition_to(Terminated));
        assert!(Active.can_transition_to(Terminating));
        assert!(Terminating.can_transition_to(Terminated));

        assert!(!Created.can_transition_to(Terminating));
        assert!(!Active.can_transition_to(Terminated));
        assert!(!Active.can_transition_to(Active));
        for next in [Created, Active, Terminating, Terminated] {
            assert!(!Terminated.can_transition_to(next));
        }
    }

    #[test]
    fn failed_reason_serializes_with_message() {
        let json = serde_json::to_value(EndReason::Failed("worker panicked".into()))
            .expect("serialize end reason");
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["reason"], "worker panicked");
    }
}
