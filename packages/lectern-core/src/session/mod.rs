//! Session lifecycle: one logical transcription, its registry and renewal.
//!
//! A [`Session`] owns the chunk normalizer, the result handler and at most
//! one live recognizer stream. The [`SessionManager`] is the process-wide
//! registry; the [`SessionRenewer`] swaps recognizer streams underneath
//! active sessions before the upstream hard time limit.

mod manager;
mod renewer;
#[allow(clippy::module_inception)]
mod session;

pub use manager::{CreateSessionRequest, SessionManager};
pub use renewer::{RenewalEvent, RenewalStatus, SessionRenewer};
pub use session::{Session, SessionConfig, SessionInfo, SessionSummary};

use serde::Serialize;

/// Lifecycle states of a session.
///
/// Transitions form a DAG: `Initializing → Active ↔ Renewing`,
/// `Active/Renewing → Closing → Closed`, and `any → Failed` on an
/// unrecoverable error. Illegal transitions fail loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Active,
    Renewing,
    Closing,
    Closed,
    Failed,
}

impl SessionStatus {
    /// Whether `send_audio` is accepted in this state.
    #[must_use]
    pub fn accepts_audio(&self) -> bool {
        matches!(self, Self::Initializing | Self::Active | Self::Renewing)
    }

    /// Whether this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_acceptance_by_status() {
        assert!(SessionStatus::Initializing.accepts_audio());
        assert!(SessionStatus::Active.accepts_audio());
        assert!(SessionStatus::Renewing.accepts_audio());
        assert!(!SessionStatus::Closing.accepts_audio());
        assert!(!SessionStatus::Closed.accepts_audio());
        assert!(!SessionStatus::Failed.accepts_audio());
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Closed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Renewing.is_terminal());
    }

    #[test]
    fn status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Initializing).unwrap(),
            "\"initializing\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::Renewing).unwrap(),
            "\"renewing\""
        );
    }
}
