//! Playback state tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Routine playback state.
///
/// # State Machine
///
/// ```text
/// Idle ──start──> Running ──last step──> Completed
///                   │  │
///              stop │  │ transport error
///                   ▼  ▼
///          Cancelled    Failed
/// ```
///
/// Every state except `Running` allows starting a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Nothing played yet
    Idle,
    /// Routine executing
    Running,
    /// All repetitions finished
    Completed,
    /// Stopped by the operator
    Cancelled,
    /// Aborted by an error
    Failed,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "Idle"),
            PlaybackState::Running => write!(f, "Running"),
            PlaybackState::Completed => write!(f, "Completed"),
            PlaybackState::Cancelled => write!(f, "Cancelled"),
            PlaybackState::Failed => write!(f, "Failed"),
        }
    }
}

impl PlaybackState {
    /// Check if the state allows starting a new run.
    pub fn can_begin(&self) -> bool {
        !matches!(self, PlaybackState::Running)
    }

    /// A run reached one of its end states.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            PlaybackState::Completed | PlaybackState::Cancelled | PlaybackState::Failed
        )
    }
}

/// Snapshot of the engine for status displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackStatus {
    /// Engine state
    pub state: PlaybackState,
    /// Identifier of the current or last run
    pub run_id: Option<Uuid>,
    /// Zero-based repetition being executed
    pub current_repetition: u32,
    /// Zero-based step index within the repetition
    pub current_step_index: usize,
    /// Wall-clock start of the current or last run
    pub started_at: Option<DateTime<Utc>>,
    /// Steps executed so far across all repetitions
    pub steps_executed: usize,
    /// Error message if state is Failed
    pub last_error: Option<String>,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            run_id: None,
            current_repetition: 0,
            current_step_index: 0,
            started_at: None,
            steps_executed: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_allowed() {
        assert!(PlaybackState::Idle.can_begin());
        assert!(PlaybackState::Completed.can_begin());
        assert!(PlaybackState::Cancelled.can_begin());
        assert!(PlaybackState::Failed.can_begin());
        assert!(!PlaybackState::Running.can_begin());

        assert!(!PlaybackState::Idle.is_finished());
        assert!(PlaybackState::Failed.is_finished());
    }

    #[test]
    fn test_status_serializes() {
        let status = PlaybackStatus {
            state: PlaybackState::Running,
            run_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"Running\""));
    }
}
