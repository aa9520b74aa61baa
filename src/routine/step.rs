//! Routine steps
//!
//! A step is either a move to a recorded X/Y position or a timed delay. The
//! kind is explicit; labels are free text and never inspected.

use crate::protocol::Command;
use std::fmt;
use std::time::Duration;

/// Marker for an axis with no recorded position.
pub const NOT_AVAILABLE: &str = "NA";

/// Target of one axis in a move step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisTarget {
    /// Axis was not recorded; nothing is sent to it.
    NotAvailable,
    /// Position reply as received from the controller, e.g. `PA10.500000`.
    Recorded(String),
}

impl AxisTarget {
    /// Interpret routine file text. Empty and `NA` mean not recorded.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() || text == NOT_AVAILABLE {
            AxisTarget::NotAvailable
        } else {
            AxisTarget::Recorded(text.to_string())
        }
    }

    /// Whether a position was recorded for this axis.
    pub fn is_recorded(&self) -> bool {
        matches!(self, AxisTarget::Recorded(_))
    }

    /// Text as written to routine files.
    pub fn as_str(&self) -> &str {
        match self {
            AxisTarget::NotAvailable => NOT_AVAILABLE,
            AxisTarget::Recorded(text) => text,
        }
    }

    /// Command replaying this target, if recorded.
    pub fn command(&self) -> Option<Command> {
        match self {
            AxisTarget::NotAvailable => None,
            AxisTarget::Recorded(text) => Some(Command::Raw(text.clone())),
        }
    }
}

impl From<Option<String>> for AxisTarget {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(text) => AxisTarget::parse(&text),
            None => AxisTarget::NotAvailable,
        }
    }
}

impl fmt::Display for AxisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step does when played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Send each recorded target to its axis, then wait the move buffer.
    Move {
        /// Target of the X axis
        x: AxisTarget,
        /// Target of the Y axis
        y: AxisTarget,
    },
    /// Wait without sending anything.
    Delay {
        /// How long to wait
        duration: Duration,
    },
}

/// One routine entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Name shown to the operator and written to routine files
    pub label: String,
    /// Move or delay
    pub kind: StepKind,
}

impl Step {
    /// Move step to the given targets.
    pub fn position(label: impl Into<String>, x: AxisTarget, y: AxisTarget) -> Self {
        Self {
            label: label.into(),
            kind: StepKind::Move { x, y },
        }
    }

    /// Delay step of the given length.
    pub fn delay(label: impl Into<String>, duration: Duration) -> Self {
        Self {
            label: label.into(),
            kind: StepKind::Delay { duration },
        }
    }

    /// Whether this is a delay step.
    pub fn is_delay(&self) -> bool {
        matches!(self.kind, StepKind::Delay { .. })
    }

    /// Duration stored in the routine file (0 for moves).
    pub fn stored_duration(&self) -> Duration {
        match self.kind {
            StepKind::Move { .. } => Duration::ZERO,
            StepKind::Delay { duration } => duration,
        }
    }

    /// Time this step takes during playback.
    pub fn estimated_time(&self, move_buffer: Duration) -> Duration {
        match self.kind {
            StepKind::Move { .. } => move_buffer,
            StepKind::Delay { duration } => duration,
        }
    }

    /// Text shown while this step executes.
    pub fn status_text(&self) -> String {
        match self.kind {
            StepKind::Move { .. } => format!("Moving to {}", self.label),
            StepKind::Delay { .. } => self.label.clone(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StepKind::Move { x, y } => write!(f, "{} (x: {}, y: {})", self.label, x, y),
            StepKind::Delay { duration } => write!(f, "{} ({:?})", self.label, duration),
        }
    }
}
