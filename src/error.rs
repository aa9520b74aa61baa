//! Custom error types for the application.
//!
//! This module defines the primary error type, `SiaError`, for the whole crate.
//! Using the `thiserror` crate, it gives every layer (serial links, routine files,
//! playback) one consistent error vocabulary.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: a serial port could not be opened. The axis stays closed and
//!   the operator may retry.
//! - **`AxisNotConnected`**: a command was addressed to an axis that is not open.
//! - **`Io`**: wraps `std::io::Error` from serial links and routine files.
//! - **`InvalidRoutineFile`** / **`RoutineParse`**: a routine file is missing the
//!   format marker or contains a malformed line.
//! - **`StepIndex`** / **`InvalidLabel`** / **`InvalidDelay`**: rejected routine edits.
//! - **`InvalidStep`**: jog step size outside the stage's range.
//! - **`Usage`**: a shell command with missing or malformed arguments.
//! - **`PlaybackBusy`**: a second playback was requested while one is running.
//! - **`Configuration`**: semantic configuration errors caught by validation.
//!
//! Nothing in here is fatal to the process; every variant describes a failed
//! operation that leaves the session usable.

use crate::protocol::Axis;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SiaResult<T> = std::result::Result<T, SiaError>;

/// Every failure the crate reports.
#[derive(Error, Debug)]
pub enum SiaError {
    /// Opening the serial port of an axis failed.
    #[error("Failed to open serial port '{port}' for {axis} axis: {reason}")]
    Connection {
        /// Axis the port was meant for
        axis: Axis,
        /// Port name as given by the operator
        port: String,
        /// Driver error text
        reason: String,
    },

    /// A command was addressed to a closed axis.
    #[error("{0} axis is not connected")]
    AxisNotConnected(Axis),

    /// Serial link or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The crate was built without the `serial` feature.
    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,

    /// The first line of a routine file lacks the format marker.
    #[error("Not a routine file (missing {marker} marker)")]
    InvalidRoutineFile {
        /// Marker that was expected
        marker: &'static str,
    },

    /// A step line of a routine file could not be read.
    #[error("Routine file line {line}: {reason}")]
    RoutineParse {
        /// One-based line number in the file
        line: usize,
        /// What was wrong with the line
        reason: String,
    },

    /// A routine edit referenced a step that does not exist.
    #[error("Step index {index} out of range (routine has {len} steps)")]
    StepIndex {
        /// Zero-based index that was requested
        index: usize,
        /// Number of steps in the routine
        len: usize,
    },

    /// A step label that could not be written to a routine file.
    #[error("Invalid step label {0:?}: line breaks and control characters are not allowed")]
    InvalidLabel(String),

    /// Delay input was malformed, zero or too long.
    #[error("Invalid delay: {0}")]
    InvalidDelay(String),

    /// Jog step size outside the stage's range.
    #[error("Jog step {0} nm out of range (1-4800000 nm)")]
    InvalidStep(u32),

    /// Repetition count of zero.
    #[error("Repetition count must be at least 1")]
    InvalidRepetitions,

    /// Shell command with missing or malformed arguments.
    #[error("{0}")]
    Usage(String),

    /// A playback was started while another one is running.
    #[error("Playback already running")]
    PlaybackBusy,

    /// Configuration could not be read or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration was read but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl SiaError {
    /// Whether the operator can simply retry the failed operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SiaError::SerialFeatureDisabled | SiaError::Config(_) | SiaError::Configuration(_)
        )
    }
}

impl From<figment::Error> for SiaError {
    fn from(value: figment::Error) -> Self {
        SiaError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_names_axis_and_port() {
        let err = SiaError::Connection {
            axis: Axis::X,
            port: "/dev/ttyUSB0".into(),
            reason: "No such file or directory".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("X axis"));
        assert!(msg.contains("/dev/ttyUSB0"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn feature_disabled_is_not_recoverable() {
        assert!(!SiaError::SerialFeatureDisabled.is_recoverable());
        assert!(SiaError::PlaybackBusy.is_recoverable());
    }
}
