//! Routines
//!
//! A routine is an ordered list of steps plus a repetition count. Insertion
//! order is execution order. New position steps are named `Position N` from a
//! counter that only moves forward, so deleting a step never reuses a name.
//!
//! - `step` - step kinds and axis targets
//! - `delay` - delay input with unit rollover
//! - `file` - the `####SIA####` text format

pub mod delay;
pub mod file;
pub mod step;

pub use delay::{DelayLength, DelayUnit};
pub use step::{AxisTarget, Step, StepKind};

use crate::error::{SiaError, SiaResult};
use std::time::Duration;
use tracing::debug;

/// Ordered steps plus the number of passes to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    steps: Vec<Step>,
    repetitions: u32,
    next_position: u32,
}

impl Default for Routine {
    fn default() -> Self {
        Self::new()
    }
}

impl Routine {
    /// Empty routine with one repetition.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            repetitions: 1,
            next_position: 1,
        }
    }

    /// Build a routine from existing steps. The position counter continues
    /// after the number of move steps given.
    pub(crate) fn from_steps(steps: Vec<Step>) -> Self {
        let moves = steps.iter().filter(|s| !s.is_delay()).count();
        Self {
            steps,
            repetitions: 1,
            next_position: u32::try_from(moves).unwrap_or(u32::MAX).saturating_add(1),
        }
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step at a zero-based index.
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Number of steps in one pass.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the routine has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of passes played.
    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Set the number of passes. Zero is rejected.
    pub fn set_repetitions(&mut self, repetitions: u32) -> SiaResult<()> {
        if repetitions == 0 {
            return Err(SiaError::InvalidRepetitions);
        }
        self.repetitions = repetitions;
        Ok(())
    }

    /// Append a `Position N` move step.
    pub fn push_position(&mut self, x: AxisTarget, y: AxisTarget) -> &Step {
        let label = format!("Position {}", self.next_position);
        self.next_position = self.next_position.saturating_add(1);
        debug!(%label, %x, %y, "Recorded position");
        self.push(Step::position(label, x, y))
    }

    /// Append a `Sleep for ...` delay step.
    pub fn push_delay(&mut self, length: DelayLength) -> SiaResult<&Step> {
        length.validate()?;
        Ok(self.push(Step::delay(length.label(), length.duration())))
    }

    fn push(&mut self, step: Step) -> &Step {
        self.steps.push(step);
        &self.steps[self.steps.len() - 1]
    }

    /// Rename a step. Labels are stored one per line in routine files, so
    /// line breaks and other control characters are rejected.
    pub fn rename(&mut self, index: usize, label: impl Into<String>) -> SiaResult<()> {
        let label = label.into();
        if label.chars().any(char::is_control) {
            return Err(SiaError::InvalidLabel(label));
        }
        let len = self.steps.len();
        let step = self
            .steps
            .get_mut(index)
            .ok_or(SiaError::StepIndex { index, len })?;
        step.label = label;
        Ok(())
    }

    /// Move the step at `from` so it ends up at index `to`.
    pub fn move_step(&mut self, from: usize, to: usize) -> SiaResult<()> {
        let len = self.steps.len();
        for index in [from, to] {
            if index >= len {
                return Err(SiaError::StepIndex { index, len });
            }
        }
        let step = self.steps.remove(from);
        self.steps.insert(to, step);
        Ok(())
    }

    /// Delete and return the step at `index`.
    pub fn remove(&mut self, index: usize) -> SiaResult<Step> {
        let len = self.steps.len();
        if index >= len {
            return Err(SiaError::StepIndex { index, len });
        }
        Ok(self.steps.remove(index))
    }

    /// Start a new routine: no steps, one repetition, counter back at 1.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Time of one pass over all steps. Saturates at `Duration::MAX`.
    pub fn pass_time(&self, move_buffer: Duration) -> Duration {
        self.steps
            .iter()
            .map(|s| s.estimated_time(move_buffer))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Estimated playback time for all repetitions. Saturates at
    /// `Duration::MAX`.
    pub fn total_time(&self, move_buffer: Duration) -> Duration {
        self.pass_time(move_buffer)
            .checked_mul(self.repetitions)
            .unwrap_or(Duration::MAX)
    }
}
