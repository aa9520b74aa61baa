//! Routine playback.
//!
//! - `engine` - the `PlaybackEngine`, its stop handle and progress events
//! - `state` - playback state machine and status snapshot
//! - `progress` - progress fraction and time-left text

pub mod engine;
pub mod progress;
pub mod state;

pub use engine::{PlaybackControl, PlaybackEngine, PlaybackEvent, StepExecutor, NO_NEXT_STEP};
pub use state::{PlaybackState, PlaybackStatus};
