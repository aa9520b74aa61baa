//! Progress estimation for the status line.

use std::time::Duration;

/// Progress never reaches 1.0 before the last step has finished.
pub const MAX_RUNNING_FRACTION: f64 = 0.99;

/// Fraction of the estimated total elapsed so far, clamped to
/// `0.0..=MAX_RUNNING_FRACTION`.
pub fn fraction(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        return MAX_RUNNING_FRACTION;
    }
    (elapsed.as_secs_f64() / total.as_secs_f64()).clamp(0.0, MAX_RUNNING_FRACTION)
}

/// Remaining time of a run, or zero if the estimate is already exceeded.
pub fn remaining(elapsed: Duration, total: Duration) -> Duration {
    total.saturating_sub(elapsed)
}

/// Human readable remaining time, e.g. `12 minutes to go`.
pub fn time_left_text(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    match secs {
        0..=59 => format!("{} seconds to go", secs),
        60..=119 => "1 minute to go".to_string(),
        120..=3599 => format!("{} minutes to go", secs / 60),
        3600..=7199 => "1 hour to go".to_string(),
        _ => format!("{} hours to go", secs / 3600),
    }
}
