//! Delay input
//!
//! A delay is entered as a value with a unit. Stepping the value rolls over
//! between units the way a clock-style input does: 59 s + 1 becomes 1 min,
//! 1 min - 1 becomes 59 s, and likewise between minutes and hours.
//! Values go up to 99 in every unit.

use crate::error::{SiaError, SiaResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Largest value accepted in any unit.
pub const MAX_DELAY_VALUE: u32 = 99;

/// Unit of a delay value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayUnit {
    /// `s`
    Seconds,
    /// `min`
    Minutes,
    /// `h`
    Hours,
}

impl DelayUnit {
    /// Suffix used in step labels.
    pub fn suffix(self) -> &'static str {
        match self {
            DelayUnit::Seconds => "s",
            DelayUnit::Minutes => "min",
            DelayUnit::Hours => "h",
        }
    }

    fn millis(self) -> u64 {
        match self {
            DelayUnit::Seconds => 1_000,
            DelayUnit::Minutes => 60 * 1_000,
            DelayUnit::Hours => 60 * 60 * 1_000,
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Some(DelayUnit::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Some(DelayUnit::Minutes),
            "h" | "hr" | "hour" | "hours" => Some(DelayUnit::Hours),
            _ => None,
        }
    }
}

/// Delay length as entered by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayLength {
    value: u32,
    unit: DelayUnit,
}

impl DelayLength {
    /// Delay of `value` in `unit`. Range is checked by `validate`.
    pub fn new(value: u32, unit: DelayUnit) -> Self {
        Self { value, unit }
    }

    /// Delay in seconds.
    pub fn seconds(value: u32) -> Self {
        Self::new(value, DelayUnit::Seconds)
    }

    /// Delay in minutes.
    pub fn minutes(value: u32) -> Self {
        Self::new(value, DelayUnit::Minutes)
    }

    /// Delay in hours.
    pub fn hours(value: u32) -> Self {
        Self::new(value, DelayUnit::Hours)
    }

    /// Value in the current unit.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Current unit.
    pub fn unit(&self) -> DelayUnit {
        self.unit
    }

    /// Whether the delay has no length.
    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Check that the delay can become a routine step: longer than zero and
    /// at most `MAX_DELAY_VALUE` in its unit.
    pub fn validate(&self) -> SiaResult<()> {
        if self.is_zero() {
            return Err(SiaError::InvalidDelay(
                "delay must be longer than zero".to_string(),
            ));
        }
        if self.value > MAX_DELAY_VALUE {
            return Err(SiaError::InvalidDelay(format!(
                "{} is more than {} {}",
                self, MAX_DELAY_VALUE, self.unit.suffix()
            )));
        }
        Ok(())
    }

    /// Step the value by `delta` and roll over between units.
    pub fn adjust(self, delta: i64) -> Self {
        let value = i64::from(self.value) + delta;
        let (value, unit) = match self.unit {
            DelayUnit::Seconds if value > 59 => (1, DelayUnit::Minutes),
            DelayUnit::Minutes if value > 59 => (1, DelayUnit::Hours),
            DelayUnit::Minutes if value < 1 => (59, DelayUnit::Seconds),
            DelayUnit::Hours if value < 1 => (59, DelayUnit::Minutes),
            unit => (value.clamp(0, i64::from(MAX_DELAY_VALUE)), unit),
        };
        Self::new(u32::try_from(value).unwrap_or(MAX_DELAY_VALUE), unit)
    }

    /// Label of the delay step, e.g. `Sleep for 5 min`.
    pub fn label(&self) -> String {
        format!("Sleep for {} {}", self.value, self.unit.suffix())
    }

    /// Length of the delay.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.value) * self.unit.millis())
    }
}

impl fmt::Display for DelayLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.suffix())
    }
}

/// Parses `30s`, `5 min`, `2 hours`. A bare number is seconds. The result
/// is not validated; `Routine::push_delay` does that.
impl FromStr for DelayLength {
    type Err = SiaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (number, unit) = s.split_at(split);

        let value: u32 = number
            .parse()
            .map_err(|_| SiaError::InvalidDelay(format!("'{}' has no whole number", s)))?;
        let unit = if unit.trim().is_empty() {
            DelayUnit::Seconds
        } else {
            DelayUnit::parse(unit)
                .ok_or_else(|| SiaError::InvalidDelay(format!("unknown unit '{}'", unit.trim())))?
        };

        Ok(Self::new(value, unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_durations() {
        assert_eq!(DelayLength::seconds(2).label(), "Sleep for 2 s");
        assert_eq!(DelayLength::minutes(5).label(), "Sleep for 5 min");
        assert_eq!(DelayLength::hours(1).label(), "Sleep for 1 h");

        assert_eq!(DelayLength::seconds(2).duration(), Duration::from_millis(2_000));
        assert_eq!(DelayLength::minutes(5).duration(), Duration::from_millis(300_000));
        assert_eq!(DelayLength::hours(1).duration(), Duration::from_millis(3_600_000));
    }

    #[test]
    fn test_rollover() {
        assert_eq!(DelayLength::seconds(59).adjust(1), DelayLength::minutes(1));
        assert_eq!(DelayLength::minutes(59).adjust(1), DelayLength::hours(1));
        assert_eq!(DelayLength::minutes(1).adjust(-1), DelayLength::seconds(59));
        assert_eq!(DelayLength::hours(1).adjust(-1), DelayLength::minutes(59));
        assert_eq!(DelayLength::seconds(0).adjust(-1), DelayLength::seconds(0));
        assert_eq!(DelayLength::hours(3).adjust(1), DelayLength::hours(4));
        assert_eq!(DelayLength::hours(99).adjust(1), DelayLength::hours(99));
        assert_eq!(DelayLength::seconds(5).adjust(-3), DelayLength::seconds(2));
    }

    #[test]
    fn test_validate_bounds() {
        assert!(DelayLength::hours(99).validate().is_ok());
        assert!(DelayLength::seconds(1).validate().is_ok());
        assert!(matches!(
            DelayLength::seconds(0).validate(),
            Err(SiaError::InvalidDelay(_))
        ));
        assert!(matches!(
            DelayLength::hours(100).validate(),
            Err(SiaError::InvalidDelay(_))
        ));
        let huge: DelayLength = "4294967295 h".parse().unwrap();
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("30s".parse::<DelayLength>().unwrap(), DelayLength::seconds(30));
        assert_eq!("5 min".parse::<DelayLength>().unwrap(), DelayLength::minutes(5));
        assert_eq!("2 Hours".parse::<DelayLength>().unwrap(), DelayLength::hours(2));
        assert_eq!("45".parse::<DelayLength>().unwrap(), DelayLength::seconds(45));
        assert!("five min".parse::<DelayLength>().is_err());
        assert!("5 days".parse::<DelayLength>().is_err());
    }
}
