//! Operator jogging
//!
//! Maps jog buttons to axis commands. A step jog sends a relative move of the
//! configured step size; a continuous jog drives the axis open loop at a
//! speed until `ST`.
//!
//! Left/Right drive X, Up/Down drive Y. Right and Up are positive. `swap_xy`
//! exchanges the axes and `reverse_x`/`reverse_y` flip the sign per axis, so
//! the buttons can follow however the stage is mounted.

use crate::config::{JogConfig, MAX_STEP_NM, MIN_STEP_NM};
use crate::error::{SiaError, SiaResult};
use crate::protocol::{Axis, Command};
use std::fmt;
use std::str::FromStr;

const NM_PER_MM: f64 = 1_000_000.0;

/// Arrow direction of a jog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Negative X
    Left,
    /// Positive X
    Right,
    /// Positive Y
    Up,
    /// Negative Y
    Down,
}

impl Direction {
    fn base(self) -> (Axis, i32) {
        match self {
            Direction::Left => (Axis::X, -1),
            Direction::Right => (Axis::X, 1),
            Direction::Up => (Axis::Y, 1),
            Direction::Down => (Axis::Y, -1),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
        };
        f.write_str(name)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Direction::Left),
            "right" | "r" => Ok(Direction::Right),
            "up" | "u" => Ok(Direction::Up),
            "down" | "d" => Ok(Direction::Down),
            other => Err(format!("unknown direction '{}' (left, right, up, down)", other)),
        }
    }
}

/// Step size presets in nanometres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPreset {
    /// 100 nm
    Smallest,
    /// 10 µm
    Small,
    /// 200 µm
    Big,
    /// 4.8 mm
    Biggest,
}

impl StepPreset {
    /// Step size in nm.
    pub fn nanometres(self) -> u32 {
        match self {
            StepPreset::Smallest => 100,
            StepPreset::Small => 10_000,
            StepPreset::Big => 200_000,
            StepPreset::Biggest => 4_800_000,
        }
    }

    /// Parse a preset name (case insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smallest" => Some(StepPreset::Smallest),
            "small" => Some(StepPreset::Small),
            "big" => Some(StepPreset::Big),
            "biggest" => Some(StepPreset::Biggest),
            _ => None,
        }
    }
}

/// Continuous jog speed presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedPreset {
    /// 50
    Slowest,
    /// 500
    Slow,
    /// 4000
    Fast,
    /// 10000
    Fastest,
}

impl SpeedPreset {
    /// Jog speed of the preset.
    pub fn speed(self) -> i32 {
        match self {
            SpeedPreset::Slowest => 50,
            SpeedPreset::Slow => 500,
            SpeedPreset::Fast => 4_000,
            SpeedPreset::Fastest => 10_000,
        }
    }

    /// Parse a preset name (case insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slowest" => Some(SpeedPreset::Slowest),
            "slow" => Some(SpeedPreset::Slow),
            "fast" => Some(SpeedPreset::Fast),
            "fastest" => Some(SpeedPreset::Fastest),
            _ => None,
        }
    }
}

/// Current jog step, speed and axis mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JogSettings {
    step_nm: u32,
    /// Continuous jog speed
    pub speed: i32,
    /// Left/right drive Y and up/down drive X
    pub swap_xy: bool,
    /// Invert X moves
    pub reverse_x: bool,
    /// Invert Y moves
    pub reverse_y: bool,
}

impl Default for JogSettings {
    fn default() -> Self {
        Self::from_config(&JogConfig::default())
    }
}

impl JogSettings {
    /// Settings from the `[jog]` configuration section.
    pub fn from_config(config: &JogConfig) -> Self {
        Self {
            step_nm: config.step_nm.clamp(MIN_STEP_NM, MAX_STEP_NM),
            speed: config.speed,
            swap_xy: config.swap_xy,
            reverse_x: config.reverse_x,
            reverse_y: config.reverse_y,
        }
    }

    /// Relative step in nm.
    pub fn step_nm(&self) -> u32 {
        self.step_nm
    }

    /// Set the relative step, rejecting values outside the controller range.
    pub fn set_step_nm(&mut self, step_nm: u32) -> SiaResult<()> {
        if !(MIN_STEP_NM..=MAX_STEP_NM).contains(&step_nm) {
            return Err(SiaError::InvalidStep(step_nm));
        }
        self.step_nm = step_nm;
        Ok(())
    }

    /// Step size in millimetres, as sent to the controller.
    pub fn step_mm(&self) -> f64 {
        f64::from(self.step_nm) / NM_PER_MM
    }

    /// Axis and sign a direction drives with the current mapping.
    pub fn resolve(&self, direction: Direction) -> (Axis, i32) {
        let (axis, sign) = direction.base();
        let axis = if self.swap_xy { axis.other() } else { axis };
        let reversed = match axis {
            Axis::X => self.reverse_x,
            Axis::Y => self.reverse_y,
        };
        (axis, if reversed { -sign } else { sign })
    }

    /// Relative move of one step.
    pub fn step_command(&self, direction: Direction) -> (Axis, Command) {
        let (axis, sign) = self.resolve(direction);
        (axis, Command::MoveRelative(f64::from(sign) * self.step_mm()))
    }

    /// Continuous open-loop jog at `speed`.
    pub fn jog_command(&self, direction: Direction, speed: i32) -> (Axis, Command) {
        let (axis, sign) = self.resolve(direction);
        (axis, Command::Jog(sign * speed.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let jog = JogSettings::default();
        assert_eq!(jog.resolve(Direction::Left), (Axis::X, -1));
        assert_eq!(jog.resolve(Direction::Right), (Axis::X, 1));
        assert_eq!(jog.resolve(Direction::Up), (Axis::Y, 1));
        assert_eq!(jog.resolve(Direction::Down), (Axis::Y, -1));
    }

    #[test]
    fn test_step_command_text() {
        let jog = JogSettings::default();
        let (axis, command) = jog.step_command(Direction::Left);
        assert_eq!(axis, Axis::X);
        assert_eq!(command.to_string(), "PR-0.010000");

        let (axis, command) = jog.step_command(Direction::Up);
        assert_eq!(axis, Axis::Y);
        assert_eq!(command.to_string(), "PR0.010000");
    }

    #[test]
    fn test_swap_and_reverse() {
        let mut jog = JogSettings {
            swap_xy: true,
            ..Default::default()
        };
        assert_eq!(jog.resolve(Direction::Left), (Axis::Y, -1));
        assert_eq!(jog.resolve(Direction::Up), (Axis::X, 1));

        jog.swap_xy = false;
        jog.reverse_y = true;
        assert_eq!(jog.resolve(Direction::Up), (Axis::Y, -1));
        assert_eq!(jog.resolve(Direction::Right), (Axis::X, 1));

        let (_, command) = jog.jog_command(Direction::Down, SpeedPreset::Fast.speed());
        assert_eq!(command, Command::Jog(4000));
    }

    #[test]
    fn test_step_range() {
        let mut jog = JogSettings::default();
        jog.set_step_nm(StepPreset::Biggest.nanometres()).unwrap();
        assert_eq!(jog.step_command(Direction::Right).1.to_string(), "PR4.800000");
        jog.set_step_nm(StepPreset::Smallest.nanometres()).unwrap();
        assert_eq!(jog.step_command(Direction::Right).1.to_string(), "PR0.000100");

        assert!(matches!(jog.set_step_nm(0), Err(SiaError::InvalidStep(0))));
        assert!(jog.set_step_nm(MAX_STEP_NM + 1).is_err());
        assert_eq!(jog.step_nm(), 100);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("L".parse::<Direction>().unwrap(), Direction::Left);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(StepPreset::parse("big"), Some(StepPreset::Big));
        assert_eq!(SpeedPreset::parse("slowest").map(SpeedPreset::speed), Some(50));
    }
}
