//! Configuration System using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults
//! 2. `sia.toml` (or an explicit path)
//! 3. Environment variables (prefixed with `SIA_`, sections split on `__`)
//!
//! # Example
//! ```no_run
//! use sia::config::SiaConfig;
//!
//! let config = SiaConfig::load()?;
//! println!("Baud rate: {}", config.serial.baud_rate);
//! # Ok::<(), sia::error::SiaError>(())
//! ```
//!
//! ```toml
//! [application]
//! log_level = "debug"
//!
//! [serial]
//! baud_rate = 115200
//! settle_delay = "1800ms"
//!
//! [axes]
//! x_port = "/dev/ttyUSB0"
//! y_port = "/dev/ttyUSB1"
//!
//! [playback]
//! move_buffer = "1s"
//!
//! [jog]
//! step_nm = 10000
//! speed = 500
//! reverse_y = true
//! ```

use crate::error::{SiaError, SiaResult};
use crate::protocol::Axis;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sia.toml";

/// Smallest accepted jog step in nanometres.
pub const MIN_STEP_NM: u32 = 1;
/// Largest accepted jog step in nanometres.
pub const MAX_STEP_NM: u32 = 4_800_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiaConfig {
    /// Application identity and log level
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Ports per axis
    #[serde(default)]
    pub axes: AxesConfig,
    /// Playback timing
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Jog defaults
    #[serde(default)]
    pub jog: JogConfig,
    /// Where the last-used ports are remembered. Defaults to the platform
    /// config directory.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Display name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "SIA - Shear Interferometer Automation".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Serial link settings shared by both axes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate for both controllers
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Wait after opening a port before the init sequence (controller reset).
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            settle_delay: default_settle_delay(),
        }
    }
}

/// Port names per axis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxesConfig {
    /// Port of the X controller
    pub x_port: Option<String>,
    /// Port of the Y controller
    pub y_port: Option<String>,
}

impl AxesConfig {
    /// Configured port for `axis`.
    pub fn port(&self, axis: Axis) -> Option<&str> {
        match axis {
            Axis::X => self.x_port.as_deref(),
            Axis::Y => self.y_port.as_deref(),
        }
    }
}

/// Routine playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Fixed wait after each move step.
    #[serde(default = "default_move_buffer", with = "humantime_serde")]
    pub move_buffer: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            move_buffer: default_move_buffer(),
        }
    }
}

/// Jog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JogConfig {
    /// Step size for relative jogs, in nanometres.
    #[serde(default = "default_step_nm")]
    pub step_nm: u32,
    /// Continuous jog speed.
    #[serde(default = "default_jog_speed")]
    pub speed: i32,
    /// Swap the axes the arrow directions drive
    #[serde(default)]
    pub swap_xy: bool,
    /// Invert the X direction
    #[serde(default)]
    pub reverse_x: bool,
    /// Invert the Y direction
    #[serde(default)]
    pub reverse_y: bool,
}

impl Default for JogConfig {
    fn default() -> Self {
        Self {
            step_nm: default_step_nm(),
            speed: default_jog_speed(),
            swap_xy: false,
            reverse_x: false,
            reverse_y: false,
        }
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(1800)
}

fn default_move_buffer() -> Duration {
    Duration::from_secs(1)
}

fn default_step_nm() -> u32 {
    10_000
}

fn default_jog_speed() -> i32 {
    500
}

impl SiaConfig {
    /// Load configuration from `sia.toml` and environment variables
    ///
    /// Environment variables override the file, e.g. `SIA_SERIAL__BAUD_RATE=921600`.
    pub fn load() -> SiaResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path. A missing file falls back
    /// to defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SiaResult<Self> {
        debug!(path = %path.as_ref().display(), "Loading configuration");
        let config: SiaConfig = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(SiaConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SIA_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SiaResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SiaError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(SiaError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }

        if !(MIN_STEP_NM..=MAX_STEP_NM).contains(&self.jog.step_nm) {
            return Err(SiaError::Configuration(format!(
                "Invalid jog.step_nm {}. Must be {}-{}",
                self.jog.step_nm, MIN_STEP_NM, MAX_STEP_NM
            )));
        }

        Ok(())
    }

    /// Resolved location of the remembered-ports file.
    pub fn state_file_path(&self) -> Option<PathBuf> {
        self.state_file
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join("sia").join("ports.toml")))
    }
}

/// Last-used serial port per axis, persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMemory {
    /// Last port used for the X axis
    pub port_x_name: Option<String>,
    /// Last port used for the Y axis
    pub port_y_name: Option<String>,
}

impl PortMemory {
    /// Remembered port for `axis`.
    pub fn port(&self, axis: Axis) -> Option<&str> {
        match axis {
            Axis::X => self.port_x_name.as_deref(),
            Axis::Y => self.port_y_name.as_deref(),
        }
    }

    /// Remember `port` for `axis`, or forget it with `None`.
    pub fn set_port(&mut self, axis: Axis, port: Option<String>) {
        match axis {
            Axis::X => self.port_x_name = port,
            Axis::Y => self.port_y_name = port,
        }
    }

    /// Read remembered ports. A missing file yields empty memory.
    pub fn load(path: &Path) -> SiaResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            SiaError::Configuration(format!("Invalid port memory {}: {}", path.display(), e))
        })
    }

    /// Write the remembered ports to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> SiaResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string(self).map_err(|e| SiaError::Configuration(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
