//! # SIA - Shear Interferometer Automation
//!
//! Control library for a two-axis motorized stage driven over two independent
//! serial links. An operator jogs the axes, records positions and timed delays
//! as a routine, saves the routine to a text file and plays it back with
//! progress reporting and cooperative cancellation.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: controller commands, reply classification and line splitting.
//! - **`hardware`**: per-axis serial connections, the echo listener task and a
//!   mock controller for running without a stage.
//! - **`routine`**: steps, delays, the routine list and its file format.
//! - **`playback`**: the `PlaybackEngine` state machine and progress events.
//! - **`jog`**: direction mapping, step and speed presets.
//! - **`session`**: the `Session` context that owns all of the above.
//! - **`shell`**: the line-oriented operator shell used by the `sia` binary.
//! - **`config`**: layered configuration (defaults, `sia.toml`, `SIA_*` env).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: the `SiaError` type shared by every module.

pub mod config;
pub mod error;
pub mod hardware;
pub mod jog;
pub mod logging;
pub mod playback;
pub mod protocol;
pub mod routine;
pub mod session;
pub mod shell;

pub use error::{SiaError, SiaResult};
pub use session::Session;
