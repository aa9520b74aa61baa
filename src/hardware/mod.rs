//! Stage Hardware
//!
//! Serial links to the two axis controllers and a mock controller for running
//! without hardware.
//!
//! - `axis` - per-axis connection lifecycle and the `AxisPair` driven by playback
//! - `listener` - background reader forwarding controller replies
//! - `serial` - port opening and discovery (`serial` feature)
//! - `mock` - simulated controller over an in-memory stream

pub mod axis;
pub mod listener;
pub mod mock;
pub mod serial;

pub use axis::{AxisConnection, AxisPair};
pub use listener::{AxisEvent, ListenerHandle};
pub use mock::MockController;
pub use serial::PortInfo;
