//! Mock Axis Controller
//!
//! Simulates one stage controller on the far end of an in-memory byte stream
//! so the session, jog and playback paths can run without hardware.
//! All timing uses tokio::time::sleep, so tests with a paused clock stay fast.
//!
//! # Behaviour
//!
//! - `PA?` - replies `PA<position>` with six decimals
//! - `PR<v>` - adds `v` to the position
//! - `PA<v>` - sets the position to `v`
//! - `OR` - homes to 0.0
//! - anything else is recorded and otherwise ignored
//!
//! # Example
//!
//! ```rust,ignore
//! let (controller, stream) = MockController::spawn(Axis::X);
//! session.attach(Axis::X, "mock-x", stream).await?;
//! assert_eq!(controller.received().await[0], "OR");
//! ```

use crate::protocol::{Axis, LineSplitter, LINE_TERMINATOR};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

const STREAM_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct MockState {
    received: Vec<String>,
    position: f64,
}

/// Simulated axis controller.
///
/// The device task stops when the host side of the stream is dropped or when
/// the controller itself is dropped.
#[derive(Debug)]
pub struct MockController {
    state: Arc<RwLock<MockState>>,
    task: JoinHandle<()>,
}

impl MockController {
    /// Start a controller that answers immediately.
    ///
    /// Returns the controller and the host end of the link.
    pub fn spawn(axis: Axis) -> (Self, DuplexStream) {
        Self::with_latency(axis, Duration::ZERO)
    }

    /// Start a controller that waits `latency` before each reply.
    pub fn with_latency(axis: Axis, latency: Duration) -> (Self, DuplexStream) {
        let (host, device) = tokio::io::duplex(STREAM_BUFFER);
        let state = Arc::new(RwLock::new(MockState::default()));
        let task = tokio::spawn(run_device(axis, device, state.clone(), latency));
        (Self { state, task }, host)
    }

    /// Every command line received so far, without terminators.
    pub async fn received(&self) -> Vec<String> {
        self.state.read().await.received.clone()
    }

    /// Current simulated position in mm.
    pub async fn position(&self) -> f64 {
        self.state.read().await.position
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_device(
    axis: Axis,
    mut device: DuplexStream,
    state: Arc<RwLock<MockState>>,
    latency: Duration,
) {
    let mut splitter = LineSplitter::new();
    let mut buffer = [0u8; 256];

    loop {
        let n = match device.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        for line in splitter.push(&buffer[..n]) {
            trace!(axis = %axis, "Mock received {}", line);
            let reply = {
                let mut state = state.write().await;
                state.received.push(line.clone());
                apply(&mut state, &line)
            };

            if let Some(reply) = reply {
                if !latency.is_zero() {
                    sleep(latency).await;
                }
                let wire = format!("{}{}", reply, LINE_TERMINATOR);
                if device.write_all(wire.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
    debug!(axis = %axis, "Mock controller link closed");
}

fn apply(state: &mut MockState, line: &str) -> Option<String> {
    if line == "PA?" {
        return Some(format!("PA{:.6}", state.position));
    }
    if line == "OR" {
        state.position = 0.0;
    } else if let Some(value) = line.strip_prefix("PR").and_then(|v| v.parse::<f64>().ok()) {
        state.position += value;
    } else if let Some(value) = line.strip_prefix("PA").and_then(|v| v.parse::<f64>().ok()) {
        state.position = value;
    }
    None
}
