//! Per-axis echo listener
//!
//! Each open axis owns one reader task. The task reads whatever bytes the
//! controller sends, splits them into lines and forwards every line on a
//! channel shared by both axes. Position echoes (`PA...`) are tagged so the
//! session can record them without re-parsing.

use crate::protocol::{Axis, LineSplitter, Reply};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Something an axis controller said, or the end of its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisEvent {
    /// Reply containing a position (`PA...`)
    Position {
        /// Axis that replied
        axis: Axis,
        /// Trimmed reply, replayed verbatim as a move target
        reply: String,
    },
    /// Any other non-empty line
    Line {
        /// Axis that replied
        axis: Axis,
        /// Trimmed line
        text: String,
    },
    /// The reader stopped on a closed port, a read error or a disconnect
    Closed {
        /// Axis whose link ended
        axis: Axis,
    },
}

impl AxisEvent {
    /// Axis the event came from.
    pub fn axis(&self) -> Axis {
        match self {
            AxisEvent::Position { axis, .. }
            | AxisEvent::Line { axis, .. }
            | AxisEvent::Closed { axis } => *axis,
        }
    }
}

/// Handle to a running listener task.
#[derive(Debug)]
pub struct ListenerHandle {
    axis: Axis,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop the reader and wait for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(axis = %self.axis, "Listener task ended abnormally: {}", e);
        }
    }
}

/// Spawn the reader task for one axis.
pub fn spawn_listener<R>(
    axis: Axis,
    reader: R,
    events: mpsc::UnboundedSender<AxisEvent>,
) -> ListenerHandle
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(listen(axis, reader, events, shutdown_rx));
    ListenerHandle {
        axis,
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

async fn listen<R>(
    axis: Axis,
    mut reader: R,
    events: mpsc::UnboundedSender<AxisEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut buffer = [0u8; 256];

    debug!(axis = %axis, "Echo listener started");
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            read = reader.read(&mut buffer) => match read {
                Ok(0) => {
                    debug!(axis = %axis, "Serial link reached EOF");
                    break;
                }
                Ok(n) => {
                    for line in splitter.push(&buffer[..n]) {
                        debug!(axis = %axis, "Device says {}", line);
                        let event = match Reply::parse(&line) {
                            Some(Reply::Position(reply)) => AxisEvent::Position { axis, reply },
                            Some(Reply::Other(text)) => AxisEvent::Line { axis, text },
                            None => continue,
                        };
                        if events.send(event).is_err() {
                            // Nobody is listening anymore
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(axis = %axis, "Serial read error: {}", e);
                    break;
                }
            },
        }
    }

    let _ = events.send(AxisEvent::Closed { axis });
    debug!(axis = %axis, "Echo listener stopped");
}
