//! Axis connection lifecycle
//!
//! One `AxisConnection` per stage axis. A connection owns the write half of
//! its serial link and the echo listener reading the other half:
//!
//! ```text
//! connect ──> open port ──> settle ──> init sequence ──> listener running
//!    │                                                        │
//!    └──────────── error: axis stays closed        disconnect ┘
//! ```
//!
//! Both axes live in an `AxisPair`, which is what routine playback drives.

use crate::error::{SiaError, SiaResult};
use crate::hardware::listener::{spawn_listener, AxisEvent, ListenerHandle};
use crate::playback::StepExecutor;
use crate::protocol::{Axis, Command};
use crate::routine::AxisTarget;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serial link to one axis controller.
pub struct AxisConnection {
    axis: Axis,
    port_name: Option<String>,
    baud_rate: u32,
    writer: Option<BoxedWriter>,
    listener: Option<ListenerHandle>,
}

impl std::fmt::Debug for AxisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisConnection")
            .field("axis", &self.axis)
            .field("port_name", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.is_open())
            .finish()
    }
}

impl AxisConnection {
    /// Closed connection for `axis`.
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            port_name: None,
            baud_rate: 0,
            writer: None,
            listener: None,
        }
    }

    /// Axis this link drives.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Port of the current (or last) link.
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Baud rate of the last open.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Whether a link is open.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Open a serial port, wait for the controller to come up, send the init
    /// sequence and start the echo listener.
    ///
    /// On failure the connection stays closed.
    #[cfg(feature = "serial")]
    pub async fn connect(
        &mut self,
        port_name: &str,
        baud_rate: u32,
        settle_delay: Duration,
        events: mpsc::UnboundedSender<AxisEvent>,
    ) -> SiaResult<()> {
        self.disconnect().await;

        let stream = crate::hardware::serial::open(self.axis, port_name, baud_rate)?;
        // Controller resets when the port opens
        tokio::time::sleep(settle_delay).await;

        self.attach(port_name, baud_rate, stream, events).await
    }

    /// Always fails: built without the `serial` feature.
    #[cfg(not(feature = "serial"))]
    pub async fn connect(
        &mut self,
        _port_name: &str,
        _baud_rate: u32,
        _settle_delay: Duration,
        _events: mpsc::UnboundedSender<AxisEvent>,
    ) -> SiaResult<()> {
        Err(SiaError::SerialFeatureDisabled)
    }

    /// Bring the axis up over an already open byte stream.
    ///
    /// Sends the init sequence and starts the listener. If the init sequence
    /// cannot be written the link is torn down again.
    pub async fn attach<S>(
        &mut self,
        port_name: &str,
        baud_rate: u32,
        stream: S,
        events: mpsc::UnboundedSender<AxisEvent>,
    ) -> SiaResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.disconnect().await;

        let (reader, writer) = tokio::io::split(stream);
        self.writer = Some(Box::new(writer));
        self.port_name = Some(port_name.to_string());
        self.baud_rate = baud_rate;

        if let Err(e) = self.initialize().await {
            warn!(axis = %self.axis, port = port_name, "Init sequence failed: {}", e);
            self.writer = None;
            return Err(e);
        }

        self.listener = Some(spawn_listener(self.axis, reader, events));
        info!(axis = %self.axis, port = port_name, baud_rate, "Axis connected");
        Ok(())
    }

    async fn initialize(&mut self) -> SiaResult<()> {
        for command in Command::init_sequence() {
            self.send(&command).await?;
        }
        Ok(())
    }

    /// Write one command.
    pub async fn send(&mut self, command: &Command) -> SiaResult<()> {
        let axis = self.axis;
        let writer = self
            .writer
            .as_mut()
            .ok_or(SiaError::AxisNotConnected(axis))?;

        writer.write_all(command.encode().as_bytes()).await?;
        writer.flush().await?;
        debug!(axis = %axis, "Sent {}", command);
        Ok(())
    }

    /// Close the link. Idempotent.
    pub async fn disconnect(&mut self) {
        let was_open = self.writer.is_some();
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(listener) = self.listener.take() {
            listener.stop().await;
        }
        if was_open {
            info!(axis = %self.axis, port = ?self.port_name, "Axis disconnected");
        }
    }

    /// Drop the link if the listener saw the port go away.
    pub fn mark_closed(&mut self) {
        if self.writer.take().is_some() {
            warn!(axis = %self.axis, port = ?self.port_name, "Serial link closed by device");
        }
    }
}

/// The X and Y connections of one stage.
#[derive(Debug)]
pub struct AxisPair {
    x: AxisConnection,
    y: AxisConnection,
}

impl Default for AxisPair {
    fn default() -> Self {
        Self::new()
    }
}

impl AxisPair {
    /// Both axes closed.
    pub fn new() -> Self {
        Self {
            x: AxisConnection::new(Axis::X),
            y: AxisConnection::new(Axis::Y),
        }
    }

    /// Connection of `axis`.
    pub fn get(&self, axis: Axis) -> &AxisConnection {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    /// Mutable connection of `axis`.
    pub fn get_mut(&mut self, axis: Axis) -> &mut AxisConnection {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
        }
    }

    /// Send to an axis if it is open. Returns whether the command went out.
    pub async fn send_if_open(&mut self, axis: Axis, command: &Command) -> SiaResult<bool> {
        let connection = self.get_mut(axis);
        if !connection.is_open() {
            warn!(axis = %axis, "Axis not connected, skipping {}", command);
            return Ok(false);
        }
        connection.send(command).await?;
        Ok(true)
    }

    /// Close both axes.
    pub async fn disconnect_all(&mut self) {
        self.x.disconnect().await;
        self.y.disconnect().await;
    }
}

#[async_trait]
impl StepExecutor for AxisPair {
    async fn move_to(&mut self, x: &AxisTarget, y: &AxisTarget) -> SiaResult<()> {
        for (axis, target) in [(Axis::X, x), (Axis::Y, y)] {
            if let Some(command) = target.command() {
                self.send_if_open(axis, &command).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_attach_sends_init_sequence() {
        let (mut device, host) = tokio::io::duplex(256);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut axis = AxisConnection::new(Axis::X);

        axis.attach("mock-x", 115_200, host, tx).await.unwrap();
        assert!(axis.is_open());
        assert_eq!(axis.port_name(), Some("mock-x"));

        let mut buf = vec![0u8; 64];
        let mut received = String::new();
        while !received.ends_with("RFP\r\n") {
            let n = device.read(&mut buf).await.unwrap();
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        assert_eq!(received, "OR\r\nMM0\r\nSR48\r\nSL0\r\nMM1\r\nOR\r\nRFP\r\n");

        axis.disconnect().await;
        assert!(!axis.is_open());
        // Second disconnect is a no-op
        axis.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_on_closed_axis_fails() {
        let mut axis = AxisConnection::new(Axis::Y);
        let err = axis.send(&Command::Stop).await.unwrap_err();
        assert!(matches!(err, SiaError::AxisNotConnected(Axis::Y)));
    }

    #[tokio::test]
    async fn test_pair_skips_closed_axis() {
        let mut pair = AxisPair::new();
        let sent = pair.send_if_open(Axis::X, &Command::QueryPosition).await.unwrap();
        assert!(!sent);

        pair.move_to(
            &AxisTarget::Recorded("PA1".into()),
            &AxisTarget::NotAvailable,
        )
        .await
        .unwrap();
    }
}
