//! Operator session.
//!
//! A `Session` is the single owner of everything an operator works with: the
//! two axis connections, the routine being edited, the last position reported
//! by each axis, the jog settings and the playback engine.
//!
//! ## Event flow
//!
//! Each open axis runs a listener task that forwards controller replies on one
//! channel. The session consumes that channel (`next_event` / `drain_events`)
//! and feeds every event through `handle_event`. A position echo updates the
//! last known position of its axis and appends a `Position N` step, so
//! "save position" is simply `request_positions` followed by handling the
//! replies.
//!
//! ## Remembered ports
//!
//! Ports opened with `connect` are remembered per axis (`port_x_name`,
//! `port_y_name`) and written to the state file on `shutdown`.

use crate::config::{PortMemory, SiaConfig};
use crate::error::SiaResult;
use crate::hardware::{AxisEvent, AxisPair};
use crate::jog::{Direction, JogSettings};
use crate::playback::{PlaybackControl, PlaybackEngine, PlaybackEvent, PlaybackState, PlaybackStatus};
use crate::protocol::{Axis, Command};
use crate::routine::{file, AxisTarget, Routine, Step};
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Last position reply per axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastPositions {
    /// Last `PA` echo of the X axis
    pub x: Option<String>,
    /// Last `PA` echo of the Y axis
    pub y: Option<String>,
}

impl LastPositions {
    /// Last echo of `axis`, if any.
    pub fn get(&self, axis: Axis) -> Option<&str> {
        match axis {
            Axis::X => self.x.as_deref(),
            Axis::Y => self.y.as_deref(),
        }
    }

    fn set(&mut self, axis: Axis, reply: String) {
        match axis {
            Axis::X => self.x = Some(reply),
            Axis::Y => self.y = Some(reply),
        }
    }

    fn targets(&self) -> (AxisTarget, AxisTarget) {
        (self.x.clone().into(), self.y.clone().into())
    }
}

/// Everything one operator works with, see the module docs.
pub struct Session {
    config: SiaConfig,
    axes: AxisPair,
    routine: Routine,
    positions: LastPositions,
    jog: JogSettings,
    engine: PlaybackEngine,
    port_memory: PortMemory,
    events_tx: mpsc::UnboundedSender<AxisEvent>,
    events_rx: mpsc::UnboundedReceiver<AxisEvent>,
}

impl Session {
    /// Create a session with both axes closed and an empty routine.
    ///
    /// Remembered ports are read from the configured state file; an unreadable
    /// file is logged and ignored.
    pub fn new(config: SiaConfig) -> Self {
        let port_memory = match config.state_file_path() {
            Some(path) => PortMemory::load(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), "Ignoring remembered ports: {}", e);
                PortMemory::default()
            }),
            None => PortMemory::default(),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            jog: JogSettings::from_config(&config.jog),
            engine: PlaybackEngine::new(config.playback.move_buffer),
            axes: AxisPair::new(),
            routine: Routine::new(),
            positions: LastPositions::default(),
            port_memory,
            events_tx,
            events_rx,
            config,
        }
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &SiaConfig {
        &self.config
    }

    /// Routine being edited.
    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    /// Mutable access for editing commands.
    pub fn routine_mut(&mut self) -> &mut Routine {
        &mut self.routine
    }

    /// Last position echoed by each axis.
    pub fn positions(&self) -> &LastPositions {
        &self.positions
    }

    /// Current jog presets.
    pub fn jog_settings(&self) -> &JogSettings {
        &self.jog
    }

    /// Mutable jog presets.
    pub fn jog_settings_mut(&mut self) -> &mut JogSettings {
        &mut self.jog
    }

    /// Whether `axis` has an open link.
    pub fn is_connected(&self, axis: Axis) -> bool {
        self.axes.get(axis).is_open()
    }

    /// Port of the open link on `axis`.
    pub fn port_name(&self, axis: Axis) -> Option<&str> {
        self.axes.get(axis).port_name()
    }

    /// Port to use for `axis` when none is given: configuration first, then
    /// the one remembered from the last session.
    pub fn default_port(&self, axis: Axis) -> Option<String> {
        self.config
            .axes
            .port(axis)
            .or_else(|| self.port_memory.port(axis))
            .map(str::to_string)
    }

    /// Ports remembered across sessions.
    pub fn port_memory(&self) -> &PortMemory {
        &self.port_memory
    }

    // --- connections ---

    /// Open `port_name` for `axis` and initialize the controller.
    ///
    /// An already open link on that axis is closed first. On failure the axis
    /// stays closed.
    pub async fn connect(&mut self, axis: Axis, port_name: &str) -> SiaResult<()> {
        self.disconnect(axis).await;
        let serial = &self.config.serial;
        self.axes
            .get_mut(axis)
            .connect(
                port_name,
                serial.baud_rate,
                serial.settle_delay,
                self.events_tx.clone(),
            )
            .await?;
        self.port_memory.set_port(axis, Some(port_name.to_string()));
        Ok(())
    }

    /// Bring `axis` up over an already open stream (mock controller, tests).
    pub async fn attach<S>(&mut self, axis: Axis, port_name: &str, stream: S) -> SiaResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.disconnect(axis).await;
        let baud_rate = self.config.serial.baud_rate;
        self.axes
            .get_mut(axis)
            .attach(port_name, baud_rate, stream, self.events_tx.clone())
            .await
    }

    /// Close `axis`. Idempotent.
    pub async fn disconnect(&mut self, axis: Axis) {
        self.axes.get_mut(axis).disconnect().await;
        // The stopped listener already queued its last events; settle them now
        // so a stale `Closed` cannot hit a later link.
        self.drain_events();
    }

    // --- echo events ---

    /// Wait for the next controller event. Handling it is up to the caller.
    pub async fn next_event(&mut self) -> Option<AxisEvent> {
        self.events_rx.recv().await
    }

    /// Handle every event already queued. Returns how many were handled.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Apply one controller event. Returns the step appended, if any.
    pub fn handle_event(&mut self, event: AxisEvent) -> Option<&Step> {
        match event {
            AxisEvent::Position { axis, reply } => {
                info!(axis = %axis, "Position {}", reply);
                self.positions.set(axis, reply);
                let (x, y) = self.positions.targets();
                Some(self.routine.push_position(x, y))
            }
            AxisEvent::Line { axis, text } => {
                debug!(axis = %axis, "Device says {}", text);
                None
            }
            AxisEvent::Closed { axis } => {
                self.axes.get_mut(axis).mark_closed();
                None
            }
        }
    }

    // --- jogging ---

    /// Relative step in `direction`. Returns whether the command was sent.
    pub async fn jog(&mut self, direction: Direction) -> SiaResult<bool> {
        let (axis, command) = self.jog.step_command(direction);
        self.axes.send_if_open(axis, &command).await
    }

    /// Continuous jog; `speed` defaults to the configured jog speed.
    pub async fn start_jog(&mut self, direction: Direction, speed: Option<i32>) -> SiaResult<bool> {
        let speed = speed.unwrap_or(self.jog.speed);
        let (axis, command) = self.jog.jog_command(direction, speed);
        self.axes.send_if_open(axis, &command).await
    }

    /// Stop any motion on `axis`.
    pub async fn stop_jog(&mut self, axis: Axis) -> SiaResult<bool> {
        self.axes.send_if_open(axis, &Command::Stop).await
    }

    /// Switch `axis` to open-loop mode.
    pub async fn open_loop(&mut self, axis: Axis) -> SiaResult<bool> {
        self.axes.send_if_open(axis, &Command::OpenLoop).await
    }

    /// Set the up and down step amplitudes of `axis`.
    pub async fn set_step_amplitude(&mut self, axis: Axis, up: i32, down: i32) -> SiaResult<bool> {
        self.axes
            .send_if_open(axis, &Command::StepAmplitude(up, down))
            .await
    }

    /// Ask every open axis for its position. Replies arrive as events.
    /// Returns the number of axes queried.
    pub async fn request_positions(&mut self) -> SiaResult<usize> {
        let mut queried = 0;
        for axis in Axis::ALL {
            if self.axes.get(axis).is_open() {
                self.axes.get_mut(axis).send(&Command::QueryPosition).await?;
                queried += 1;
            } else {
                debug!(axis = %axis, "Axis closed, position not requested");
            }
        }
        Ok(queried)
    }

    // --- routine ---

    /// Discard the current routine.
    pub fn new_routine(&mut self) {
        self.routine.clear();
    }

    /// Replace the routine with the one in `path`. On error the current routine
    /// is kept.
    pub fn load_routine(&mut self, path: &Path) -> SiaResult<()> {
        self.routine = file::load(path)?;
        Ok(())
    }

    /// Write the routine to `path`.
    pub fn save_routine(&self, path: &Path) -> SiaResult<()> {
        file::save(&self.routine, path)
    }

    // --- playback ---

    /// Play the routine on the connected axes.
    ///
    /// A stop left over from an earlier run is discarded when this is called.
    /// A stop requested after that, even before the returned future is first
    /// polled, cancels the run before its first step.
    pub fn run_routine(&mut self) -> impl Future<Output = SiaResult<PlaybackState>> + '_ {
        let control = self.engine.control();
        if !control.is_running() {
            control.clear_stop();
        }
        self.engine.run(&self.routine, &mut self.axes)
    }

    /// Stop handle for the playback engine.
    pub fn playback_control(&self) -> PlaybackControl {
        self.engine.control()
    }

    /// Current playback status.
    pub fn playback_status(&self) -> PlaybackStatus {
        self.engine.status()
    }

    /// Route playback progress events to `events`.
    pub fn set_playback_events(&mut self, events: Option<mpsc::UnboundedSender<PlaybackEvent>>) {
        self.engine.set_events(events);
    }

    /// Close both axes and persist the remembered ports.
    pub async fn shutdown(&mut self) {
        self.axes.disconnect_all().await;
        self.drain_events();

        if let Some(path) = self.config.state_file_path() {
            match self.port_memory.save(&path) {
                Ok(()) => debug!(path = %path.display(), "Saved remembered ports"),
                Err(e) => warn!(path = %path.display(), "Failed to save remembered ports: {}", e),
            }
        }
        info!("Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> SiaConfig {
        SiaConfig {
            state_file: Some(dir.join("ports.toml")),
            ..Default::default()
        }
    }

    #[test]
    fn test_position_events_build_steps() {
        let dir = tempdir().unwrap();
        let mut session = Session::new(config_in(dir.path()));

        let step = session
            .handle_event(AxisEvent::Position {
                axis: Axis::X,
                reply: "PA1.000000".into(),
            })
            .cloned()
            .unwrap();
        assert_eq!(step.label, "Position 1");
        assert_eq!(
            step.kind,
            crate::routine::StepKind::Move {
                x: AxisTarget::Recorded("PA1.000000".into()),
                y: AxisTarget::NotAvailable,
            }
        );

        session.handle_event(AxisEvent::Position {
            axis: Axis::Y,
            reply: "PA2.000000".into(),
        });
        let second = session.routine().get(1).unwrap();
        assert_eq!(
            second.kind,
            crate::routine::StepKind::Move {
                x: AxisTarget::Recorded("PA1.000000".into()),
                y: AxisTarget::Recorded("PA2.000000".into()),
            }
        );

        assert!(session
            .handle_event(AxisEvent::Line {
                axis: Axis::X,
                text: "OK".into()
            })
            .is_none());
        assert_eq!(session.routine().len(), 2);
    }

    #[tokio::test]
    async fn test_commands_to_closed_axes_are_skipped() {
        let dir = tempdir().unwrap();
        let mut session = Session::new(config_in(dir.path()));

        assert!(!session.jog(Direction::Left).await.unwrap());
        assert!(!session.stop_jog(Axis::Y).await.unwrap());
        assert_eq!(session.request_positions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_remembers_ports() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let path = config.state_file_path().unwrap();

        let mut session = Session::new(config.clone());
        session.port_memory.set_port(Axis::Y, Some("/dev/ttyUSB1".into()));
        session.shutdown().await;

        let session = Session::new(config);
        assert_eq!(session.default_port(Axis::Y).as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(session.default_port(Axis::X), None);
        assert!(path.exists());
    }
}
