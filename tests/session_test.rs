//! Integration tests for the operator session
//!
//! Both axes are attached to simulated controllers, so these tests exercise
//! the real connection, listener, jog and playback paths end to end.

use sia::config::SiaConfig;
use sia::hardware::{AxisEvent, MockController};
use sia::jog::Direction;
use sia::playback::PlaybackState;
use sia::protocol::Axis;
use sia::routine::{AxisTarget, StepKind};
use sia::Session;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::timeout;
use tokio_test::assert_ok;

const INIT_SEQUENCE: [&str; 7] = ["OR", "MM0", "SR48", "SL0", "MM1", "OR", "RFP"];

fn config(dir: &Path) -> SiaConfig {
    let mut config = SiaConfig {
        state_file: Some(dir.join("ports.toml")),
        ..Default::default()
    };
    config.playback.move_buffer = Duration::from_millis(20);
    config
}

async fn attach_mocks(session: &mut Session) -> (MockController, MockController) {
    let (x, x_stream) = MockController::spawn(Axis::X);
    let (y, y_stream) = MockController::spawn(Axis::Y);
    assert_ok!(session.attach(Axis::X, "mock-x", x_stream).await);
    assert_ok!(session.attach(Axis::Y, "mock-y", y_stream).await);
    (x, y)
}

/// Wait until the mock has received at least `count` lines.
async fn received(mock: &MockController, count: usize) -> Vec<String> {
    let wait = async {
        loop {
            let lines = mock.received().await;
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    assert_ok!(timeout(Duration::from_secs(2), wait).await)
}

/// Handle controller events until `count` position echoes were seen.
async fn handle_positions(session: &mut Session, count: usize) {
    let mut seen = 0;
    while seen < count {
        let event = assert_ok!(timeout(Duration::from_secs(2), session.next_event()).await)
            .expect("event channel closed");
        if matches!(event, AxisEvent::Position { .. }) {
            seen += 1;
        }
        session.handle_event(event);
    }
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test]
async fn test_attach_sends_init_sequence() {
    let dir = tempdir().unwrap();
    let mut session = Session::new(config(dir.path()));
    let (x, y) = attach_mocks(&mut session).await;

    assert_eq!(received(&x, 7).await, INIT_SEQUENCE);
    assert_eq!(received(&y, 7).await, INIT_SEQUENCE);
    assert!(session.is_connected(Axis::X));
    assert_eq!(session.port_name(Axis::Y), Some("mock-y"));
}

#[tokio::test]
async fn test_reconnect_is_not_closed_by_old_link() {
    let dir = tempdir().unwrap();
    let mut session = Session::new(config(dir.path()));
    let (_x, _y) = attach_mocks(&mut session).await;

    session.disconnect(Axis::X).await;
    assert!(!session.is_connected(Axis::X));
    // Second disconnect is a no-op
    session.disconnect(Axis::X).await;

    let (fresh, stream) = MockController::spawn(Axis::X);
    assert_ok!(session.attach(Axis::X, "mock-x2", stream).await);
    session.drain_events();
    assert!(session.is_connected(Axis::X));

    assert!(assert_ok!(session.jog(Direction::Right).await));
    let lines = received(&fresh, 8).await;
    assert_eq!(lines.last().map(String::as_str), Some("PR0.010000"));
}

#[tokio::test]
async fn test_device_hangup_closes_axis() {
    let dir = tempdir().unwrap();
    let mut session = Session::new(config(dir.path()));
    let (x, _y) = attach_mocks(&mut session).await;
    received(&x, 7).await;

    drop(x);
    let event = assert_ok!(timeout(Duration::from_secs(2), session.next_event()).await);
    assert_eq!(event, Some(AxisEvent::Closed { axis: Axis::X }));
    session.handle_event(AxisEvent::Closed { axis: Axis::X });
    assert!(!session.is_connected(Axis::X));
    assert!(session.is_connected(Axis::Y));
}

#[cfg(feature = "serial")]
#[tokio::test]
async fn test_connect_to_missing_port_leaves_axis_closed() {
    let dir = tempdir().unwrap();
    let mut session = Session::new(config(dir.path()));

    let err = session
        .connect(Axis::Y, "/dev/does-not-exist-sia")
        .await
        .unwrap_err();
    assert!(matches!(err, sia::SiaError::Connection { axis: Axis::Y, .. }));
    assert!(!session.is_connected(Axis::Y));
    assert_eq!(session.port_memory().port(Axis::Y), None);
}

// =============================================================================
// Position echoes and jogging
// =============================================================================

#[tokio::test]
async fn test_position_echoes_append_steps() {
    let dir = tempdir().unwrap();
    let mut session = Session::new(config(dir.path()));
    let (x, y) = attach_mocks(&mut session).await;
    received(&x, 7).await;
    received(&y, 7).await;

    assert_eq!(assert_ok!(session.request_positions().await), 2);
    handle_positions(&mut session, 2).await;

    let routine = session.routine();
    assert_eq!(routine.len(), 2);
    assert_eq!(routine.get(0).unwrap().label, "Position 1");
    assert_eq!(routine.get(1).unwrap().label, "Position 2");
    assert_eq!(
        routine.get(1).unwrap().kind,
        StepKind::Move {
            x: AxisTarget::Recorded("PA0.000000".into()),
            y: AxisTarget::Recorded("PA0.000000".into()),
        }
    );
}

#[tokio::test]
async fn test_jog_commands_reach_the_right_axis() {
    let dir = tempdir().unwrap();
    let mut session = Session::new(config(dir.path()));
    let (x, y) = attach_mocks(&mut session).await;

    assert_ok!(session.jog(Direction::Left).await);
    assert_ok!(session.jog(Direction::Down).await);
    assert_ok!(session.start_jog(Direction::Up, None).await);
    assert_ok!(session.stop_jog(Axis::Y).await);
    assert_ok!(session.open_loop(Axis::X).await);
    assert_ok!(session.set_step_amplitude(Axis::X, 30, 40).await);

    assert_eq!(&received(&x, 10).await[7..], ["PR-0.010000", "OL", "XU30,40"]);
    assert_eq!(&received(&y, 10).await[7..], ["PR-0.010000", "JA500", "ST"]);
    assert!((x.position().await + 0.01).abs() < 1e-9);
}

// =============================================================================
// Playback and persistence
// =============================================================================

#[tokio::test]
async fn test_recorded_routine_replays_positions() {
    let dir = tempdir().unwrap();
    let mut session = Session::new(config(dir.path()));
    let (x, y) = attach_mocks(&mut session).await;

    // Record (0, 0), jog away, record (0.01, 0.01), jog further away
    assert_ok!(session.request_positions().await);
    handle_positions(&mut session, 2).await;
    assert_ok!(session.jog(Direction::Right).await);
    assert_ok!(session.jog(Direction::Up).await);
    assert_ok!(session.request_positions().await);
    handle_positions(&mut session, 2).await;
    assert_ok!(session.jog(Direction::Right).await);
    assert_ok!(session.jog(Direction::Up).await);

    // Keep the first pair and the last pair of echoes
    assert_ok!(session.routine_mut().remove(2));
    assert_ok!(session.routine_mut().remove(0));
    assert_eq!(session.routine().len(), 2);

    let state = assert_ok!(session.run_routine().await);
    assert_eq!(state, PlaybackState::Completed);

    let x_lines = x.received().await;
    assert_eq!(x_lines.last().map(String::as_str), Some("PA0.010000"));
    assert!((x.position().await - 0.01).abs() < 1e-9);
    assert!((y.position().await - 0.01).abs() < 1e-9);
}

#[tokio::test]
async fn test_save_and_load_through_session() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scan.sia");
    let mut session = Session::new(config(dir.path()));
    let (_x, _y) = attach_mocks(&mut session).await;

    assert_ok!(session.request_positions().await);
    handle_positions(&mut session, 2).await;
    assert_ok!(session
        .routine_mut()
        .push_delay(sia::routine::DelayLength::seconds(2)));
    assert_ok!(session.save_routine(&path));

    let saved = session.routine().clone();
    session.new_routine();
    assert!(session.routine().is_empty());

    assert_ok!(session.load_routine(&path));
    assert_eq!(session.routine().steps(), saved.steps());

    // A file without the marker leaves the routine untouched
    let bogus = dir.path().join("bogus.txt");
    std::fs::write(&bogus, "hello\r").unwrap();
    assert!(session.load_routine(&bogus).is_err());
    assert_eq!(session.routine().len(), 3);
}

#[tokio::test]
async fn test_stop_between_start_and_first_poll_cancels_run() {
    let dir = tempdir().unwrap();
    let mut session = Session::new(config(dir.path()));
    let (x, _y) = attach_mocks(&mut session).await;
    assert_ok!(session.request_positions().await);
    handle_positions(&mut session, 2).await;

    // A stale stop from before the run is discarded
    let control = session.playback_control();
    control.request_stop();
    let state = assert_ok!(session.run_routine().await);
    assert_eq!(state, PlaybackState::Completed);
    let moves_before = x.received().await.iter().filter(|l| l.starts_with("PA")).count();

    let state = {
        let run = session.run_routine();
        control.request_stop();
        run.await
    };
    assert_eq!(assert_ok!(state), PlaybackState::Cancelled);
    assert_eq!(session.playback_status().steps_executed, 0);
    let moves_after = x.received().await.iter().filter(|l| l.starts_with("PA")).count();
    assert_eq!(moves_after, moves_before);
}
