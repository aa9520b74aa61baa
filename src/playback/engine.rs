//! PlaybackEngine for replaying routines.
//!
//! The engine walks a snapshot of the routine, repetition by repetition, and
//! hands move steps to a `StepExecutor` (the axis pair in production, a
//! recorder in tests). Delay steps only wait.
//!
//! ```text
//! Routine snapshot → PlaybackEngine → StepExecutor → AxisPair → serial links
//!                          │
//!                          └──> PlaybackEvent channel (status display)
//! ```
//!
//! Stop requests are cooperative: the loop checks the flag before each step,
//! so a step that already started always runs to its end. A stop requested
//! before the run is first polled still applies to it; the flag is cleared
//! when a run ends.

use super::progress;
use super::state::{PlaybackState, PlaybackStatus};
use crate::error::{SiaError, SiaResult};
use crate::routine::{AxisTarget, Routine, Step, StepKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shown as the next step after the last one of a pass.
pub const NO_NEXT_STEP: &str = "--";

/// Something that can carry out a move step.
#[async_trait]
pub trait StepExecutor: Send {
    /// Send the recorded targets to their axes. Unrecorded targets are skipped.
    async fn move_to(&mut self, x: &AxisTarget, y: &AxisTarget) -> SiaResult<()>;
}

/// Progress notifications for status displays.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// A run began.
    Started {
        /// Identifier of this run
        run_id: Uuid,
        /// Number of passes
        repetitions: u32,
        /// Steps per pass
        steps: usize,
        /// Estimated duration of all passes
        estimated: Duration,
    },
    /// A step is about to execute.
    StepStarted {
        /// One-based, for display as "N of R"
        repetition: u32,
        /// Number of passes
        repetitions: u32,
        /// Zero-based step index within the pass
        index: usize,
        /// "Moving to ..." or the delay label
        now: String,
        /// Label of the following step or `--`
        next: String,
    },
    /// A step finished.
    Progress {
        /// Elapsed share of the estimate, below 1.0 until completion
        fraction: f64,
        /// Estimated time still to go
        remaining: Duration,
    },
    /// The run ended.
    Finished {
        /// Final state
        state: PlaybackState,
    },
}

/// Cloneable stop handle shared between the engine and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct PlaybackControl {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl PlaybackControl {
    /// Handle with no stop requested and no run active.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running playback to stop at the next step boundary.
    pub fn request_stop(&self) {
        if self.is_running() {
            info!("Playback stop requested");
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a stop is pending.
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Forget a pending stop request.
    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    /// Whether a run holds this handle.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the running flag. Fails if another run holds it.
    fn begin(&self) -> SiaResult<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SiaError::PlaybackBusy)?;
        Ok(RunningGuard(self.clone()))
    }
}

/// Clears the stop request and releases the running flag when a run ends,
/// including when its future is dropped.
struct RunningGuard(PlaybackControl);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.clear_stop();
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Routine executor.
///
/// # Example
///
/// ```rust,ignore
/// let mut engine = PlaybackEngine::new(Duration::from_secs(1));
/// let stop = engine.control();
/// let state = engine.run(&routine, &mut axes).await?;
/// println!("Playback {}", state);
/// ```
#[derive(Debug)]
pub struct PlaybackEngine {
    control: PlaybackControl,
    move_buffer: Duration,
    status: PlaybackStatus,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl PlaybackEngine {
    /// Create an engine that waits `move_buffer` after every move step.
    pub fn new(move_buffer: Duration) -> Self {
        Self::with_control(move_buffer, PlaybackControl::new())
    }

    /// Create an engine sharing an existing stop handle.
    pub fn with_control(move_buffer: Duration, control: PlaybackControl) -> Self {
        Self {
            control,
            move_buffer,
            status: PlaybackStatus::default(),
            events: None,
        }
    }

    /// Stop handle of this engine.
    pub fn control(&self) -> PlaybackControl {
        self.control.clone()
    }

    /// Route progress events to `events`, or stop emitting with `None`.
    pub fn set_events(&mut self, events: Option<mpsc::UnboundedSender<PlaybackEvent>>) {
        self.events = events;
    }

    /// Current status. A run whose future was dropped reports `Cancelled`.
    pub fn status(&self) -> PlaybackStatus {
        let mut status = self.status.clone();
        if status.state == PlaybackState::Running && !self.control.is_running() {
            status.state = PlaybackState::Cancelled;
        }
        status
    }

    /// Play `routine` for its repetition count.
    ///
    /// Returns the final state (`Completed` or `Cancelled`). A transport error
    /// marks the run `Failed` and is returned as the error.
    ///
    /// # Errors
    ///
    /// - `PlaybackBusy` if a run sharing this engine's control is in progress
    /// - whatever the executor returns for a failed move
    pub async fn run<E>(&mut self, routine: &Routine, executor: &mut E) -> SiaResult<PlaybackState>
    where
        E: StepExecutor + ?Sized,
    {
        if !self.status().state.can_begin() {
            return Err(SiaError::PlaybackBusy);
        }
        let repetitions = routine.repetitions();
        let _guard = self.control.begin()?;

        let steps: Vec<Step> = routine.steps().to_vec();
        let estimated = routine.total_time(self.move_buffer);
        let run_id = Uuid::new_v4();

        self.status = PlaybackStatus {
            state: PlaybackState::Running,
            run_id: Some(run_id),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        info!(
            run_id = %run_id,
            steps = steps.len(),
            repetitions,
            estimated = ?estimated,
            "Starting routine playback"
        );
        self.emit(PlaybackEvent::Started {
            run_id,
            repetitions,
            steps: steps.len(),
            estimated,
        });

        let started = Instant::now();
        let outcome = self
            .play(&steps, repetitions, estimated, started, executor)
            .await;

        let state = match &outcome {
            Ok(state) => *state,
            Err(e) => {
                error!(run_id = %run_id, "Playback failed: {}", e);
                self.status.last_error = Some(e.to_string());
                PlaybackState::Failed
            }
        };
        self.status.state = state;

        match state {
            PlaybackState::Completed => {
                self.emit(PlaybackEvent::Progress {
                    fraction: 1.0,
                    remaining: Duration::ZERO,
                });
                info!(
                    run_id = %run_id,
                    steps_executed = self.status.steps_executed,
                    elapsed = ?started.elapsed(),
                    "Routine playback completed"
                );
            }
            PlaybackState::Cancelled => {
                warn!(
                    run_id = %run_id,
                    steps_executed = self.status.steps_executed,
                    "Routine playback aborted"
                );
            }
            _ => {}
        }
        self.emit(PlaybackEvent::Finished { state });

        outcome
    }

    async fn play<E>(
        &mut self,
        steps: &[Step],
        repetitions: u32,
        estimated: Duration,
        started: Instant,
        executor: &mut E,
    ) -> SiaResult<PlaybackState>
    where
        E: StepExecutor + ?Sized,
    {
        for repetition in 0..repetitions {
            for (index, step) in steps.iter().enumerate() {
                if self.control.is_stop_requested() {
                    return Ok(PlaybackState::Cancelled);
                }

                self.status.current_repetition = repetition;
                self.status.current_step_index = index;
                let next = steps
                    .get(index + 1)
                    .map_or_else(|| NO_NEXT_STEP.to_string(), |s| s.label.clone());
                self.emit(PlaybackEvent::StepStarted {
                    repetition: repetition + 1,
                    repetitions,
                    index,
                    now: step.status_text(),
                    next,
                });

                self.execute(step, executor).await?;
                self.status.steps_executed += 1;

                let elapsed = started.elapsed();
                self.emit(PlaybackEvent::Progress {
                    fraction: progress::fraction(elapsed, estimated),
                    remaining: progress::remaining(elapsed, estimated),
                });
            }
        }
        Ok(PlaybackState::Completed)
    }

    async fn execute<E>(&self, step: &Step, executor: &mut E) -> SiaResult<()>
    where
        E: StepExecutor + ?Sized,
    {
        match &step.kind {
            StepKind::Move { x, y } => {
                debug!(label = %step.label, %x, %y, "Moving");
                executor.move_to(x, y).await?;
                sleep(self.move_buffer).await;
            }
            StepKind::Delay { duration } => {
                debug!(label = %step.label, ?duration, "Waiting");
                sleep(*duration).await;
            }
        }
        Ok(())
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(events) = &self.events {
            // Receiver gone just means nobody is watching
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::DelayLength;

    #[derive(Default)]
    struct Recorder {
        moves: Vec<(AxisTarget, AxisTarget)>,
        fail: bool,
    }

    #[async_trait]
    impl StepExecutor for Recorder {
        async fn move_to(&mut self, x: &AxisTarget, y: &AxisTarget) -> SiaResult<()> {
            if self.fail {
                return Err(SiaError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "link lost",
                )));
            }
            self.moves.push((x.clone(), y.clone()));
            Ok(())
        }
    }

    fn routine() -> Routine {
        let mut routine = Routine::new();
        routine.push_position(
            AxisTarget::Recorded("PA10".into()),
            AxisTarget::Recorded("PA20".into()),
        );
        routine.push_delay(DelayLength::seconds(2)).unwrap();
        routine
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_after_completion() {
        let mut engine = PlaybackEngine::new(Duration::from_secs(1));
        let mut recorder = Recorder::default();

        let state = engine.run(&routine(), &mut recorder).await.unwrap();
        assert_eq!(state, PlaybackState::Completed);

        let status = engine.status();
        assert_eq!(status.state, PlaybackState::Completed);
        assert_eq!(status.steps_executed, 2);
        assert!(status.run_id.is_some());
        assert!(!engine.control().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_error_marks_failed() {
        let mut engine = PlaybackEngine::new(Duration::from_secs(1));
        let mut recorder = Recorder {
            fail: true,
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_events(Some(tx));

        let err = engine.run(&routine(), &mut recorder).await.unwrap_err();
        assert!(matches!(err, SiaError::Io(_)));

        let status = engine.status();
        assert_eq!(status.state, PlaybackState::Failed);
        assert!(status.last_error.unwrap().contains("link lost"));

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(PlaybackEvent::Finished {
                state: PlaybackState::Failed
            })
        );
    }

    #[tokio::test]
    async fn test_empty_routine_completes() {
        let mut engine = PlaybackEngine::new(Duration::from_secs(1));
        let mut recorder = Recorder::default();
        let state = engine.run(&Routine::new(), &mut recorder).await.unwrap();
        assert_eq!(state, PlaybackState::Completed);
        assert!(recorder.moves.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_label_and_status_text() {
        let mut engine = PlaybackEngine::new(Duration::from_secs(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_events(Some(tx));

        engine.run(&routine(), &mut Recorder::default()).await.unwrap();

        let started: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| match event {
                PlaybackEvent::StepStarted { now, next, .. } => Some((now, next)),
                _ => None,
            })
            .collect();
        assert_eq!(
            started,
            vec![
                ("Moving to Position 1".to_string(), "Sleep for 2 s".to_string()),
                ("Sleep for 2 s".to_string(), NO_NEXT_STEP.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_run_reports_cancelled() {
        let mut engine = PlaybackEngine::new(Duration::from_secs(3600));
        let mut recorder = Recorder::default();
        let routine = routine();
        {
            let run = engine.run(&routine, &mut recorder);
            // Poll once so the run starts, then abandon it
            let _ = tokio::time::timeout(Duration::from_millis(10), run).await;
        }
        assert_eq!(engine.status().state, PlaybackState::Cancelled);
        assert!(!engine.control().is_running());
    }
}
