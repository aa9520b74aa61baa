//! Line-oriented operator shell.
//!
//! Every control of the stage is one command per line. Controller replies are
//! handled while the shell waits for input, so a `pos` shows up as a new
//! routine step as soon as the axis answers. During playback the shell keeps
//! reading input: `stop` aborts at the next step boundary.

use crate::error::{SiaError, SiaResult};
use crate::hardware::{serial, AxisEvent, MockController};
use crate::jog::{Direction, SpeedPreset, StepPreset};
use crate::playback::{progress, PlaybackEvent, PlaybackState};
use crate::protocol::Axis;
use crate::routine::DelayLength;
use crate::session::Session;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::{error, warn};

const HELP: &str = "\
Connections:
  ports                        list serial ports
  connect <x|y> [port]         open an axis (default: configured/remembered port)
  disconnect <x|y>             close an axis
  status                       show axes, jog settings and playback state
Jogging:
  jog <left|right|up|down>     relative step
  step <nm|smallest|small|big|biggest>
  drive <direction> [speed]    continuous open-loop jog
  speed <n|slowest|slow|fast|fastest>
  halt <x|y>                   stop a continuous jog
  openloop <x|y>               switch axis to open loop
  amplitude <x|y> <up> <down>  open-loop step amplitudes
  swap <on|off>                swap X and Y buttons
  reverse <x|y> <on|off>       invert an axis
Routine:
  pos                          record current position of open axes
  delay [<n>[s|min|h]]         append a delay step (default: last delay)
  delay <+n|-n>                adjust the delay, rolling over s/min/h
  list                         show steps
  rename <n> <label>           rename step n
  reorder <from> <to>          move step
  remove <n>                   delete step n
  reps <n>                     repetition count
  new                          clear routine
  save <file> / load <file>
  run                          play routine (type 'stop' to abort)
  quit";

/// What the shell should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading commands
    Continue,
    /// Leave the shell
    Quit,
}

enum Input {
    Line(std::io::Result<Option<String>>),
    Event(Option<AxisEvent>),
}

/// Line-oriented operator console over a `Session`.
pub struct Shell {
    session: Session,
    mocks: Vec<MockController>,
    delay_input: DelayLength,
}

impl Shell {
    /// Shell over `session`.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            mocks: Vec::new(),
            delay_input: DelayLength::seconds(1),
        }
    }

    /// Session being operated.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mutable session.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Attach a simulated controller to both axes.
    pub async fn attach_mocks(&mut self) -> SiaResult<()> {
        for axis in Axis::ALL {
            let (mock, stream) = MockController::spawn(axis);
            let name = format!("mock-{}", axis.to_string().to_lowercase());
            self.session.attach(axis, &name, stream).await?;
            self.mocks.push(mock);
        }
        Ok(())
    }

    /// Read commands from `input` until `quit` or end of input.
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> SiaResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        writeln!(out, "SIA shell, type 'help' for commands")?;

        loop {
            write!(out, "sia> ")?;
            out.flush()?;

            let input = tokio::select! {
                line = lines.next_line() => Input::Line(line),
                event = self.session.next_event() => Input::Event(event),
            };

            match input {
                Input::Event(Some(event)) => {
                    writeln!(out)?;
                    self.report_event(event, out)?;
                }
                Input::Event(None) => {}
                Input::Line(Ok(Some(line))) => {
                    let outcome = if line.trim() == "run" {
                        self.play(Some(&mut lines), out).await
                    } else {
                        self.execute(&line, out).await
                    };
                    match outcome {
                        Ok(Outcome::Quit) => break,
                        Ok(Outcome::Continue) => {}
                        Err(e) if e.is_recoverable() => {
                            warn!("{}", e);
                            writeln!(out, "Error: {}", e)?;
                        }
                        Err(e) => {
                            error!("{}", e);
                            writeln!(out, "Error: {} (cannot be fixed from the shell)", e)?;
                        }
                    }
                }
                Input::Line(Ok(None)) => break,
                Input::Line(Err(e)) => return Err(e.into()),
            }
        }

        self.session.shutdown().await;
        Ok(())
    }

    fn report_event<W: Write>(&mut self, event: AxisEvent, out: &mut W) -> SiaResult<()> {
        let link_lost = matches!(event, AxisEvent::Closed { axis } if self.session.is_connected(axis));
        let axis = event.axis();
        if let Some(step) = self.session.handle_event(event) {
            writeln!(out, "Recorded {}", step)?;
        }
        if link_lost {
            writeln!(out, "{} axis link closed", axis)?;
        }
        Ok(())
    }

    /// Execute one command line.
    pub async fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> SiaResult<Outcome> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            return Ok(Outcome::Continue);
        };

        match command {
            "help" | "?" => writeln!(out, "{}", HELP)?,
            "quit" | "exit" => return Ok(Outcome::Quit),

            "ports" => {
                let ports = serial::available_ports()?;
                if ports.is_empty() {
                    writeln!(out, "No serial ports found")?;
                }
                for port in ports {
                    writeln!(out, "{:<20} {}", port.port_name, port.description)?;
                }
            }
            "connect" => {
                let axis = axis_arg(args, 0)?;
                let port = match args.get(1) {
                    Some(port) => port.to_string(),
                    None => self.session.default_port(axis).ok_or_else(|| {
                        usage(format!("no port configured for {} axis", axis))
                    })?,
                };
                self.session.connect(axis, &port).await?;
                writeln!(out, "{} - axis connected ({})", axis, port)?;
            }
            "disconnect" => {
                let axis = axis_arg(args, 0)?;
                self.session.disconnect(axis).await;
                writeln!(out, "{} - axis disconnected", axis)?;
            }
            "status" => self.print_status(out)?,

            "jog" => {
                let direction = direction_arg(args)?;
                if !self.session.jog(direction).await? {
                    writeln!(out, "Axis for '{}' is not connected", direction)?;
                }
            }
            "step" => {
                let value = args.first().ok_or_else(|| usage("step <nm|preset>"))?;
                let nm = match StepPreset::parse(value) {
                    Some(preset) => preset.nanometres(),
                    None => value
                        .parse()
                        .map_err(|_| usage(format!("invalid step '{}'", value)))?,
                };
                self.session.jog_settings_mut().set_step_nm(nm)?;
                writeln!(out, "Step size {} nm", nm)?;
            }
            "drive" => {
                let direction = direction_arg(args)?;
                let speed = args.get(1).map(|s| speed_value(s)).transpose()?;
                if !self.session.start_jog(direction, speed).await? {
                    writeln!(out, "Axis for '{}' is not connected", direction)?;
                }
            }
            "speed" => {
                let value = args.first().ok_or_else(|| usage("speed <n|preset>"))?;
                let speed = speed_value(value)?;
                self.session.jog_settings_mut().speed = speed;
                writeln!(out, "Jog speed {}", speed)?;
            }
            "halt" => {
                let axis = axis_arg(args, 0)?;
                self.session.stop_jog(axis).await?;
            }
            "openloop" => {
                let axis = axis_arg(args, 0)?;
                self.session.open_loop(axis).await?;
            }
            "amplitude" => {
                let axis = axis_arg(args, 0)?;
                let up = int_arg(args, 1, "amplitude <x|y> <up> <down>")?;
                let down = int_arg(args, 2, "amplitude <x|y> <up> <down>")?;
                self.session.set_step_amplitude(axis, up, down).await?;
            }
            "swap" => {
                let on = switch_arg(args, 0)?;
                self.session.jog_settings_mut().swap_xy = on;
            }
            "reverse" => {
                let axis = axis_arg(args, 0)?;
                let on = switch_arg(args, 1)?;
                let jog = self.session.jog_settings_mut();
                match axis {
                    Axis::X => jog.reverse_x = on,
                    Axis::Y => jog.reverse_y = on,
                }
            }

            "pos" => {
                if self.session.request_positions().await? == 0 {
                    writeln!(out, "No axis connected")?;
                }
            }
            "delay" => match args.first() {
                Some(arg) if arg.starts_with('+') || arg.starts_with('-') => {
                    let delta: i64 = arg
                        .parse()
                        .map_err(|_| usage(format!("invalid adjustment '{}'", arg)))?;
                    self.delay_input = self.delay_input.adjust(delta);
                    writeln!(out, "Delay {}", self.delay_input)?;
                }
                _ => {
                    let length = if args.is_empty() {
                        self.delay_input
                    } else {
                        args.join(" ").parse()?
                    };
                    let step = self.session.routine_mut().push_delay(length)?;
                    writeln!(out, "Added {}", step)?;
                    self.delay_input = length;
                }
            },
            "list" => self.print_routine(out)?,
            "rename" => {
                let index = index_arg(args, 0)?;
                let label = args.get(1..).unwrap_or_default().join(" ");
                if label.is_empty() {
                    return Err(usage("rename <n> <label>"));
                }
                self.session.routine_mut().rename(index, label)?;
            }
            "reorder" => {
                let from = index_arg(args, 0)?;
                let to = index_arg(args, 1)?;
                self.session.routine_mut().move_step(from, to)?;
            }
            "remove" => {
                let index = index_arg(args, 0)?;
                let step = self.session.routine_mut().remove(index)?;
                writeln!(out, "Removed {}", step.label)?;
            }
            "reps" => {
                let n = int_arg(args, 0, "reps <n>")?;
                let n = u32::try_from(n).map_err(|_| SiaError::InvalidRepetitions)?;
                self.session.routine_mut().set_repetitions(n)?;
            }
            "new" => self.session.new_routine(),
            "save" => {
                let path = args.first().ok_or_else(|| usage("save <file>"))?;
                self.session.save_routine(Path::new(path))?;
                writeln!(out, "Saved {}", path)?;
            }
            "load" => {
                let path = args.first().ok_or_else(|| usage("load <file>"))?;
                self.session.load_routine(Path::new(path))?;
                writeln!(out, "Loaded {} steps", self.session.routine().len())?;
            }
            "run" => return self.play::<tokio::io::Empty, W>(None, out).await,
            "stop" => writeln!(out, "No playback running")?,

            other => writeln!(out, "Unknown command '{}', try 'help'", other)?,
        }
        Ok(Outcome::Continue)
    }

    /// Play the routine, printing progress. With `input`, a `stop` line
    /// requests cancellation.
    async fn play<R, W>(
        &mut self,
        mut input: Option<&mut Lines<R>>,
        out: &mut W,
    ) -> SiaResult<Outcome>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        if self.session.routine().is_empty() {
            writeln!(out, "Routine is empty")?;
            return Ok(Outcome::Continue);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.session.set_playback_events(Some(tx));
        let control = self.session.playback_control();

        let result = {
            let run = self.session.run_routine();
            tokio::pin!(run);
            loop {
                tokio::select! {
                    result = &mut run => break result,
                    Some(event) = rx.recv() => print_playback_event(&event, out)?,
                    line = next_line(&mut input), if input.is_some() => match line {
                        Ok(Some(text)) if text.trim() == "stop" => control.request_stop(),
                        Ok(Some(_)) => writeln!(out, "Playback running, type 'stop' to abort")?,
                        // End of input: let the routine finish
                        Ok(None) | Err(_) => input = None,
                    },
                }
            }
        };

        while let Ok(event) = rx.try_recv() {
            print_playback_event(&event, out)?;
        }
        self.session.set_playback_events(None);

        result.map(|_| Outcome::Continue)
    }

    fn print_status<W: Write>(&self, out: &mut W) -> SiaResult<()> {
        if !self.mocks.is_empty() {
            writeln!(out, "Simulated controllers on {} axes", self.mocks.len())?;
        }
        for axis in Axis::ALL {
            let link = if self.session.is_connected(axis) {
                format!("connected on {}", self.session.port_name(axis).unwrap_or("?"))
            } else {
                "disconnected".to_string()
            };
            let position = self.session.positions().get(axis).unwrap_or("NA");
            writeln!(out, "{} axis: {} (last position {})", axis, link, position)?;
        }

        let jog = self.session.jog_settings();
        writeln!(
            out,
            "Jog: step {} nm, speed {}, swap {}, reverse x {}, reverse y {}",
            jog.step_nm(),
            jog.speed,
            jog.swap_xy,
            jog.reverse_x,
            jog.reverse_y
        )?;

        let status = self.session.playback_status();
        write!(out, "Playback: {}", status.state)?;
        if let Some(run_id) = status.run_id {
            write!(out, " (run {}, {} steps executed)", run_id, status.steps_executed)?;
        }
        writeln!(out)?;
        if status.state.is_finished() {
            if let Some(started) = status.started_at {
                writeln!(out, "Last run started {}", started.format("%Y-%m-%d %H:%M:%S UTC"))?;
            }
        }
        if let Some(error) = status.last_error {
            writeln!(out, "Last error: {}", error)?;
        }
        Ok(())
    }

    fn print_routine<W: Write>(&self, out: &mut W) -> SiaResult<()> {
        let routine = self.session.routine();
        if routine.is_empty() {
            writeln!(out, "Routine is empty")?;
        }
        for (index, step) in routine.steps().iter().enumerate() {
            writeln!(out, "{:>3}. {}", index + 1, step)?;
        }
        writeln!(
            out,
            "Repetitions: {}, estimated {}",
            routine.repetitions(),
            progress::time_left_text(routine.total_time(self.session.config().playback.move_buffer))
        )?;
        Ok(())
    }
}

async fn next_line<R>(input: &mut Option<&mut Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match input {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

fn print_playback_event<W: Write>(event: &PlaybackEvent, out: &mut W) -> SiaResult<()> {
    match event {
        PlaybackEvent::Started {
            steps,
            repetitions,
            estimated,
            ..
        } => writeln!(
            out,
            "Playing {} steps, {} repetitions ({})",
            steps,
            repetitions,
            progress::time_left_text(*estimated)
        )?,
        PlaybackEvent::StepStarted {
            repetition,
            repetitions,
            now,
            next,
            ..
        } => writeln!(out, "[{} of {}] Now: {} | Next: {}", repetition, repetitions, now, next)?,
        PlaybackEvent::Progress {
            fraction,
            remaining,
        } => writeln!(
            out,
            "{:>3.0}% {}",
            fraction * 100.0,
            progress::time_left_text(*remaining)
        )?,
        PlaybackEvent::Finished { state } => match state {
            PlaybackState::Completed => writeln!(out, "Measurement has been successful")?,
            PlaybackState::Cancelled => writeln!(out, "Measurement has been aborted")?,
            other => writeln!(out, "Playback {}", other)?,
        },
    }
    Ok(())
}

fn usage(message: impl Into<String>) -> SiaError {
    SiaError::Usage(message.into())
}

fn axis_arg(args: &[&str], position: usize) -> SiaResult<Axis> {
    args.get(position)
        .and_then(|s| Axis::parse(s))
        .ok_or_else(|| usage("expected axis 'x' or 'y'"))
}

fn direction_arg(args: &[&str]) -> SiaResult<Direction> {
    let value = args
        .first()
        .ok_or_else(|| usage("expected direction (left, right, up, down)"))?;
    value.parse().map_err(usage)
}

fn switch_arg(args: &[&str], position: usize) -> SiaResult<bool> {
    match args.get(position).copied() {
        Some("on") | Some("true") | Some("1") => Ok(true),
        Some("off") | Some("false") | Some("0") => Ok(false),
        _ => Err(usage("expected 'on' or 'off'")),
    }
}

fn int_arg(args: &[&str], position: usize, help: &str) -> SiaResult<i32> {
    args.get(position)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| usage(help))
}

/// One-based step number from the operator, as a zero-based index.
fn index_arg(args: &[&str], position: usize) -> SiaResult<usize> {
    args.get(position)
        .and_then(|s| s.parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| usage("expected a step number (1, 2, ...)"))
}

fn speed_value(value: &str) -> SiaResult<i32> {
    match SpeedPreset::parse(value) {
        Some(preset) => Ok(preset.speed()),
        None => value
            .parse()
            .map_err(|_| usage(format!("invalid speed '{}'", value))),
    }
}
