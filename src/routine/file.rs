//! Routine file format
//!
//! ```text
//! ####SIA####
//! Position 1;PA10.000000;PA20.000000;0
//! Sleep for 2 s;NA;NA;2000
//! ```
//!
//! The first line carries the format marker. Every further line is one step:
//! `label;x;y;duration_ms`. Lines are written with a `\r` terminator; reading
//! accepts `\r`, `\n` or `\r\n`. Repetitions are flattened on save (every pass
//! is written out) and a loaded routine always has one repetition.

use crate::error::{SiaError, SiaResult};
use crate::routine::step::{AxisTarget, Step, StepKind, NOT_AVAILABLE};
use crate::routine::Routine;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Required on the first line of every routine file.
pub const FORMAT_MARKER: &str = "####SIA####";

const LINE_END: &str = "\r";

/// Render a routine, all repetitions included.
pub fn to_string(routine: &Routine) -> String {
    let mut out = String::new();
    out.push_str(FORMAT_MARKER);
    out.push_str(LINE_END);

    for _ in 0..routine.repetitions() {
        for step in routine.steps() {
            let (x, y) = match &step.kind {
                StepKind::Move { x, y } => (x.as_str(), y.as_str()),
                StepKind::Delay { .. } => (NOT_AVAILABLE, NOT_AVAILABLE),
            };
            // Trailing space before the terminator matches files in the field
            let _ = write!(
                out,
                "{};{};{};{} {}",
                step.label,
                x,
                y,
                step.stored_duration().as_millis(),
                LINE_END
            );
        }
    }
    out
}

/// Parse routine file text.
pub fn parse(text: &str) -> SiaResult<Routine> {
    let text = text.replace("\r\n", "\n");
    let mut lines = text.split(['\r', '\n']).enumerate();

    match lines.next() {
        Some((_, first)) if first.contains(FORMAT_MARKER) => {}
        _ => {
            return Err(SiaError::InvalidRoutineFile {
                marker: FORMAT_MARKER,
            })
        }
    }

    let mut steps = Vec::new();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        steps.push(parse_line(line, index + 1)?);
    }

    Ok(Routine::from_steps(steps))
}

fn parse_line(line: &str, number: usize) -> SiaResult<Step> {
    let error = |reason: String| SiaError::RoutineParse {
        line: number,
        reason,
    };

    // Labels may contain ';', so split from the right
    let fields: Vec<&str> = line.trim_end().rsplitn(4, ';').collect();
    if fields.len() < 4 {
        return Err(error(format!(
            "expected 4 fields 'label;x;y;duration', found {}",
            fields.len()
        )));
    }
    let (duration, y, x, label) = (fields[0].trim(), fields[1], fields[2], fields[3]);

    let millis = if duration == NOT_AVAILABLE || duration.is_empty() {
        0.0
    } else {
        duration
            .parse::<f64>()
            .map_err(|_| error(format!("invalid duration '{}'", duration)))?
    };
    if !millis.is_finite() || millis < 0.0 {
        return Err(error(format!("invalid duration '{}'", duration)));
    }

    let x = AxisTarget::parse(x);
    let y = AxisTarget::parse(y);
    let step = if !x.is_recorded() && !y.is_recorded() {
        Step::delay(label, Duration::from_millis(millis.round() as u64))
    } else {
        Step::position(label, x, y)
    };
    Ok(step)
}

/// Write a routine to `path`, replacing the file.
pub fn save(routine: &Routine, path: &Path) -> SiaResult<()> {
    std::fs::write(path, to_string(routine))?;
    info!(
        path = %path.display(),
        steps = routine.len(),
        repetitions = routine.repetitions(),
        "Routine saved"
    );
    Ok(())
}

/// Read a routine from `path`.
pub fn load(path: &Path) -> SiaResult<Routine> {
    let text = std::fs::read_to_string(path)?;
    let routine = parse(&text)?;
    info!(path = %path.display(), steps = routine.len(), "Routine loaded");
    Ok(routine)
}
