//! Stage controller wire protocol
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232 (one controller per axis)
//! - Baud: 115200, 8N1
//! - Commands: `{Command}{Value}` terminated by CRLF
//! - Example: "PR-0.010000" (position relative, 10 µm towards negative)
//!
//! Replies are plain text lines. A reply containing `PA` reports the current
//! position and is replayed verbatim as an absolute move target during routine
//! playback.

use std::fmt;

/// Command terminator expected by the controllers.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Substring identifying a position echo.
pub const POSITION_REPLY_TAG: &str = "PA";

/// One of the two independently controlled stage axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Axis {
    /// Horizontal axis
    X,
    /// Vertical axis
    Y,
}

impl Axis {
    /// Both axes, X first.
    pub const ALL: [Axis; 2] = [Axis::X, Axis::Y];

    /// Parse "x"/"y" (case insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Some(Axis::X),
            "y" => Some(Axis::Y),
            _ => None,
        }
    }

    /// The opposite axis.
    pub fn other(self) -> Self {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

/// Controller command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `OR` - search origin / enter closed loop
    Origin,
    /// `MM0` / `MM1` - motor disabled / enabled
    MotorMode(bool),
    /// `SR<n>` - software right (top) limit
    RightLimit(i32),
    /// `SL<n>` - software left (bottom) limit
    LeftLimit(i32),
    /// `RFP` - reference from position
    ReferenceFromPosition,
    /// `PR<mm>` - relative move
    MoveRelative(f64),
    /// `PA?` - query absolute position
    QueryPosition,
    /// `JA<speed>` - continuous open-loop jog
    Jog(i32),
    /// `ST` - stop motion
    Stop,
    /// `OL` - switch to open loop
    OpenLoop,
    /// `XU<up>,<down>` - open-loop step amplitudes
    StepAmplitude(i32, i32),
    /// Previously recorded reply replayed verbatim (e.g. `PA10.000000`).
    Raw(String),
}

impl Command {
    /// Commands sent right after a link is opened.
    pub fn init_sequence() -> Vec<Command> {
        vec![
            Command::Origin,
            Command::MotorMode(false),
            Command::RightLimit(48),
            Command::LeftLimit(0),
            Command::MotorMode(true),
            Command::Origin,
            Command::ReferenceFromPosition,
        ]
    }

    /// Wire bytes including the terminator.
    pub fn encode(&self) -> String {
        format!("{}{}", self, LINE_TERMINATOR)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Origin => write!(f, "OR"),
            Command::MotorMode(on) => write!(f, "MM{}", u8::from(*on)),
            Command::RightLimit(v) => write!(f, "SR{}", v),
            Command::LeftLimit(v) => write!(f, "SL{}", v),
            Command::ReferenceFromPosition => write!(f, "RFP"),
            Command::MoveRelative(mm) => write!(f, "PR{:.6}", mm),
            Command::QueryPosition => write!(f, "PA?"),
            Command::Jog(speed) => write!(f, "JA{}", speed),
            Command::Stop => write!(f, "ST"),
            Command::OpenLoop => write!(f, "OL"),
            Command::StepAmplitude(up, down) => write!(f, "XU{},{}", up, down),
            Command::Raw(text) => write!(f, "{}", text.trim()),
        }
    }
}

/// Classified reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Line containing `PA`
    Position(String),
    /// Anything else
    Other(String),
}

impl Reply {
    /// Classify one received line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Reply> {
        let text = line.trim();
        if text.is_empty() {
            return None;
        }
        if text.contains(POSITION_REPLY_TAG) {
            Some(Reply::Position(text.to_string()))
        } else {
            Some(Reply::Other(text.to_string()))
        }
    }
}

/// Splits a raw byte stream into lines on `\r` or `\n`.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Splitter with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, returning every completed non-empty line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\r' || b == b'\n' {
                if !self.pending.is_empty() {
                    let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                    self.pending.clear();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_sequence_wire_text() {
        let wire: String = Command::init_sequence().iter().map(Command::encode).collect();
        assert_eq!(
            wire,
            "OR\r\nMM0\r\nSR48\r\nSL0\r\nMM1\r\nOR\r\nRFP\r\n"
        );
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(Command::MoveRelative(0.01).to_string(), "PR0.010000");
        assert_eq!(Command::MoveRelative(-4.8).to_string(), "PR-4.800000");
        assert_eq!(Command::QueryPosition.to_string(), "PA?");
        assert_eq!(Command::Jog(-500).to_string(), "JA-500");
        assert_eq!(Command::StepAmplitude(30, 40).to_string(), "XU30,40");
        assert_eq!(Command::Raw(" PA10 ".into()).encode(), "PA10\r\n");
    }

    #[test]
    fn test_reply_classification() {
        assert_eq!(
            Reply::parse("PA12.5\r"),
            Some(Reply::Position("PA12.5".to_string()))
        );
        assert_eq!(Reply::parse("OK"), Some(Reply::Other("OK".to_string())));
        assert_eq!(Reply::parse("  \r"), None);
    }

    #[test]
    fn test_line_splitter_handles_mixed_terminators() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"PA1").is_empty());
        assert_eq!(splitter.push(b"0\r\nOK\rPA"), vec!["PA10", "OK"]);
        // The unterminated tail is kept for the next chunk
        assert_eq!(splitter.push(b"2\n\n"), vec!["PA2"]);
        assert!(splitter.push(b"\r\n").is_empty());
    }

    #[test]
    fn test_axis_parse() {
        assert_eq!(Axis::parse("x"), Some(Axis::X));
        assert_eq!(Axis::parse(" Y "), Some(Axis::Y));
        assert_eq!(Axis::parse("z"), None);
        assert_eq!(Axis::X.other(), Axis::Y);
    }
}
