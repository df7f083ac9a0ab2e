//! Host-facing responses
//!
//! Every line the firmware sends back to the host goes through a
//! [`ResponseSink`] as a [`Response`], whose `Display` form is the exact
//! wire text.

use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Reason reported by the busy keepalive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyState {
    /// A long-running command is executing
    Processing,
    /// Waiting for the user to resume (M0/M1)
    PausedForUser,
    /// Waiting for input
    PausedForInput,
}

impl fmt::Display for BusyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::PausedForUser => write!(f, "paused for user"),
            Self::PausedForInput => write!(f, "paused for input"),
        }
    }
}

/// One line sent to the host
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Plain acknowledgment
    Ok,
    /// Advanced acknowledgment with line number and free buffer counts
    AdvancedOk {
        line: Option<i64>,
        planner_free: usize,
        queue_free: usize,
    },
    /// Acknowledgment carrying a report, e.g. `ok T:20.0 /0.0`
    OkWith(String),
    /// `Error:` line
    Error(String),
    /// `echo:` line
    Echo(String),
    /// Request to resend from line `n`
    Resend(i64),
    /// Busy keepalive
    Busy(BusyState),
    /// Report text sent verbatim
    Raw(String),
}

impl Response {
    pub fn echo(message: impl Into<String>) -> Self {
        Self::Echo(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw(text.into())
    }

    /// True for any of the acknowledgment forms
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok | Self::AdvancedOk { .. } | Self::OkWith(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::AdvancedOk {
                line,
                planner_free,
                queue_free,
            } => {
                write!(f, "ok")?;
                if let Some(n) = line {
                    write!(f, " N{}", n)?;
                }
                write!(f, " P{} B{}", planner_free, queue_free)
            }
            Self::OkWith(report) => write!(f, "ok {}", report),
            Self::Error(msg) => write!(f, "Error:{}", msg),
            Self::Echo(msg) => write!(f, "echo:{}", msg),
            Self::Resend(n) => write!(f, "Resend: {}", n),
            Self::Busy(state) => write!(f, "echo:busy: {}", state),
            Self::Raw(text) => write!(f, "{}", text),
        }
    }
}

/// Destination of host responses
pub trait ResponseSink: Send {
    fn send(&mut self, response: Response);
}

/// Sink that records every line, shared between clones
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything sent so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Remove and return everything sent so far
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }

    /// Number of acknowledgments sent
    pub fn ok_count(&self) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.as_str() == "ok" || line.starts_with("ok "))
            .count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl ResponseSink for CapturedOutput {
    fn send(&mut self, response: Response) {
        self.lines.lock().push(response.to_string());
    }
}

/// Sink writing one line per response to any writer
pub struct WriterSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ResponseSink for WriterSink<W> {
    fn send(&mut self, response: Response) {
        if let Err(e) = writeln!(self.writer, "{}", response).and_then(|_| self.writer.flush()) {
            tracing::warn!("Failed to write response: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_formats() {
        assert_eq!(Response::Ok.to_string(), "ok");
        assert_eq!(
            Response::AdvancedOk {
                line: Some(12),
                planner_free: 15,
                queue_free: 3
            }
            .to_string(),
            "ok N12 P15 B3"
        );
        assert_eq!(
            Response::AdvancedOk {
                line: None,
                planner_free: 16,
                queue_free: 4
            }
            .to_string(),
            "ok P16 B4"
        );
        assert_eq!(Response::Resend(8).to_string(), "Resend: 8");
        assert_eq!(
            Response::error("checksum mismatch, Last Line: 7").to_string(),
            "Error:checksum mismatch, Last Line: 7"
        );
        assert_eq!(
            Response::Busy(BusyState::PausedForUser).to_string(),
            "echo:busy: paused for user"
        );
        assert_eq!(Response::echo("Home X first").to_string(), "echo:Home X first");
    }

    #[test]
    fn test_captured_output_shared_between_clones() {
        let output = CapturedOutput::new();
        let mut sink = output.clone();
        sink.send(Response::Ok);
        sink.send(Response::OkWith("T:20.0 /0.0".into()));
        sink.send(Response::echo("busy"));
        assert_eq!(output.ok_count(), 2);
        assert!(output.contains("T:20.0"));
        assert_eq!(output.take().len(), 3);
        assert!(output.lines().is_empty());
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink::new(Vec::new());
        sink.send(Response::Ok);
        sink.send(Response::Resend(3));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "ok\nResend: 3\n");
    }
}
