//! Serial line reader
//!
//! Accumulates host bytes into command lines and validates the optional
//! line-number/checksum framing before a line reaches the command queue.
//!
//! Supports:
//! - `;` comments up to the end of the line
//! - `\` escaping the next byte
//! - `N<k> ... *<xor>` framing with resend requests on any mismatch
//! - Emergency commands (`M112`, `M108`, `M410`) recognised before queueing
//! - Truncation of lines longer than the queue entry size

use crate::queue::{CommandQueue, CommandSource};
use crate::response::{Response, ResponseSink};
use parking_lot::Mutex;
use printcore_core::FramingError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Message sent for motion received while the printer is stopped
pub const STOPPED_MESSAGE: &str =
    "Printer stopped due to errors. Fix the error and use M999 to restart.";

/// Byte stream from the host
pub trait ByteSource: Send {
    /// Next received byte, `None` when nothing is pending
    fn read_byte(&mut self) -> Option<u8>;

    /// The host will send nothing more
    fn is_closed(&self) -> bool {
        false
    }
}

/// In-memory receive buffer, shared between clones
///
/// One handle is given to the reader, the other is used by whoever plays
/// the host.
#[derive(Debug, Clone, Default)]
pub struct SerialInput {
    bytes: Arc<Mutex<VecDeque<u8>>>,
    closed: Arc<AtomicBool>,
}

impl SerialInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.bytes.lock().extend(bytes.iter().copied());
    }

    pub fn push_str(&self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    /// Append `line` followed by a newline
    pub fn push_line(&self, line: &str) {
        let mut bytes = self.bytes.lock();
        bytes.extend(line.bytes());
        bytes.push_back(b'\n');
    }

    pub fn pending(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }

    /// Mark the end of the host stream
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl ByteSource for SerialInput {
    fn read_byte(&mut self) -> Option<u8> {
        self.bytes.lock().pop_front()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) && self.is_empty()
    }
}

/// Out-of-band commands acted on by the transport itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// `M112`: halt immediately
    EmergencyStop,
    /// `M108`: break out of a heater or user wait
    BreakWait,
    /// `M410`: abort all planned moves
    QuickStop,
}

/// XOR of every byte, as used by the `*` checksum
pub fn checksum(text: &str) -> u8 {
    text.bytes().fold(0, |acc, b| acc ^ b)
}

/// Prefix `line` with `N<n>` and append its checksum
pub fn frame_line(n: i64, line: &str) -> String {
    let body = format!("N{} {}", n, line);
    let cs = checksum(&body);
    format!("{}*{}", body, cs)
}

/// Leading integer of `text`, zero when there is none
fn parse_long(text: &str) -> i64 {
    let text = text.trim_start();
    let (sign, digits) = match text.as_bytes().first() {
        Some(b'-') => (-1, &text[1..]),
        Some(b'+') => (1, &text[1..]),
        _ => (1, text),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    sign * digits[..end].parse::<i64>().unwrap_or(0)
}

/// Command word of a line with any `N` prefix and checksum removed
fn command_word(line: &str) -> &str {
    let mut body = line.split('*').next().unwrap_or("").trim();
    if body.starts_with('N') {
        let end = body[1..]
            .find(|c: char| !(c.is_ascii_digit() || c == '-'))
            .map(|i| i + 1)
            .unwrap_or(body.len());
        body = body[end..].trim_start();
    }
    body.split_whitespace().next().unwrap_or("")
}

/// Line accumulator and framing validator for the host serial stream
#[derive(Debug)]
pub struct SerialReader {
    line: Vec<u8>,
    comment_mode: bool,
    max_len: usize,
    last_line: i64,
}

impl SerialReader {
    pub fn new(max_cmd_size: usize) -> Self {
        Self {
            line: Vec::with_capacity(max_cmd_size),
            comment_mode: false,
            max_len: max_cmd_size.saturating_sub(1).max(1),
            last_line: 0,
        }
    }

    /// Last accepted line number
    pub fn last_line(&self) -> i64 {
        self.last_line
    }

    /// Reset the line-number baseline (M110)
    pub fn set_last_line(&mut self, n: i64) {
        tracing::debug!("Line number baseline set to {}", n);
        self.last_line = n;
    }

    /// Read bytes while the queue has room
    ///
    /// Every complete line is validated; valid lines are queued with
    /// `echo_ok`, invalid ones get an error and a resend request.
    /// `stopped` enables the stopped-printer warning for motion lines.
    pub fn poll(
        &mut self,
        source: &mut dyn ByteSource,
        queue: &mut CommandQueue,
        out: &mut dyn ResponseSink,
        stopped: bool,
    ) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        while !queue.is_full() {
            let Some(byte) = source.read_byte() else {
                break;
            };

            match byte {
                b'\n' | b'\r' => {
                    self.comment_mode = false;
                    if self.line.is_empty() {
                        continue;
                    }
                    let raw = std::mem::take(&mut self.line);
                    let text = String::from_utf8_lossy(&raw);
                    if let Some(event) = self.finish_line(&text, queue, out, stopped) {
                        let halt = event == TransportEvent::EmergencyStop;
                        events.push(event);
                        if halt {
                            break;
                        }
                    }
                }
                _ if self.line.len() >= self.max_len => {
                    // Over-long line: keep reading until the terminator.
                }
                b'\\' => {
                    if let Some(escaped) = source.read_byte() {
                        if !self.comment_mode {
                            self.line.push(escaped);
                        }
                    }
                }
                _ => {
                    if byte == b';' {
                        self.comment_mode = true;
                    }
                    if !self.comment_mode {
                        self.line.push(byte);
                    }
                }
            }
        }

        events
    }

    /// Validate framing without touching the queue
    ///
    /// The checksum covers the line exactly as received up to `*`,
    /// leading whitespace included.
    pub fn validate(&mut self, line: &str) -> Result<(), FramingError> {
        let checksum_pos = line.find('*');
        let numbered = line.trim_start();

        if numbered.starts_with('N') {
            let mut number_text = &numbered[1..];
            let is_m110 = match numbered.find("M110") {
                Some(pos) => {
                    if let Some(n2) = numbered[pos + 4..].find('N') {
                        number_text = &numbered[pos + 4 + n2 + 1..];
                    }
                    true
                }
                None => false,
            };
            let n = parse_long(number_text);

            if n != self.last_line + 1 && !is_m110 {
                return Err(FramingError::LineNumberOutOfSequence {
                    got: n,
                    last: self.last_line,
                });
            }

            match checksum_pos {
                Some(pos) => {
                    let expected = parse_long(&line[pos + 1..]);
                    if expected != i64::from(checksum(&line[..pos])) {
                        return Err(FramingError::ChecksumMismatch {
                            last: self.last_line,
                        });
                    }
                }
                None => {
                    return Err(FramingError::MissingChecksum {
                        last: self.last_line,
                    })
                }
            }

            self.last_line = n;
            Ok(())
        } else if checksum_pos.is_some() {
            Err(FramingError::ChecksumWithoutLineNumber {
                last: self.last_line,
            })
        } else {
            Ok(())
        }
    }

    fn finish_line(
        &mut self,
        line: &str,
        queue: &mut CommandQueue,
        out: &mut dyn ResponseSink,
        stopped: bool,
    ) -> Option<TransportEvent> {
        if let Err(e) = self.validate(line) {
            tracing::warn!("Rejected line {:?}: {}", line, e);
            out.send(Response::error(e.to_string()));
            out.send(Response::Resend(e.resend_line()));
            out.send(Response::Ok);
            return None;
        }
        let line = line.trim_start();

        let body = match line.find('*') {
            Some(pos) => line[..pos].trim_end(),
            None => line.trim_end(),
        };
        let word = command_word(body);

        if stopped {
            if let Some(code) = word.strip_prefix('G') {
                if matches!(parse_long(code), 0..=3) {
                    out.send(Response::error(STOPPED_MESSAGE));
                }
            }
        }

        let event = match word {
            "M112" => Some(TransportEvent::EmergencyStop),
            "M108" => Some(TransportEvent::BreakWait),
            "M410" => Some(TransportEvent::QuickStop),
            _ => None,
        };
        if event == Some(TransportEvent::EmergencyStop) {
            tracing::error!("Emergency stop received");
            return event;
        }

        if let Err(e) = queue.enqueue(body, true, CommandSource::Serial) {
            tracing::debug!("Line not queued: {}", e);
        }
        event
    }
}
