//! G-Code command parsing
//!
//! A queued line is parsed once into a [`GcodeCommand`]: optional `N` line
//! number, command letter and code, and a fixed-capacity map from parameter
//! letter to value. Handlers only ever read the map.

use printcore_core::{Axis, GcodeError};
use std::fmt;

/// Command family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandLetter {
    G,
    M,
    T,
}

impl fmt::Display for CommandLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::G => write!(f, "G"),
            Self::M => write!(f, "M"),
            Self::T => write!(f, "T"),
        }
    }
}

/// Parameter values keyed by letter, first occurrence wins
///
/// A letter that appears without a number is present with value zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParamMap {
    values: [Option<f64>; 26],
}

impl ParamMap {
    fn slot(letter: char) -> Option<usize> {
        if letter.is_ascii_uppercase() {
            Some(letter as usize - 'A' as usize)
        } else {
            None
        }
    }

    /// Tokenize `args` into a map
    pub fn parse(args: &str) -> Self {
        let mut map = Self::default();
        let bytes = args.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i] as char;
            i += 1;
            let Some(slot) = Self::slot(c) else {
                continue;
            };
            let (value, used) = parse_number(&args[i..]);
            i += used;
            if map.values[slot].is_none() {
                map.values[slot] = Some(value.unwrap_or(0.0));
            }
        }
        map
    }

    pub fn has(&self, letter: char) -> bool {
        Self::slot(letter).is_some_and(|s| self.values[s].is_some())
    }

    pub fn get(&self, letter: char) -> Option<f64> {
        Self::slot(letter).and_then(|s| self.values[s])
    }

    /// Value of `letter` or `default` when absent
    pub fn get_or(&self, letter: char, default: f64) -> f64 {
        self.get(letter).unwrap_or(default)
    }

    /// Value of `letter` as a finite number
    pub fn finite(&self, letter: char) -> Result<Option<f64>, GcodeError> {
        match self.get(letter) {
            Some(v) if !v.is_finite() => Err(GcodeError::invalid(letter, "not a finite number")),
            other => Ok(other),
        }
    }

    /// Value of `letter` as a non-negative integer
    pub fn index(&self, letter: char) -> Result<Option<usize>, GcodeError> {
        match self.finite(letter)? {
            Some(v) if v < 0.0 => Err(GcodeError::invalid(letter, "must not be negative")),
            Some(v) => Ok(Some(v as usize)),
            None => Ok(None),
        }
    }

    /// Value for a logical axis
    pub fn axis(&self, axis: Axis) -> Option<f64> {
        self.get(axis.letter())
    }

    /// True when any of X, Y, Z or E is present
    pub fn has_any_axis(&self) -> bool {
        Axis::ALL.iter().any(|a| self.has(a.letter()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

/// Leading decimal number of `text` after optional spaces
///
/// Returns the value and the number of bytes consumed; nothing is consumed
/// when no digits follow.
fn parse_number(text: &str) -> (Option<f64>, usize) {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    let start = i;
    if i < bytes.len() && (bytes[i] == b'-' || bytes[i] == b'+') {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i == digits_start {
        return (None, 0);
    }
    match text[start..i].parse::<f64>() {
        Ok(v) => (Some(v), i),
        Err(_) => (None, 0),
    }
}

/// One parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeCommand {
    pub letter: CommandLetter,
    pub code: u32,
    /// `N` prefix, if the line had one
    pub line_number: Option<i64>,
    pub params: ParamMap,
    args: String,
    raw: String,
}

impl GcodeCommand {
    /// Parse a queued line
    ///
    /// Fails with [`GcodeError::UnknownCommand`] when the line has no
    /// `G`, `M` or `T` followed by a number.
    pub fn parse(text: &str) -> Result<Self, GcodeError> {
        let unknown = || GcodeError::UnknownCommand {
            command: text.trim().to_string(),
        };

        let mut rest = text.trim_start();
        let mut line_number = None;
        if let Some(after_n) = rest.strip_prefix('N') {
            let end = after_n
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
                .map(|(i, _)| i)
                .unwrap_or(after_n.len());
            line_number = after_n[..end].parse::<i64>().ok();
            rest = after_n[end..].trim_start();
        }

        let mut chars = rest.chars();
        let letter = match chars.next() {
            Some('G') => CommandLetter::G,
            Some('M') => CommandLetter::M,
            Some('T') => CommandLetter::T,
            _ => return Err(unknown()),
        };
        let after_letter = chars.as_str();
        let digits = after_letter
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after_letter.len());
        if digits == 0 {
            return Err(unknown());
        }
        let code = after_letter[..digits].parse::<u32>().map_err(|_| unknown())?;
        let args = after_letter[digits..].trim();

        Ok(Self {
            letter,
            code,
            line_number,
            params: ParamMap::parse(args),
            args: args.to_string(),
            raw: text.trim().to_string(),
        })
    }

    /// Everything after the command code, e.g. a file name or message
    pub fn string_arg(&self) -> &str {
        &self.args
    }

    /// The line as queued
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn has(&self, letter: char) -> bool {
        self.params.has(letter)
    }

    pub fn get(&self, letter: char) -> Option<f64> {
        self.params.get(letter)
    }
}

impl fmt::Display for GcodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letter, self.code)
    }
}
