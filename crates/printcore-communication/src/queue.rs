//! Command queue
//!
//! Fixed-capacity ring of pending command lines shared by the three
//! producers (macro injector, serial reader, SD reader) and drained by the
//! dispatcher.
//!
//! # Guarantees
//! - Occupancy never exceeds the capacity; a full queue rejects new entries
//!   without touching existing ones
//! - Entries leave strictly in submission order
//! - The read index moves only when the consumer calls [`CommandQueue::advance`]
//!   after the command has been fully handled

use printcore_core::QueueError;
use std::fmt;

/// Where a queued command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// Host serial line
    Serial,
    /// SD card file
    Sd,
    /// Injected macro
    Injected,
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Sd => write!(f, "sd"),
            Self::Injected => write!(f, "injected"),
        }
    }
}

/// A queued command with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Command text, without terminator
    pub text: String,
    /// Acknowledge with `ok` once handled
    pub echo_ok: bool,
    /// Producer that queued the command
    pub source: CommandSource,
}

/// Ring buffer of pending commands
#[derive(Debug)]
pub struct CommandQueue {
    slots: Vec<Option<QueueEntry>>,
    read: usize,
    write: usize,
    len: usize,
    max_text_len: usize,
}

impl CommandQueue {
    /// Queue of `capacity` entries holding at most `max_cmd_size - 1` bytes each
    pub fn new(capacity: usize, max_cmd_size: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            read: 0,
            write: 0,
            len: 0,
            max_text_len: max_cmd_size.saturating_sub(1).max(1),
        }
    }

    /// Add a command
    ///
    /// Fails without side effects when the queue is full, the text is empty
    /// or it starts with a comment marker. Over-long text is truncated.
    pub fn enqueue(
        &mut self,
        text: &str,
        echo_ok: bool,
        source: CommandSource,
    ) -> Result<(), QueueError> {
        if text.starts_with(';') {
            return Err(QueueError::Comment);
        }
        if text.is_empty() {
            return Err(QueueError::Empty);
        }
        if self.is_full() {
            return Err(QueueError::Full {
                capacity: self.capacity(),
            });
        }

        let mut end = text.len().min(self.max_text_len);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.slots[self.write] = Some(QueueEntry {
            text: text[..end].to_string(),
            echo_ok,
            source,
        });
        self.write = (self.write + 1) % self.capacity();
        self.len += 1;
        tracing::trace!("Queued {} command: {}", source, &text[..end]);
        Ok(())
    }

    /// Boolean form of [`CommandQueue::enqueue`]
    pub fn try_enqueue(&mut self, text: &str, echo_ok: bool, source: CommandSource) -> bool {
        self.enqueue(text, echo_ok, source).is_ok()
    }

    /// Oldest entry, left in place
    pub fn peek(&self) -> Option<&QueueEntry> {
        if self.len == 0 {
            None
        } else {
            self.slots[self.read].as_ref()
        }
    }

    /// Release the oldest entry after it has been handled
    pub fn advance(&mut self) {
        if self.len == 0 {
            return;
        }
        self.slots[self.read] = None;
        self.read = (self.read + 1) % self.capacity();
        self.len -= 1;
    }

    /// Remove and return the oldest entry
    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        let entry = self.peek().cloned();
        if entry.is_some() {
            self.advance();
        }
        entry
    }

    /// Drop every pending entry
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.read = 0;
        self.write = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Free slots, reported in advanced acknowledgments
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Longest text stored per entry
    pub fn max_text_len(&self) -> usize {
        self.max_text_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_and_capacity() {
        let mut queue = CommandQueue::new(4, 96);
        for i in 0..4 {
            assert!(queue.try_enqueue(&format!("G1 X{i}"), true, CommandSource::Serial));
        }
        assert!(queue.is_full());
        assert_eq!(
            queue.enqueue("G1 X9", true, CommandSource::Serial),
            Err(QueueError::Full { capacity: 4 })
        );
        assert_eq!(queue.len(), 4);

        for i in 0..4 {
            assert_eq!(queue.dequeue().unwrap().text, format!("G1 X{i}"));
        }
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_comment_rejected() {
        let mut queue = CommandQueue::new(2, 96);
        assert_eq!(
            queue.enqueue("; just a comment", true, CommandSource::Serial),
            Err(QueueError::Comment)
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wraps_around() {
        let mut queue = CommandQueue::new(2, 96);
        for i in 0..10 {
            assert!(queue.try_enqueue(&format!("M{i}"), false, CommandSource::Sd));
            let entry = queue.peek().unwrap().clone();
            assert_eq!(entry.text, format!("M{i}"));
            assert_eq!(entry.source, CommandSource::Sd);
            queue.advance();
        }
        assert_eq!(queue.free(), 2);
    }

    #[test]
    fn test_long_text_truncated() {
        let mut queue = CommandQueue::new(1, 8);
        queue.enqueue("G1 X123456789", true, CommandSource::Serial).unwrap();
        assert_eq!(queue.peek().unwrap().text, "G1 X123");
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut queue = CommandQueue::new(3, 96);
        queue.enqueue("G28", true, CommandSource::Serial).unwrap();
        assert_eq!(queue.peek().unwrap().text, "G28");
        assert_eq!(queue.len(), 1);
        queue.advance();
        assert_eq!(queue.len(), 0);
    }
}
