//! SD card printing
//!
//! [`SdCard`] abstracts the card's file system; [`SdReader`] owns the
//! mount/open/print state and turns the open file into queued commands.

use crate::queue::{CommandQueue, CommandSource};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read-only view of an SD card's files
pub trait SdCard: Send {
    /// File names and sizes in the card root
    fn list(&self) -> io::Result<Vec<(String, u64)>>;

    /// Full contents of `name`
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// Card backed by a host directory
#[derive(Debug, Clone)]
pub struct DirectorySdCard {
    root: PathBuf,
}

impl DirectorySdCard {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let name = name.trim().trim_start_matches('/');
        if name.is_empty() || name.split('/').any(|part| part == "..") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name {:?}", name),
            ));
        }
        Ok(self.root.join(name))
    }
}

impl SdCard for DirectorySdCard {
    fn list(&self) -> io::Result<Vec<(String, u64)>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() {
                files.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
            }
        }
        files.sort();
        Ok(files)
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(name)?)
    }
}

/// Card held in memory, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemorySdCard {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemorySdCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, contents: &str) {
        self.files
            .lock()
            .insert(name.to_string(), contents.as_bytes().to_vec());
    }
}

impl SdCard for MemorySdCard {
    fn list(&self) -> io::Result<Vec<(String, u64)>> {
        Ok(self
            .files
            .lock()
            .iter()
            .map(|(name, data)| (name.clone(), data.len() as u64))
            .collect())
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .get(name.trim())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not found", name)))
    }
}

/// Result of one SD poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdEvent {
    /// The open file was read to the end
    Finished { file: String },
}

#[derive(Debug)]
struct OpenFile {
    name: String,
    data: Vec<u8>,
    pos: usize,
}

/// Mount, file and print state of the SD card
pub struct SdReader {
    card: Option<Box<dyn SdCard>>,
    mounted: bool,
    file: Option<OpenFile>,
    printing: bool,
    line: Vec<u8>,
    comment_mode: bool,
    stop_buffering: bool,
    max_len: usize,
}

impl SdReader {
    pub fn new(card: Option<Box<dyn SdCard>>, max_cmd_size: usize) -> Self {
        Self {
            card,
            mounted: false,
            file: None,
            printing: false,
            line: Vec::with_capacity(max_cmd_size),
            comment_mode: false,
            stop_buffering: false,
            max_len: max_cmd_size.saturating_sub(1).max(1),
        }
    }

    pub fn has_card(&self) -> bool {
        self.card.is_some()
    }

    /// M21
    pub fn mount(&mut self) -> io::Result<()> {
        if self.card.is_none() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "No SD card"));
        }
        self.mounted = true;
        tracing::info!("SD card ok");
        Ok(())
    }

    /// M22
    pub fn release(&mut self) {
        self.mounted = false;
        self.printing = false;
        self.file = None;
        self.reset_line();
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn card(&self) -> io::Result<&dyn SdCard> {
        match (&self.card, self.mounted) {
            (Some(card), true) => Ok(card.as_ref()),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "SD card not mounted")),
        }
    }

    /// M20
    pub fn list(&self) -> io::Result<Vec<(String, u64)>> {
        self.card()?.list()
    }

    /// M23: open `name` for printing, returning its size
    pub fn open(&mut self, name: &str) -> io::Result<u64> {
        let data = self.card()?.read(name)?;
        let size = data.len() as u64;
        self.printing = false;
        self.file = Some(OpenFile {
            name: name.trim().to_string(),
            data,
            pos: 0,
        });
        self.reset_line();
        tracing::info!("Opened SD file {} ({} bytes)", name.trim(), size);
        Ok(size)
    }

    /// M24: start or resume printing the open file
    pub fn start(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "No file open"));
        }
        self.printing = true;
        Ok(())
    }

    /// M25
    pub fn pause(&mut self) {
        self.printing = false;
    }

    pub fn is_printing(&self) -> bool {
        self.printing
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file.as_ref().map(|f| f.name.as_str())
    }

    /// Bytes consumed and file size, for M27
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.file.as_ref().map(|f| (f.pos, f.data.len()))
    }

    fn reset_line(&mut self) {
        self.line.clear();
        self.comment_mode = false;
        self.stop_buffering = false;
    }

    /// Move lines from the open file into the queue
    ///
    /// A `#` outside a comment ends the line and pauses buffering until the
    /// queue has drained. Reaching the end of the file flushes the last line
    /// and reports [`SdEvent::Finished`].
    pub fn poll(&mut self, queue: &mut CommandQueue) -> Option<SdEvent> {
        if !self.printing {
            return None;
        }
        if queue.is_empty() {
            self.stop_buffering = false;
        }

        while !queue.is_full() && !self.stop_buffering {
            let file = self.file.as_mut()?;
            let next = file.data.get(file.pos).copied();
            let Some(byte) = next else {
                let name = file.name.clone();
                self.commit_line(queue);
                self.printing = false;
                tracing::info!("Done printing file {}", name);
                return Some(SdEvent::Finished { file: name });
            };
            file.pos += 1;

            let terminator = matches!(byte, b'\n' | b'\r')
                || (matches!(byte, b'#' | b':') && !self.comment_mode);
            if terminator {
                if byte == b'#' {
                    self.stop_buffering = true;
                }
                self.comment_mode = false;
                self.commit_line(queue);
            } else if self.line.len() >= self.max_len {
                // Over-long line: skip to the terminator.
            } else {
                if byte == b';' {
                    self.comment_mode = true;
                }
                if !self.comment_mode {
                    self.line.push(byte);
                }
            }
        }
        None
    }

    fn commit_line(&mut self, queue: &mut CommandQueue) {
        if self.line.is_empty() {
            return;
        }
        let raw = std::mem::take(&mut self.line);
        let text = String::from_utf8_lossy(&raw);
        let text = text.trim();
        if !text.is_empty() && !queue.try_enqueue(text, false, CommandSource::Sd) {
            tracing::warn!("Dropped SD line {:?}", text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_with(contents: &str) -> SdReader {
        let card = MemorySdCard::new();
        card.insert("part.gco", contents);
        let mut reader = SdReader::new(Some(Box::new(card)), 96);
        reader.mount().unwrap();
        reader.open("part.gco").unwrap();
        reader.start().unwrap();
        reader
    }

    #[test]
    fn test_lines_and_eof() {
        let mut reader = reader_with("G28\n; comment\nG1 X10 ; move\nM84");
        let mut queue = CommandQueue::new(8, 96);
        let event = reader.poll(&mut queue);
        assert_eq!(
            event,
            Some(SdEvent::Finished {
                file: "part.gco".into()
            })
        );
        let texts: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(
            texts.iter().map(|e| e.text.as_str()).collect::<Vec<_>>(),
            vec!["G28", "G1 X10", "M84"]
        );
        assert!(texts.iter().all(|e| !e.echo_ok && e.source == CommandSource::Sd));
        assert!(!reader.is_printing());
    }

    #[test]
    fn test_colon_splits_and_comment_keeps_colon() {
        let mut reader = reader_with("G28:G1 X1\nM117 ; a:b\n");
        let mut queue = CommandQueue::new(8, 96);
        reader.poll(&mut queue);
        assert_eq!(queue.dequeue().unwrap().text, "G28");
        assert_eq!(queue.dequeue().unwrap().text, "G1 X1");
        assert_eq!(queue.dequeue().unwrap().text, "M117");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_hash_pauses_until_drained() {
        let mut reader = reader_with("G28#G1 X1\n");
        let mut queue = CommandQueue::new(8, 96);
        assert_eq!(reader.poll(&mut queue), None);
        assert_eq!(queue.len(), 1);
        // Not drained yet, nothing more is read.
        assert_eq!(reader.poll(&mut queue), None);
        assert_eq!(queue.len(), 1);
        queue.advance();
        assert!(reader.poll(&mut queue).is_some());
        assert_eq!(queue.dequeue().unwrap().text, "G1 X1");
    }

    #[test]
    fn test_respects_queue_capacity() {
        let mut reader = reader_with("G1 X1\nG1 X2\nG1 X3\n");
        let mut queue = CommandQueue::new(2, 96);
        assert_eq!(reader.poll(&mut queue), None);
        assert_eq!(queue.len(), 2);
        assert_eq!(reader.progress(), Some((12, 18)));
    }

    #[test]
    fn test_requires_mount() {
        let mut reader = SdReader::new(Some(Box::new(MemorySdCard::new())), 96);
        assert!(reader.list().is_err());
        assert!(reader.open("x").is_err());
        assert!(reader.start().is_err());
        let mut empty = SdReader::new(None, 96);
        assert!(empty.mount().is_err());
    }

    #[test]
    fn test_directory_card() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.gco"), "G28\n").unwrap();
        let card = DirectorySdCard::new(dir.path());
        assert_eq!(card.list().unwrap(), vec![("a.gco".to_string(), 4)]);
        assert_eq!(card.read("a.gco").unwrap(), b"G28\n");
        assert!(card.read("../etc/passwd").is_err());
    }
}
