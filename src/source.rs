//! Per-file read state: opening, line accumulation, end-of-file
//! handling and rotation detection.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use crate::events::ChangeEvents;
use crate::merge::{ContinuationMode, MergeConfig};
use crate::prefix;
use crate::tail;

/// Identity of an open file, for noticing rotation by rename.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FileId {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    fn of(md: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        FileId {
            dev: md.dev(),
            ino: md.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(_md: &std::fs::Metadata) -> Self {
        // No stable identity to compare; rotation is then caught by the
        // size check alone.
        FileId {}
    }
}

/// Outcome of one [`Source::advance`] attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Advance {
    /// The buffer holds a complete line, ready to compare and emit.
    Ready,
    /// Nothing more right now; worth retrying after a change event.
    Pending,
    /// No data and no way of getting more this cycle.
    Exhausted,
}

enum Recheck {
    Same,
    Rotated,
    Gone,
}

/// One registered file and everything read from it so far.
///
/// The line buffer survives reopen: an entry cut in half by rotation is
/// completed from the successor file.
pub(crate) struct Source {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    id: Option<FileId>,
    /// Bytes consumed from the current file, compared against its size
    /// to notice truncation.
    offset: u64,
    buf: Vec<u8>,
}

impl Source {
    pub(crate) fn new(path: PathBuf) -> Self {
        Source {
            path,
            reader: None,
            id: None,
            offset: 0,
            buf: Vec::new(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// A source is ready exactly when its buffer ends in a newline.
    pub(crate) fn is_ready(&self) -> bool {
        self.buf.last() == Some(&b'\n')
    }

    pub(crate) fn line(&self) -> &[u8] {
        &self.buf
    }

    /// Hands the buffered line over, leaving the source due a refill.
    pub(crate) fn take_line(&mut self) -> Vec<u8> {
        debug_assert!(self.is_ready());
        std::mem::take(&mut self.buf)
    }

    /// Drops the buffered line unemitted (duplicate suppression).
    pub(crate) fn discard_line(&mut self) {
        self.buf.clear();
    }

    /// Opens the configured path and registers it for change events.
    ///
    /// Directories are rejected here rather than surfacing as read
    /// errors later. The line buffer is deliberately left as-is.
    pub(crate) async fn open(&mut self, events: &mut ChangeEvents) -> io::Result<()> {
        let file = File::open(&self.path).await?;
        let md = file.metadata().await?;
        if md.is_dir() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "is a directory"));
        }
        self.id = Some(FileId::of(&md));
        self.offset = 0;
        // A watch from before a rotation points at the old file.
        let _ = events.watch(&self.path);
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    /// Seeks a freshly opened source to end-of-file, so only data
    /// appended from now on is read.
    pub(crate) async fn seek_to_end(&mut self) {
        if let Some(reader) = self.reader.as_mut() {
            if let Ok(pos) = reader.get_mut().seek(SeekFrom::End(0)).await {
                self.offset = pos;
            }
        }
    }

    /// Seeks a freshly opened source so reading starts at its last
    /// `count` lines. On failure the source falls back to the start.
    pub(crate) async fn seek_last_lines(&mut self, count: u64) {
        if let Some(reader) = self.reader.as_mut() {
            let file = reader.get_mut();
            match tail::seek_last_lines(file, count).await {
                Ok(pos) => self.offset = pos,
                Err(_) => {
                    self.offset = 0;
                    let _ = file.seek(SeekFrom::Start(0)).await;
                }
            }
        }
    }

    /// Tries to make the buffer hold the next complete line.
    ///
    /// Cancellation-safe: all progress lives in `self`, so a dropped
    /// call costs at most a retry of one `read`.
    pub(crate) async fn advance(
        &mut self,
        events: &mut ChangeEvents,
        config: &MergeConfig,
    ) -> Advance {
        loop {
            if self.reader.is_none() {
                if !config.follow.is_follow() {
                    return Advance::Exhausted;
                }
                // Reopen attempts stay quiet; whoever registered the
                // source already reported the initial failure.
                if self.open(events).await.is_err() {
                    return Advance::Pending;
                }
            }
            if self.is_ready() && config.continuation == ContinuationMode::Replace {
                self.buf.clear();
            }

            let reader = self.reader.as_mut().unwrap();
            match reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) => {
                    if !config.follow.is_follow() {
                        self.close();
                        return self.finish_line(config);
                    }
                    match self.recheck().await {
                        Recheck::Same => return Advance::Pending,
                        // Reopen and read right away; the replacement
                        // file may already have lines.
                        Recheck::Rotated => continue,
                        Recheck::Gone => return Advance::Pending,
                    }
                }
                Ok(n) => {
                    self.offset += n as u64;
                    if self.is_ready() {
                        self.normalize(config);
                        return Advance::Ready;
                    }
                    // Stopped short of a newline, so the file is at its
                    // end; read again and let the `Ok(0)` arm decide.
                    continue;
                }
                Err(e) => {
                    eprintln!("logmux: error reading '{}': {}", self.path.display(), e);
                    self.buf.clear();
                    self.close();
                    return Advance::Exhausted;
                }
            }
        }
    }

    fn close(&mut self) {
        self.reader = None;
        self.id = None;
    }

    /// Terminal end-of-file: an unterminated trailing line is still
    /// emitted, with the newline every emitted line carries.
    fn finish_line(&mut self, config: &MergeConfig) -> Advance {
        if self.buf.is_empty() {
            return Advance::Exhausted;
        }
        if !self.is_ready() {
            self.buf.push(b'\n');
            self.normalize(config);
        }
        Advance::Ready
    }

    /// At end-of-file under follow, decides whether this is still the
    /// file the path names. A new identity or a size shrunk below our
    /// offset closes the handle for reopening; a vanished path closes
    /// it and leaves reopening to the periodic retry.
    async fn recheck(&mut self) -> Recheck {
        match fs::metadata(&self.path).await {
            Err(_) => {
                eprintln!("logmux: '{}' is gone, waiting for it to return", self.path.display());
                self.close();
                Recheck::Gone
            }
            Ok(md) => {
                if Some(FileId::of(&md)) != self.id || self.offset > md.len() {
                    eprintln!("logmux: '{}' was rotated, reopening", self.path.display());
                    self.close();
                    Recheck::Rotated
                } else {
                    Recheck::Same
                }
            }
        }
    }

    fn normalize(&mut self, config: &MergeConfig) {
        if config.strip_prefix {
            if let Some(n) = prefix::prefix_len(&self.buf) {
                self.buf.drain(..n);
            }
        }
    }
}
