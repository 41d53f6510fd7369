//! Everything related to choosing which source's line is emitted next.

use std::cmp::Ordering;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::pin_mut;
use futures_util::stream::Stream;

use crate::events::{self, ChangeEvents};
use crate::source::Source;

/// Whether to keep watching sources once the existing data runs out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FollowMode {
    /// Stop once every source is exhausted.
    #[default]
    Off,
    /// After draining existing content, keep waiting for more.
    Follow,
    /// Skip existing content entirely and follow from the current end.
    FromEnd,
}

impl FollowMode {
    pub(crate) fn is_follow(self) -> bool {
        !matches!(self, FollowMode::Off)
    }
}

/// What happens to a completed line that was not emitted before its
/// source is read again.
///
/// With `Replace` the old line is dropped in favor of the newer one,
/// so a slow consumer in follow mode sees each source's latest
/// complete line. `Append` glues the new bytes onto the old line
/// instead, which keeps continuation lines (no timestamp of their own,
/// so they would sort adrift) attached to the entry they belong to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContinuationMode {
    #[default]
    Replace,
    Append,
}

/// Options for a [`MergedLines`] instance.
#[derive(Clone, Debug)]
pub struct MergeConfig {
    pub follow: FollowMode,
    /// Strip recognized timestamp/facility prefixes from lines before
    /// they are compared or emitted.
    pub strip_prefix: bool,
    /// Emit only one copy of identical lines that are ready on several
    /// sources at the same moment.
    pub dedup: bool,
    /// Start each source at its last this-many lines instead of the
    /// beginning. Ignored under [`FollowMode::FromEnd`].
    pub tail_count: Option<u64>,
    pub continuation: ContinuationMode,
    /// Forgo file notification and recheck sources at this fixed
    /// interval instead.
    pub poll_interval: Option<Duration>,
    /// How often sources whose file is currently gone get a reopen
    /// attempt while following.
    pub retry_interval: Duration,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            follow: FollowMode::Off,
            strip_prefix: false,
            dedup: false,
            tail_count: None,
            continuation: ContinuationMode::Replace,
            poll_interval: None,
            retry_interval: events::RETRY_INTERVAL,
        }
    }
}

/// One merged line, tagged with the path it came from.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MergedLine {
    source: PathBuf,
    line: Vec<u8>,
}

impl MergedLine {
    /// The path of the file this line was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The line's bytes, normalization applied, trailing newline
    /// included (added if the file ended without one).
    pub fn bytes(&self) -> &[u8] {
        &self.line
    }

    /// The line as text for display, trailing newline trimmed.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        let trimmed = self.line.strip_suffix(b"\n").unwrap_or(&self.line);
        String::from_utf8_lossy(trimmed)
    }

    /// Returns the parts that make up the line.
    pub fn into_inner(self) -> (PathBuf, Vec<u8>) {
        (self.source, self.line)
    }
}

/// Orders two lines by compare key: their bytes up to the first space,
/// which is where a leading timestamp ends.
///
/// A line that runs out compares as if padded with `0x00`, so a short
/// key sorts before a longer one it prefixes, and the terminating
/// newline takes part like any other byte.
fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    let mut i = 0;
    loop {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x.cmp(&y);
        }
        if x == 0 || x == b' ' {
            return Ordering::Equal;
        }
        i += 1;
    }
}

/// Merges a set of (namely log) files into one chronologically ordered
/// stream of lines.
///
/// Each source file must itself be in ascending compare-key order, as
/// append-only logs naturally are; `MergedLines` then interleaves them
/// into one ordered stream, online, reading each file once. In follow
/// mode it keeps going as the files grow, surviving rotation and
/// truncation.
///
/// Also implements [`futures_util::Stream`] for `poll`-based callers.
pub struct MergedLines {
    sources: Vec<Source>,
    events: ChangeEvents,
    config: MergeConfig,
}

impl std::fmt::Debug for MergedLines {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        f.debug_struct("MergedLines")
            .field("sources", &self.sources.len())
            .field("events", &self.events)
            .finish()
    }
}

impl MergedLines {
    /// Creates an instance for `config`.
    ///
    /// When following is requested and platform file notification
    /// cannot be set up, this degrades to polling with a diagnostic
    /// rather than failing: the merge itself needs no watcher.
    pub fn new(config: MergeConfig) -> Self {
        let mut events = match (config.follow.is_follow(), config.poll_interval) {
            // Never waited on: without follow the merge stops at the
            // first moment nothing is ready.
            (false, _) => ChangeEvents::with_poll_interval(events::POLL_INTERVAL),
            (true, Some(interval)) => ChangeEvents::with_poll_interval(interval),
            (true, None) => ChangeEvents::new().unwrap_or_else(|e| {
                eprintln!("logmux: file notification unavailable ({}), polling instead", e);
                ChangeEvents::with_poll_interval(events::POLL_INTERVAL)
            }),
        };
        events.set_retry_interval(config.retry_interval);

        MergedLines {
            sources: Vec::new(),
            events,
            config,
        }
    }

    /// Registers `path` as a source and tries to open it.
    ///
    /// The source is kept even when the open fails (under follow it is
    /// retried until the file appears), and the error is returned so
    /// the caller can report it once. Ordering across sources with
    /// equal keys follows registration order.
    pub async fn add_source(&mut self, path: impl Into<PathBuf>) -> io::Result<PathBuf> {
        let path = path.into();
        let mut source = Source::new(path.clone());
        let opened = source.open(&mut self.events).await;
        if opened.is_ok() {
            match (self.config.follow, self.config.tail_count) {
                (FollowMode::FromEnd, _) => source.seek_to_end().await,
                (_, Some(count)) => source.seek_last_lines(count).await,
                _ => {}
            }
        }
        self.sources.push(source);
        opened.map(|()| path)
    }

    /// Produces the next line in merged order.
    ///
    /// `Ok(None)` means every source is exhausted and follow mode is
    /// off; in follow mode the future instead stays pending until more
    /// data arrives. Per-source read failures do not surface here:
    /// they are reported to stderr and the affected source drops out
    /// (or is retried under follow), so one bad file cannot silence
    /// the others.
    ///
    /// Cancellation-safe: buffered lines, read offsets and queued
    /// change events all live in `self`, not in the returned future.
    pub async fn next_line(&mut self) -> io::Result<Option<MergedLine>> {
        loop {
            for i in 0..self.sources.len() {
                if !self.sources[i].is_ready() {
                    self.sources[i].advance(&mut self.events, &self.config).await;
                }
            }

            if let Some(best) = self.select() {
                let line = self.sources[best].take_line();
                if self.config.dedup {
                    for (i, other) in self.sources.iter_mut().enumerate() {
                        if i != best && other.is_ready() && other.line() == line.as_slice() {
                            other.discard_line();
                        }
                    }
                }
                let source = self.sources[best].path().to_path_buf();
                return Ok(Some(MergedLine { source, line }));
            }

            if !self.config.follow.is_follow() {
                return Ok(None);
            }
            // Bound the wait whenever some source needs a reopen
            // attempt that no event will announce.
            let reopen_pending = self.sources.iter().any(|s| !s.is_open());
            self.events.wait(reopen_pending).await;
        }
    }

    /// Index of the ready source with the smallest key; ties keep the
    /// earliest-registered source.
    fn select(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, source) in self.sources.iter().enumerate() {
            if !source.is_ready() {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) => {
                    if compare_keys(self.sources[b].line(), source.line()) == Ordering::Greater {
                        best = Some(i);
                    }
                }
            }
        }
        best
    }
}

impl Stream for MergedLines {
    type Item = io::Result<MergedLine>;

    /// Polls [`MergedLines::next_line`]. The future is recreated on
    /// every call, which is fine since all progress state lives in the
    /// struct itself.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let fut = this.next_line();
        pin_mut!(fut);
        fut.poll(cx).map(|res| res.transpose())
    }
}
