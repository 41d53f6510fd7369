//! Everything related to noticing that a watched file may have grown,
//! shrunk, moved or reappeared.

use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::Watcher;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// How long a bounded [`ChangeEvents::wait`] lasts at most, so sources
/// whose file is currently gone get periodic reopen attempts.
pub(crate) const RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Interval of the fallback polling backend.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Settling delay after a notification, coalescing bursts of writes
/// into one wakeup.
const DEBOUNCE: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to add path to watch")]
    AddFailure,
    #[error("failed to remove path from watch")]
    RemoveFailure,
}

impl From<WatchError> for io::Error {
    fn from(e: WatchError) -> Self {
        io::Error::new(io::ErrorKind::Other, e.to_string())
    }
}

enum Backend {
    /// Platform file notification, proxied into a channel by the
    /// watcher's own thread.
    Notify {
        watcher: notify::RecommendedWatcher,
        rx: mpsc::UnboundedReceiver<Result<notify::Event, notify::Error>>,
    },
    /// No notification available (or polling explicitly requested):
    /// every wait simply sleeps.
    Poll { interval: Duration },
}

/// Watches a set of paths and can be asked to wait until one of them
/// has plausibly changed.
///
/// Which path changed is deliberately not reported: after the wait,
/// every source rechecks itself, which also covers events the platform
/// never delivers (such as writes through a rotated-away hard link).
/// Waits are debounced so a burst of writes costs one wakeup.
pub struct ChangeEvents {
    backend: Backend,
    watched: HashSet<PathBuf>,
    retry_interval: Duration,
    /// Deadline of an armed bounded wait. Kept here rather than in the
    /// future so a cancelled wait does not push the retry further out.
    retry_deadline: Option<Instant>,
    /// Deadline of an in-progress debounce, kept here for the same reason.
    debounce_deadline: Option<Instant>,
}

impl Debug for ChangeEvents {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        let backend = match &self.backend {
            Backend::Notify { .. } => "notify",
            Backend::Poll { .. } => "poll",
        };
        f.debug_struct("ChangeEvents")
            .field("backend", &backend)
            .field("watched", &self.watched)
            .finish()
    }
}

impl ChangeEvents {
    /// Constructs an instance backed by platform file notification.
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res| {
            // The only way `send` can fail is if the receiver is
            // dropped, and `ChangeEvents` controls both ends; still no
            // reason to risk a panic on the watcher thread.
            let _ = tx.send(res);
        })
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        Ok(Self::with_backend(Backend::Notify { watcher, rx }))
    }

    /// Constructs an instance that never watches anything and instead
    /// reports a possible change every `interval`.
    pub fn with_poll_interval(interval: Duration) -> Self {
        Self::with_backend(Backend::Poll { interval })
    }

    fn with_backend(backend: Backend) -> Self {
        ChangeEvents {
            backend,
            watched: HashSet::new(),
            retry_interval: RETRY_INTERVAL,
            retry_deadline: None,
            debounce_deadline: None,
        }
    }

    pub(crate) fn set_retry_interval(&mut self, interval: Duration) {
        self.retry_interval = interval;
    }

    /// Starts watching `path`, replacing any earlier registration.
    ///
    /// Replacement matters after rotation: the old watch follows the
    /// renamed inode, not the path, so reopening must watch afresh.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let path = path.as_ref();
        if let Backend::Notify { watcher, .. } = &mut self.backend {
            if self.watched.contains(path) {
                let _ = watcher.unwatch(path);
            }
            watcher
                .watch(path, notify::RecursiveMode::NonRecursive)
                .map_err(|_e| WatchError::AddFailure)?;
        }
        self.watched.insert(path.to_path_buf());
        Ok(())
    }

    /// Stops watching `path`. Unknown paths are ignored.
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let path = path.as_ref();
        if self.watched.remove(path) {
            if let Backend::Notify { watcher, .. } = &mut self.backend {
                watcher
                    .unwatch(path)
                    .map_err(|_e| WatchError::RemoveFailure)?;
            }
        }
        Ok(())
    }

    /// Waits until a watched path has plausibly changed, or (when
    /// `bounded`) until the retry interval has elapsed, whichever comes
    /// first.
    ///
    /// Cancellation-safe: a dropped wait loses no events (they stay
    /// queued in the channel) and does not reset a running deadline.
    pub async fn wait(&mut self, bounded: bool) {
        match &mut self.backend {
            Backend::Poll { interval } => time::sleep(*interval).await,
            Backend::Notify { rx, .. } => {
                if self.debounce_deadline.is_none() {
                    let received = if bounded {
                        let deadline = *self
                            .retry_deadline
                            .get_or_insert_with(|| Instant::now() + self.retry_interval);
                        match time::timeout_at(deadline, rx.recv()).await {
                            Ok(Some(_)) => true,
                            // The channel cannot close while the watcher
                            // lives; if it somehow does, wait out the
                            // deadline instead of spinning.
                            Ok(None) => {
                                time::sleep_until(deadline).await;
                                false
                            }
                            Err(_) => false,
                        }
                    } else {
                        match rx.recv().await {
                            Some(_) => true,
                            None => {
                                time::sleep(POLL_INTERVAL).await;
                                false
                            }
                        }
                    };
                    self.retry_deadline = None;
                    if !received {
                        return;
                    }
                    self.debounce_deadline = Some(Instant::now() + DEBOUNCE);
                }

                // Let the burst settle, then drain whatever queued up
                // meanwhile; it is all answered by the one recheck the
                // caller is about to do.
                if let Some(deadline) = self.debounce_deadline {
                    time::sleep_until(deadline).await;
                }
                self.debounce_deadline = None;
                while rx.try_recv().is_ok() {}
            }
        }
    }
}
