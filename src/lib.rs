//! A library (and the `logmux` binary) merging multiple (namely log)
//! files into one chronologically ordered stream of lines.
//!
//! Lines are ordered by their *compare key*: everything up to the
//! first space, which is where a leading timestamp ends in most log
//! formats. Each file must already be ordered within itself, as
//! append-only logs naturally are; the merge across files is online
//! and reads every file once. Sources can be followed as they grow (a
//! multiplexed `tail -f`, driven by [`notify`](https://crates.io/crates/notify)),
//! surviving rotation and truncation, and a recognized
//! timestamp/facility prefix can be stripped off before comparison.
//!
//! ## Example
//!
//! ```no_run
//! use logmux::{FollowMode, MergeConfig, MergedLines};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut lines = MergedLines::new(MergeConfig {
//!         follow: FollowMode::Follow,
//!         ..MergeConfig::default()
//!     });
//!
//!     // Register some files to be merged. A file that cannot be
//!     // opened still takes part: it is retried while following.
//!     for path in ["some/file.log", "/some/other/file.log"] {
//!         if let Err(e) = lines.add_source(path).await {
//!             eprintln!("can't open '{}': {}", path, e);
//!         }
//!     }
//!
//!     while let Ok(Some(line)) = lines.next_line().await {
//!         print!("{}: {}", line.source().display(), line.text());
//!         println!();
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! Sources must be internally ordered by compare key; a line that is
//! out of order within its own file is emitted in file order, not
//! resorted. Timestamps are compared as raw bytes, so all sources need
//! the same stamp format (and time zone) for the merge to mean
//! anything.

mod events;
mod merge;
mod prefix;
mod source;
mod tail;

pub use events::{ChangeEvents, WatchError};
pub use merge::{ContinuationMode, FollowMode, MergeConfig, MergedLine, MergedLines};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
