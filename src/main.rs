use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;

use logmux::{FollowMode, MergeConfig, MergedLines};

/// Merge log files into one chronologically ordered stream.
///
/// Lines are ordered by everything before their first space, which is
/// where a leading timestamp ends. Each file must already be ordered
/// within itself.
#[derive(Debug, Parser)]
#[command(name = "logmux", version, about)]
struct Args {
    /// Keep watching for appended data; twice to skip existing content
    #[arg(short = 'f', action = clap::ArgAction::Count)]
    follow: u8,

    /// Start with only the last COUNT lines of each file
    #[arg(short = 'n', long = "lines", value_name = "COUNT",
          value_parser = clap::value_parser!(u64).range(1..))]
    lines: Option<u64>,

    /// Strip recognized timestamp and facility prefixes
    #[arg(short = 's', long = "strip")]
    strip: bool,

    /// Print identical simultaneous lines only once
    #[arg(short = 'u', long = "unique")]
    unique: bool,

    /// Recheck files every SECONDS instead of using file notification
    #[arg(long = "poll", value_name = "SECONDS",
          value_parser = clap::value_parser!(u64).range(1..))]
    poll: Option<u64>,

    /// Files to merge
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let follow = match args.follow {
        0 => FollowMode::Off,
        1 => FollowMode::Follow,
        _ => FollowMode::FromEnd,
    };
    let mut lines = MergedLines::new(MergeConfig {
        follow,
        strip_prefix: args.strip,
        dedup: args.unique,
        tail_count: args.lines,
        poll_interval: args.poll.map(Duration::from_secs),
        ..MergeConfig::default()
    });

    for path in &args.files {
        if let Err(e) = lines.add_source(path.clone()).await {
            eprintln!("logmux: can't open '{}': {}", path.display(), e);
        }
    }

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    // Under follow, lines trickle in; buffering them up would defeat
    // the point.
    let flush_each = follow != FollowMode::Off;

    while let Some(line) = lines.next_line().await? {
        if let Err(e) = emit(&mut out, line.bytes(), flush_each) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                // The reader went away, say `logmux ... | head`.
                return Ok(());
            }
            return Err(e).context("writing to stdout");
        }
    }
    match out.flush() {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other.context("writing to stdout"),
    }
}

fn emit(out: &mut impl Write, bytes: &[u8], flush: bool) -> io::Result<()> {
    out.write_all(bytes)?;
    if flush {
        out.flush()?;
    }
    Ok(())
}
