//! Locating the start of the last N lines of a file without reading
//! the whole thing.

use std::io::{self, SeekFrom};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const BLOCK: usize = 4096;

/// Positions `file` so that sequential reads yield its last `count`
/// lines, returning the resulting offset.
///
/// Blocks are scanned backwards from the end for `count + 1` newlines;
/// the extra one is the terminator of the line before the wanted range
/// (usually the file's own final newline). A file ending without a
/// newline therefore starts one line early, trading exactness for a
/// single backwards pass. Files with fewer than `count` lines rewind
/// to offset zero.
pub(crate) async fn seek_last_lines(file: &mut File, count: u64) -> io::Result<u64> {
    let len = file.seek(SeekFrom::End(0)).await?;
    let mut needed = count.saturating_add(1);
    let mut end = len;
    let mut buf = [0u8; BLOCK];
    while end > 0 {
        let start = end.saturating_sub(BLOCK as u64);
        let chunk = (end - start) as usize;
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf[..chunk]).await?;
        for i in (0..chunk).rev() {
            if buf[i] == b'\n' {
                needed -= 1;
                if needed == 0 {
                    let pos = start + i as u64 + 1;
                    file.seek(SeekFrom::Start(pos)).await?;
                    return Ok(pos);
                }
            }
        }
        end = start;
    }
    file.seek(SeekFrom::Start(0)).await?;
    Ok(0)
}
