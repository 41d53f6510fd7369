//! Recognizing the timestamp/facility prefix some loggers put in front
//! of every line.
//!
//! Two stamp shapes are recognized:
//!
//! - ISO-like, `2024-01-10T17:57:34.40282` (also `_` instead of `T`):
//!   up to the first space there must be exactly 19 digits, two `-`,
//!   one `T`/`_` and two `:`, with `.` tolerated and nothing else. The
//!   digit tally includes the five fractional digits, so a bare
//!   `YYYY-mm-ddTHH:MM:SS` is deliberately not a match.
//! - TAI64N hex, `@4000000065a07a8e011726e4`: `@` followed by 24 hex
//!   digits before the first space.
//!
//! The stamp must be followed by a facility tag ending in `:` (say
//! `daemon.notice:`), optionally a legacy syslog date the daemon echoed
//! (`Jan 10 19:17:56`), and then the message body.

/// Returns how many leading bytes of `line` form a recognized
/// timestamp/facility prefix, separator space included, so that
/// `line[n..]` is the message body. `None` leaves the line alone.
///
/// `line` is expected to be a complete line; running out of bytes
/// mid-pattern is treated as "no prefix" rather than a partial strip.
pub(crate) fn prefix_len(line: &[u8]) -> Option<usize> {
    let ts_end = match line.first()? {
        b'0'..=b'9' => iso_end(line)?,
        b'@' => tai_end(line)?,
        _ => return None,
    };

    // Facility tag: the next token must end with ':' right before a space.
    let mut k = ts_end + 1;
    while k < line.len() && line[k] != b' ' {
        k += 1;
    }
    if k >= line.len() || line[k - 1] != b':' {
        return None;
    }

    // Some daemons echo a syslog date after the tag: " Jan 10 19:17:56".
    if k + 16 < line.len() && line[k + 10] == b':' && line[k + 13] == b':' {
        k += 16;
    }

    if k + 1 >= line.len() || line[k] != b' ' {
        return None;
    }
    Some(k + 1)
}

/// Index of the space ending an ISO-like stamp, if the leading token
/// tallies up as one.
fn iso_end(line: &[u8]) -> Option<usize> {
    let (mut digits, mut dashes, mut seps, mut colons) = (0, 0, 0, 0);
    let mut i = 0;
    while i < line.len() && line[i] != b' ' {
        match line[i] {
            b'0'..=b'9' => digits += 1,
            b'-' => dashes += 1,
            b'T' | b'_' => seps += 1,
            b':' => colons += 1,
            b'.' => {}
            _ => return None,
        }
        i += 1;
    }
    if i < line.len() && digits == 19 && dashes == 2 && seps == 1 && colons == 2 {
        Some(i)
    } else {
        None
    }
}

/// Index of the space ending a `@`-prefixed TAI64N stamp.
fn tai_end(line: &[u8]) -> Option<usize> {
    let mut hex = 0;
    let mut i = 1;
    while i < line.len() && line[i] != b' ' {
        if line[i].is_ascii_hexdigit() {
            hex += 1;
        }
        i += 1;
    }
    if i < line.len() && hex == 24 {
        Some(i)
    } else {
        None
    }
}
