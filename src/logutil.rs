//! Single-line previews of device traffic for the log.
//!
//! Serial lines and HTTP bodies can carry control characters and run to several
//! KiB; logs stay one line per event.

use std::fmt::Write;

/// Longest preview, in characters, before truncation.
pub const MAX_PREVIEW: usize = 160;

/// Escape `s` for single-line logging and cap it at [`MAX_PREVIEW`] characters.
///
/// `\n`, `\r`, `\t` and backslash are escaped; other control characters become
/// `\xNN`. Truncated output ends with `…(N chars)` giving the full length.
pub fn preview(s: &str) -> String {
    preview_with_limit(s, MAX_PREVIEW)
}

pub fn preview_with_limit(s: &str, limit: usize) -> String {
    let mut out = String::with_capacity(s.len().min(limit) + 16);
    for (count, ch) in s.chars().enumerate() {
        if count >= limit {
            let _ = write!(&mut out, "…({} chars)", s.chars().count());
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
