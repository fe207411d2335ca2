//! Helpers that keep message content and phone numbers log-safe.
//! Message bodies can span lines and contain control characters; senders are
//! personal data and only their tail is logged.

use std::fmt::Write;

/// Characters of a message body shown in a log preview.
pub const PREVIEW_CHARS: usize = 120;

/// Trailing characters of a sender address left readable.
const VISIBLE_SENDER_CHARS: usize = 4;

fn push_escaped(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\\' => out.push_str("\\\\"),
        c if c.is_control() => {
            let _ = write!(out, "\\u{{{:x}}}", u32::from(c));
        }
        c => out.push(c),
    }
}

/// Single-line preview of a message body. Line breaks, tabs and backslashes
/// are escaped, other control characters are written as `\u{..}`, and bodies
/// longer than [`PREVIEW_CHARS`] end in an ellipsis.
pub fn preview_text(body: &str) -> String {
    let mut out = String::with_capacity(body.len().min(PREVIEW_CHARS) + 4);
    let mut chars = body.chars();
    for c in chars.by_ref().take(PREVIEW_CHARS) {
        push_escaped(&mut out, c);
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}

/// Keep the last four characters of a sender address, mask the rest.
/// Short-code senders (four characters or fewer) are logged unchanged.
pub fn mask_sender(sender: &str) -> String {
    let hidden = sender.chars().count().saturating_sub(VISIBLE_SENDER_CHARS);
    sender
        .chars()
        .enumerate()
        .map(|(i, c)| match c {
            _ if i < hidden => '*',
            c if c.is_control() => '?',
            c => c,
        })
        .collect()
}
