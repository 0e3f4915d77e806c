//! Small helpers for putting untrusted text into log lines.

/// Truncates `text` to at most `max_chars` characters.
///
/// Subprocess output and HTTP bodies can be arbitrarily large; log lines
/// carry only this prefix.
///
/// # Example
///
/// ```
/// use review_relay::text::preview;
///
/// assert_eq!(preview("héllo", 2), "hé");
/// assert_eq!(preview("short", 100), "short");
/// ```
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
