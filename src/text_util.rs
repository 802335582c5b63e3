use std::sync::LazyLock;

use regex::Regex;

/// Line prefix introducing a post's body inside a chunk.
pub const CONTENT_MARKER: &str = "- **Content**:";

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("markup pattern is valid"));

/// Remove `<...>` tags, keeping the text between them.
pub fn strip_markup(text: &str) -> String {
    MARKUP.replace_all(text, "").into_owned()
}

/// Short single-line preview of a chunk's post body.
///
/// Takes the lines after the first [`CONTENT_MARKER`] line (the whole
/// chunk when there is none), joins them with spaces, strips markup and
/// keeps at most `max_chars` characters. `"..."` is appended only when
/// text was cut off.
pub fn extract_preview(content: &str, max_chars: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.starts_with(CONTENT_MARKER))
        .map_or(0, |i| i + 1);

    let joined = lines[start..].join(" ");
    let body = strip_markup(joined.trim());
    let body = body.trim();

    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
