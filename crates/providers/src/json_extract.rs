//! Best-effort extraction of one JSON payload from free-form model output.
//!
//! Models often wrap the requested JSON in prose or Markdown fences. The
//! scanner walks every `{`/`[` opener in order, finds its balanced closing
//! bracket (ignoring brackets inside string literals) and returns the first
//! span that parses as JSON.

/// Find the first well-formed JSON object or array span in `text`.
///
/// Total over all inputs: returns `None` rather than failing when nothing
/// usable is present.
#[must_use]
pub fn extract_json_payload(text: &str) -> Option<&str> {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .filter_map(|(start, _)| balanced_span(text, start))
        .find(|span| serde_json::from_str::<serde::de::IgnoredAny>(span).is_ok())
}

/// The balanced bracket span opening at byte `start`, if it closes.
fn balanced_span(text: &str, start: usize) -> Option<&str> {
    let tail = &text[start..];
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in tail.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {},
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&tail[..offset + c.len_utf8()]);
                }
            },
            _ => {},
        }
    }
    None
}
