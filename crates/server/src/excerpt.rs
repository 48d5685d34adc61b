use crate::planner::question_tokens;

pub const WINDOW_CHARS: usize = 520;
pub const WINDOW_STRIDE: usize = 320;
pub const MIN_PICK_DISTANCE: usize = 220;

/// Char-boundary-safe truncation.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone)]
struct Window {
    start: usize,
    text: String,
    score: usize,
}

/// Selects the most question-relevant windows from long extracted text.
///
/// The text is sliced into overlapping 520-char windows (stride 320); each is
/// scored by how many question tokens it contains. Up to `max_chunks` winners
/// are kept, at least 220 chars apart, and emitted in original order joined
/// by blank lines. When nothing scores, the head of the text is used instead.
pub fn build_excerpt(
    text: &str,
    normalized_question: &str,
    max_total_chars: usize,
    max_chunks: usize,
) -> String {
    let text = text.trim();
    if text.is_empty() || max_total_chars == 0 || max_chunks == 0 {
        return String::new();
    }

    let tokens = question_tokens(normalized_question);
    let chars = text.chars().collect::<Vec<_>>();

    if chars.len() <= WINDOW_CHARS || tokens.is_empty() {
        return truncate_chars(text, max_total_chars);
    }

    let mut windows = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + WINDOW_CHARS).min(chars.len());
        let window_text = chars[start..end].iter().collect::<String>();
        let lower = window_text.to_lowercase();
        let score = tokens.iter().filter(|t| lower.contains(t.as_str())).count();
        windows.push(Window {
            start,
            text: window_text,
            score,
        });
        if end == chars.len() {
            break;
        }
        start += WINDOW_STRIDE;
    }

    let mut ranked = windows
        .iter()
        .filter(|w| w.score > 0)
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));

    let mut picked: Vec<&Window> = Vec::new();
    for window in ranked {
        if picked.len() >= max_chunks {
            break;
        }
        let far_enough = picked
            .iter()
            .all(|p| p.start.abs_diff(window.start) >= MIN_PICK_DISTANCE);
        if far_enough {
            picked.push(window);
        }
    }

    if picked.is_empty() {
        return truncate_chars(text, max_total_chars);
    }

    picked.sort_by_key(|w| w.start);
    let joined = picked
        .iter()
        .map(|w| w.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");
    truncate_chars(&joined, max_total_chars)
}
