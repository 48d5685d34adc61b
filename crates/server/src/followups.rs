use std::sync::LazyLock;

use regex::Regex;

use nolia_contracts::MAX_FOLLOW_UP_CHARS;

use crate::excerpt::truncate_chars;

pub const MAX_FOLLOW_UPS: usize = 3;

static PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:[-*•]+|\d{1,2}[.)])?\s*["'`]*"#).unwrap());
static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"["'`,]*\s*$"#).unwrap());

/// Parses the follow-up model reply, tolerating fenced code blocks and
/// lazily formatted lists. `None` means the reply was unusable.
pub fn parse_follow_ups(reply: &str) -> Option<Vec<String>> {
    let reply = reply.trim();
    if reply.is_empty() {
        return None;
    }

    let body = strip_fences(reply);

    if let Ok(items) = serde_json::from_str::<Vec<String>>(body) {
        return Some(items);
    }

    // The array may be embedded in prose ("Here are some ideas: [...]").
    if let (Some(start), Some(end)) = (body.find('['), body.rfind(']'))
        && start < end
        && let Ok(items) = serde_json::from_str::<Vec<String>>(&body[start..=end])
    {
        return Some(items);
    }

    // Last resort: treat each non-empty line as one suggestion.
    let lines = body
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && *line != "[" && *line != "]")
        .collect::<Vec<_>>();
    if lines.is_empty() { None } else { Some(lines) }
}

fn strip_fences(reply: &str) -> &str {
    let Some(start) = reply.find("```") else {
        return reply;
    };
    let after = &reply[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

/// Trims markers and quotes, enforces the length cap, dedupes
/// case-insensitively and keeps at most three suggestions.
pub fn sanitize_follow_ups(items: Vec<String>) -> Vec<String> {
    let mut seen = Vec::<String>::new();
    let mut out = Vec::new();

    for item in items {
        let cleaned = PREFIX_RE.replace(&item, "");
        let cleaned = SUFFIX_RE.replace(&cleaned, "");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            continue;
        }
        let cleaned = truncate_chars(cleaned, MAX_FOLLOW_UP_CHARS);
        let lower = cleaned.to_lowercase();
        if seen.contains(&lower) {
            continue;
        }
        seen.push(lower);
        out.push(cleaned);
        if out.len() >= MAX_FOLLOW_UPS {
            break;
        }
    }

    out
}

/// Deterministic fallback derived from the topical core; always three
/// entries, Hindi templates when the question was Hindi.
pub fn heuristic_follow_ups(core: &str, hindi: bool) -> Vec<String> {
    let core = truncate_chars(core.trim(), 90);
    let core = if core.is_empty() {
        "is topic".to_string()
    } else {
        core
    };
    let items = if hindi {
        vec![
            format!("{} ke baare mein aur kya jaanna chahiye?", core),
            format!("{} ka asar kis par padta hai?", core),
            format!("{} par sabse naya update kya hai?", core),
        ]
    } else {
        vec![
            format!("What are the key facts about {}?", core),
            format!("How does {} affect everyday life?", core),
            format!("What changed recently with {}?", core),
        ]
    };
    items
        .into_iter()
        .map(|item| truncate_chars(&item, MAX_FOLLOW_UP_CHARS))
        .collect()
}
