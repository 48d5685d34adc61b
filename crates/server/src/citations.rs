use std::sync::LazyLock;

use regex::{Captures, Regex};

use nolia_contracts::{Citation, EvidenceSource};

static CITE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d{1,4})\]").unwrap());
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d{1,3}[.)])\s+(.*)$").unwrap());

const MIN_BULLET_CHARS: usize = 20;
const MIN_PROSE_CHARS: usize = 40;

/// Strips every `[n]` whose number falls outside `1..=sources_count`.
/// Returns the cleaned answer and whether anything was out of range.
/// Idempotent, and never introduces new numbers.
pub fn sanitize(answer: &str, sources_count: usize) -> (String, bool) {
    let mut out_of_range = false;
    let cleaned = CITE_RE.replace_all(answer, |caps: &Captures| {
        let keep = caps[1]
            .parse::<usize>()
            .is_ok_and(|n| n >= 1 && n <= sources_count);
        if keep {
            caps[0].to_string()
        } else {
            out_of_range = true;
            String::new()
        }
    });
    (cleaned.into_owned(), out_of_range)
}

/// All in-range citation numbers in order of appearance.
pub fn in_range_numbers(answer: &str, sources_count: usize) -> Vec<u32> {
    CITE_RE
        .captures_iter(answer)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .filter(|n| *n >= 1 && (*n as usize) <= sources_count)
        .collect()
}

/// Distinct in-range numbers, ascending — the projection order for the
/// response's citation list.
pub fn distinct_ascending(answer: &str, sources_count: usize) -> Vec<u32> {
    let mut numbers = in_range_numbers(answer, sources_count);
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}

pub fn map_citations(answer: &str, sources: &[EvidenceSource]) -> Vec<Citation> {
    distinct_ascending(answer, sources.len())
        .into_iter()
        .map(|n| {
            let source = &sources[(n - 1) as usize];
            Citation {
                url: source.url.clone(),
                title: Some(source.title.clone()).filter(|t| !t.trim().is_empty()),
            }
        })
        .collect()
}

/// "Every factual block carries a citation" heuristic: the answer is split
/// on blank lines with fenced code ignored; bullet lines over 20 chars and
/// prose blocks over 40 chars (heading markers stripped) each need at least
/// one `[n]`.
pub fn has_uncited_factual_block(answer: &str) -> bool {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in answer.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    for block in blocks {
        let bullets = block
            .iter()
            .filter_map(|line| BULLET_RE.captures(line))
            .collect::<Vec<_>>();

        if !bullets.is_empty() {
            for caps in bullets {
                let content = caps[1].trim();
                if content.chars().count() > MIN_BULLET_CHARS && !CITE_RE.is_match(content) {
                    return true;
                }
            }
            continue;
        }

        let prose = block
            .iter()
            .map(|line| line.trim_start_matches('#').trim())
            .collect::<Vec<_>>()
            .join(" ");
        if prose.chars().count() >= MIN_PROSE_CHARS && !CITE_RE.is_match(&prose) {
            return true;
        }
    }

    false
}

#[derive(Debug, Clone)]
pub struct CitationCheck {
    pub answer: String,
    pub defective: bool,
}

/// Full verification pass: sanitize, then flag the answer when anything was
/// out of range, no citation survived, or a factual block is uncited.
pub fn verify(answer: &str, sources_count: usize) -> CitationCheck {
    let (cleaned, out_of_range) = sanitize(answer, sources_count);
    let remaining = in_range_numbers(&cleaned, sources_count);
    let defective =
        out_of_range || remaining.is_empty() || has_uncited_factual_block(&cleaned);
    CitationCheck {
        answer: cleaned,
        defective,
    }
}
