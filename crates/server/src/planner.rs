use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use nolia_contracts::AskMode;

pub const MAX_PLANNED_QUERIES: usize = 3;

/// NFC-normalized, lowercased, whitespace-collapsed view of the question.
/// All intent detection runs over this form.
pub fn normalize_question(question: &str) -> String {
    question
        .nfc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

static FRESH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(latest|current|recent|recently|news|update|updates|trending|haal|taaza|taza)\b|is hafte",
    )
    .unwrap()
});

static VERY_FRESH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btoday\b|right now\b|\bbreaking\b|\baaj\b|\babhi\b").unwrap());

static FINANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(stocks?|markets?|prices?|nifty|sensex|crypto|cryptocurrency|bitcoin|forex|inflation|rupee|dollar|ipo|dividend|mutual funds?|share price)\b|interest rates?",
    )
    .unwrap()
});

static DEVANAGARI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ऀ-ॿ]").unwrap());

const HINDI_MARKERS: &[&str] = &[
    "hai", "hain", "kya", "kaise", "kyun", "kyu", "aaj", "abhi", "kaun", "kab", "kahan", "kahaan",
    "batao", "bataiye", "nahi", "nahin", "mujhe", "kitna", "kitne", "karo", "chahiye", "hoga",
    "hogi", "samay", "tareekh", "baje", "madad",
];

/// Romanized-Hindi detection: Devanagari text is a direct hit; otherwise two
/// or more marker tokens are required so lone loanwords do not flip the
/// language.
pub fn detect_hinglish(normalized: &str) -> bool {
    if DEVANAGARI_RE.is_match(normalized) {
        return true;
    }
    let hits = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| HINDI_MARKERS.contains(token))
        .count();
    hits >= 2
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "that", "this", "from", "have", "has",
    "had", "will", "would", "can", "could", "should", "about", "into", "over", "under", "between",
    "what", "who", "where", "when", "why", "how", "which", "does", "did", "their", "there",
    "your", "you", "not", "but", "its", "it's",
];

/// Content tokens used by overlap scoring and excerpt selection: at least
/// three characters, stop-list removed.
pub fn question_tokens(normalized: &str) -> Vec<String> {
    let mut tokens = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect::<Vec<_>>();
    tokens.dedup();
    tokens
}

const LEADING_FILLERS: &[&str] = &[
    "what", "who", "where", "when", "why", "how", "explain", "tell", "me", "about", "define",
    "latest", "current", "is", "are", "was", "were", "does", "do", "did", "the", "a", "an",
];

/// Topical core: the question with leading interrogatives and fillers
/// stripped, used for expanded queries and heuristic follow-ups.
pub fn topical_core(normalized: &str) -> String {
    let trimmed = normalized.trim_matches(|c: char| c == '?' || c == '!' || c == '.' || c == ' ');
    let mut words = trimmed.split(' ').peekable();
    while let Some(word) = words.peek() {
        if LEADING_FILLERS.contains(word) {
            words.next();
        } else {
            break;
        }
    }
    let core = words.collect::<Vec<_>>().join(" ");
    if core.is_empty() {
        trimmed.to_string()
    } else {
        core
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub queries: Vec<String>,
    pub core: String,
    pub wants_fresh: bool,
    pub wants_very_fresh: bool,
    pub finance: bool,
}

impl QueryPlan {
    pub fn fresh(&self) -> bool {
        self.wants_fresh || self.wants_very_fresh
    }
}

/// Expands the question into at most three case-insensitively deduped search
/// queries, ordered base question first.
pub fn plan(question: &str, normalized: &str, mode: AskMode) -> QueryPlan {
    let wants_fresh = FRESH_RE.is_match(normalized);
    let wants_very_fresh = VERY_FRESH_RE.is_match(normalized);
    let finance = FINANCE_RE.is_match(normalized);
    let core = topical_core(normalized);

    let mut queries: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        let candidate = candidate.trim().to_string();
        if candidate.is_empty() || queries.len() >= MAX_PLANNED_QUERIES {
            return;
        }
        let lower = candidate.to_lowercase();
        if queries.iter().any(|q| q.to_lowercase() == lower) {
            return;
        }
        queries.push(candidate);
    };

    push(question.trim().to_string());
    push(core.clone());
    if wants_fresh {
        push(format!("{} latest", core));
    }
    if wants_very_fresh {
        push(format!("{} today", core));
    }
    if finance {
        push(format!("{} price", core));
    }
    if mode == AskMode::Verified {
        push(format!("{} official", core));
    }

    QueryPlan {
        queries,
        core,
        wants_fresh,
        wants_very_fresh,
        finance,
    }
}
