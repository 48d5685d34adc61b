use chrono::NaiveDate;
use url::Url;

use nolia_contracts::{EvidenceSource, SourceCandidate};

pub const MAX_SOURCES_FRESH: usize = 8;
pub const MAX_SOURCES_DEFAULT: usize = 6;
pub const HOST_CAP_FRESH: usize = 1;
pub const HOST_CAP_DEFAULT: usize = 2;

const TOKEN_OVERLAP_CAP: i64 = 6;

const UGC_HOSTS: &[&str] = &[
    "medium.com",
    "blogspot",
    "wordpress",
    "substack",
    "tumblr",
    "reddit.com",
    "quora.com",
];

fn host_of(url: &str) -> Option<String> {
    let host = Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn domain_trust(host: &str) -> i64 {
    let mut trust = if host.ends_with(".gov") || host.contains(".gov.") {
        6
    } else if host.ends_with(".edu") || host.contains(".edu.") {
        5
    } else if host == "wikipedia.org" || host.ends_with(".wikipedia.org") {
        3
    } else if host == "github.com" {
        2
    } else if host.ends_with(".org") {
        2
    } else {
        0
    };
    if UGC_HOSTS.iter().any(|ugc| host.contains(ugc)) {
        trust -= 2;
    }
    trust
}

fn token_overlap(tokens: &[String], title: &str, snippet: &str) -> i64 {
    let haystack = format!("{} {}", title, snippet).to_lowercase();
    let hits = tokens
        .iter()
        .filter(|token| haystack.contains(token.as_str()))
        .count() as i64;
    hits.min(TOKEN_OVERLAP_CAP)
}

/// Recency boost from a `Published: YYYY-MM-DD` marker in the snippet, only
/// applied when the question asks for fresh information.
fn recency_boost(snippet: &str, today: NaiveDate) -> i64 {
    let Some(idx) = snippet.find("Published: ") else {
        return 0;
    };
    let date_part = snippet[idx + "Published: ".len()..]
        .chars()
        .take(10)
        .collect::<String>();
    match NaiveDate::parse_from_str(date_part.trim(), "%Y-%m-%d") {
        Ok(date) => {
            let age_days = (today - date).num_days();
            if age_days <= 2 {
                4
            } else if age_days <= 7 {
                3
            } else if age_days <= 30 {
                2
            } else {
                1
            }
        }
        Err(_) => 2,
    }
}

pub fn score_source(
    source: &EvidenceSource,
    question_tokens: &[String],
    wants_fresh: bool,
    today: NaiveDate,
) -> i64 {
    let trust = host_of(&source.url)
        .map(|host| domain_trust(&host))
        .unwrap_or(0);
    let overlap = token_overlap(question_tokens, &source.title, &source.snippet);
    let recency = if wants_fresh {
        recency_boost(&source.snippet, today)
    } else {
        0
    };
    trust + overlap + recency
}

/// Final selection: best-scored sources first, diversified by host, then
/// backfilled without the host cap if the diversity pass came up short. The
/// returned order is the `[n]` numbering the answer will cite.
pub fn select_sources(mut candidates: Vec<SourceCandidate>, wants_fresh: bool) -> Vec<EvidenceSource> {
    let max_sources = if wants_fresh {
        MAX_SOURCES_FRESH
    } else {
        MAX_SOURCES_DEFAULT
    };
    let host_cap = if wants_fresh {
        HOST_CAP_FRESH
    } else {
        HOST_CAP_DEFAULT
    };

    candidates.sort_by(|a, b| b.score.cmp(&a.score));

    let mut picked_idx: Vec<usize> = Vec::new();
    let mut host_counts = std::collections::HashMap::<String, usize>::new();

    for (idx, candidate) in candidates.iter().enumerate() {
        if picked_idx.len() >= max_sources {
            break;
        }
        let host = host_of(&candidate.source.url).unwrap_or_default();
        let count = host_counts.entry(host).or_insert(0);
        if *count >= host_cap {
            continue;
        }
        *count += 1;
        picked_idx.push(idx);
    }

    if picked_idx.len() < max_sources {
        for (idx, _) in candidates.iter().enumerate() {
            if picked_idx.len() >= max_sources {
                break;
            }
            if !picked_idx.contains(&idx) {
                picked_idx.push(idx);
            }
        }
        picked_idx.sort_unstable();
    }

    picked_idx
        .into_iter()
        .map(|idx| candidates[idx].source.clone())
        .collect()
}
