use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

use nolia_contracts::{AnswerStyle, Language};

pub const MAX_PROFILES: usize = 5000;
pub const MAX_PROFILE_AGE_MS: u64 = 30 * 24 * 60 * 60 * 1000;

static ANON_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:-]{1,200}$").unwrap());

pub fn valid_anon_id(value: &str) -> bool {
    ANON_ID_RE.is_match(value)
}

const TOPIC_BUCKETS: &[(&str, &str)] = &[
    (
        "technology",
        r"\b(software|computer|phone|app|ai|programming|internet|laptop|android|iphone|code)\b",
    ),
    (
        "finance",
        r"\b(stocks?|markets?|nifty|sensex|crypto|bank|loan|tax|invest\w*|price|rupee|dollar)\b",
    ),
    (
        "health",
        r"\b(health|doctor|disease|symptom\w*|medicine|diet|exercise|vaccine|yoga)\b",
    ),
    (
        "sports",
        r"\b(cricket|football|soccer|tennis|ipl|match|tournament|olympics|score)\b",
    ),
    (
        "entertainment",
        r"\b(movie|film|song|music|actor|actress|bollywood|hollywood|series|show)\b",
    ),
    (
        "science",
        r"\b(physics|chemistry|biology|space|planet|quantum|gravity|climate|research)\b",
    ),
    (
        "politics",
        r"\b(election\w*|government|minister|parliament|policy|vote|party)\b",
    ),
    (
        "travel",
        r"\b(travel|flight|hotel|visa|tourist|trip|vacation|train)\b",
    ),
];

static TOPIC_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    TOPIC_BUCKETS
        .iter()
        .map(|(name, pattern)| (*name, Regex::new(pattern).unwrap()))
        .collect()
});

/// First matching bucket wins; everything else is "general".
pub fn classify_topic(normalized_question: &str) -> &'static str {
    TOPIC_RES
        .iter()
        .find(|(_, regex)| regex.is_match(normalized_question))
        .map(|(name, _)| *name)
        .unwrap_or("general")
}

#[derive(Debug, Clone)]
pub struct AnonProfile {
    pub anon_id: String,
    pub created_at_ms: u64,
    pub last_seen_at_ms: u64,
    pub ask_count: u64,
    pub last_language: Option<Language>,
    pub last_style: Option<AnswerStyle>,
    pub topic_counts: HashMap<&'static str, u64>,
}

/// In-memory per-anon-id usage summary. Never serialized into responses.
#[derive(Clone, Default)]
pub struct AnonProfileStore {
    inner: Arc<Mutex<HashMap<String, AnonProfile>>>,
}

pub fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl AnonProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        anon_id: &str,
        language: Language,
        style: AnswerStyle,
        normalized_question: &str,
    ) {
        self.record_at(anon_id, language, style, normalized_question, epoch_ms_now());
    }

    pub fn record_at(
        &self,
        anon_id: &str,
        language: Language,
        style: AnswerStyle,
        normalized_question: &str,
        now_ms: u64,
    ) {
        if !valid_anon_id(anon_id) {
            return;
        }
        let topic = classify_topic(normalized_question);

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let profile = inner
            .entry(anon_id.to_string())
            .or_insert_with(|| AnonProfile {
                anon_id: anon_id.to_string(),
                created_at_ms: now_ms,
                last_seen_at_ms: now_ms,
                ask_count: 0,
                last_language: None,
                last_style: None,
                topic_counts: HashMap::new(),
            });

        profile.last_seen_at_ms = now_ms;
        profile.ask_count += 1;
        profile.last_language = Some(language);
        profile.last_style = Some(style);
        *profile.topic_counts.entry(topic).or_insert(0) += 1;

        prune(&mut inner, now_ms);
    }

    pub fn get(&self, anon_id: &str) -> Option<AnonProfile> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.get(anon_id).cloned()
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drops profiles idle for 30 days, then evicts oldest-by-last-seen until
/// the table fits the cap.
fn prune(profiles: &mut HashMap<String, AnonProfile>, now_ms: u64) {
    profiles.retain(|_, p| now_ms.saturating_sub(p.last_seen_at_ms) <= MAX_PROFILE_AGE_MS);

    if profiles.len() <= MAX_PROFILES {
        return;
    }

    let mut by_age = profiles
        .iter()
        .map(|(key, p)| (p.last_seen_at_ms, key.clone()))
        .collect::<Vec<_>>();
    by_age.sort();

    let overflow = profiles.len() - MAX_PROFILES;
    for (_, key) in by_age.into_iter().take(overflow) {
        profiles.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_id_validation() {
        assert!(valid_anon_id("user_1.2:3-x"));
        assert!(valid_anon_id("a"));
        assert!(valid_anon_id(&"a".repeat(200)));
        assert!(!valid_anon_id(""));
        assert!(!valid_anon_id(&"a".repeat(201)));
        assert!(!valid_anon_id("has space"));
        assert!(!valid_anon_id("emoji🙂"));
        assert!(!valid_anon_id("semi;colon"));
    }

    #[test]
    fn topics_classify_by_first_matching_bucket() {
        assert_eq!(classify_topic("best programming laptop"), "technology");
        assert_eq!(classify_topic("nifty 50 outlook"), "finance");
        assert_eq!(classify_topic("ipl match score"), "sports");
        assert_eq!(classify_topic("tell me a joke"), "general");
    }

    #[test]
    fn record_updates_counts_and_last_values() {
        let store = AnonProfileStore::new();
        store.record_at("anon-1", Language::En, AnswerStyle::Concise, "cricket score", 1000);
        store.record_at("anon-1", Language::Hi, AnswerStyle::Detailed, "cricket news", 2000);

        let profile = store.get("anon-1").unwrap();
        assert_eq!(profile.ask_count, 2);
        assert_eq!(profile.created_at_ms, 1000);
        assert_eq!(profile.last_seen_at_ms, 2000);
        assert_eq!(profile.last_language, Some(Language::Hi));
        assert_eq!(profile.last_style, Some(AnswerStyle::Detailed));
        assert_eq!(profile.topic_counts.get("sports"), Some(&2));
    }

    #[test]
    fn invalid_ids_are_ignored() {
        let store = AnonProfileStore::new();
        store.record_at("bad id", Language::En, AnswerStyle::Balanced, "q", 1);
        assert!(store.is_empty());
    }

    #[test]
    fn stale_profiles_are_pruned_on_write() {
        let store = AnonProfileStore::new();
        store.record_at("old", Language::En, AnswerStyle::Balanced, "q", 1000);
        let later = 1000 + MAX_PROFILE_AGE_MS + 1;
        store.record_at("new", Language::En, AnswerStyle::Balanced, "q", later);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }

    #[test]
    fn overflow_evicts_oldest_by_last_seen() {
        let mut profiles = HashMap::new();
        for i in 0..(MAX_PROFILES + 10) {
            let id = format!("anon-{}", i);
            profiles.insert(
                id.clone(),
                AnonProfile {
                    anon_id: id,
                    created_at_ms: i as u64,
                    last_seen_at_ms: i as u64,
                    ask_count: 1,
                    last_language: None,
                    last_style: None,
                    topic_counts: HashMap::new(),
                },
            );
        }
        prune(&mut profiles, (MAX_PROFILES + 10) as u64);
        assert_eq!(profiles.len(), MAX_PROFILES);
        assert!(!profiles.contains_key("anon-0"));
        assert!(profiles.contains_key(&format!("anon-{}", MAX_PROFILES + 9)));
    }
}
