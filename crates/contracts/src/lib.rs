use serde::{Deserialize, Serialize};

pub mod canonical;

pub const MAX_QUESTION_CHARS: usize = 2000;
pub const MAX_MODEL_CHARS: usize = 200;
pub const MAX_FOLLOW_UP_CHARS: usize = 140;
pub const MAX_FACT_CHARS: usize = 500;
pub const MAX_FACT_CITATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AskMode {
    Fast,
    Verified,
}

impl AskMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AskMode::Fast => "fast",
            AskMode::Verified => "verified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Auto,
    En,
    Hi,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::En => "en",
            Language::Hi => "hi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerStyle {
    Concise,
    Balanced,
    Detailed,
    Creative,
}

impl AnswerStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerStyle::Concise => "Concise",
            AnswerStyle::Balanced => "Balanced",
            AnswerStyle::Detailed => "Detailed",
            AnswerStyle::Creative => "Creative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebTopic {
    General,
    News,
    Finance,
}

impl WebTopic {
    pub fn as_str(self) -> &'static str {
        match self {
            WebTopic::General => "general",
            WebTopic::News => "news",
            WebTopic::Finance => "finance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebTimeRange {
    #[serde(alias = "d")]
    Day,
    #[serde(alias = "w")]
    Week,
    #[serde(alias = "m")]
    Month,
    #[serde(alias = "y")]
    Year,
}

impl WebTimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            WebTimeRange::Day => "day",
            WebTimeRange::Week => "week",
            WebTimeRange::Month => "month",
            WebTimeRange::Year => "year",
        }
    }
}

fn default_mode() -> AskMode {
    AskMode::Verified
}

fn default_language() -> Language {
    Language::Auto
}

fn default_style() -> AnswerStyle {
    AnswerStyle::Balanced
}

fn default_use_web() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: AskMode,
    #[serde(default = "default_language")]
    pub language: Language,
    #[serde(default = "default_style")]
    pub style: AnswerStyle,
    #[serde(rename = "useWeb", default = "default_use_web")]
    pub use_web: bool,
    #[serde(rename = "webTopic", default, skip_serializing_if = "Option::is_none")]
    pub web_topic: Option<WebTopic>,
    #[serde(
        rename = "webTimeRange",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub web_time_range: Option<WebTimeRange>,
}

impl AskRequest {
    /// Trims the question in place and reports every schema issue found.
    pub fn validate(&mut self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        self.question = self.question.trim().to_string();
        if self.question.is_empty() {
            issues.push("question must not be empty".to_string());
        }
        if self.question.chars().count() > MAX_QUESTION_CHARS {
            issues.push(format!(
                "question must be at most {} characters",
                MAX_QUESTION_CHARS
            ));
        }

        if let Some(model) = &self.model {
            let model = model.trim();
            if model.is_empty() {
                self.model = None;
            } else if model.chars().count() > MAX_MODEL_CHARS {
                issues.push(format!(
                    "model must be at most {} characters",
                    MAX_MODEL_CHARS
                ));
            } else {
                self.model = Some(model.to_string());
            }
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub provider: String,
    pub model: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    #[serde(rename = "followUps")]
    pub follow_ups: Vec<String>,
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSource {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

impl From<WebSearchResult> for EvidenceSource {
    fn from(result: WebSearchResult) -> Self {
        Self {
            title: result.title,
            url: result.url,
            snippet: result.snippet,
            extracted_text: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub source: EvidenceSource,
    pub score: i64,
    pub norm_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundedFact {
    pub fact: String,
    pub citations: Vec<u32>,
}

impl GroundedFact {
    /// A fact is usable when its text is within bounds and at least one
    /// citation index lands inside the source list.
    pub fn sanitized(mut self, sources_count: usize) -> Option<GroundedFact> {
        self.fact = self.fact.trim().to_string();
        if self.fact.is_empty() || self.fact.chars().count() > MAX_FACT_CHARS {
            return None;
        }
        let mut seen = Vec::new();
        self.citations.retain(|n| {
            let keep = *n >= 1 && (*n as usize) <= sources_count && !seen.contains(n);
            if keep {
                seen.push(*n);
            }
            keep
        });
        self.citations.truncate(MAX_FACT_CITATIONS);
        if self.citations.is_empty() {
            return None;
        }
        Some(self)
    }
}
