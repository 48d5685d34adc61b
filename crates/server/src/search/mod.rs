use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use nolia_contracts::{WebSearchResult, WebTimeRange, WebTopic};

pub mod brave;
pub mod tavily;

pub use brave::BraveSearch;
pub use tavily::TavilySearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDepth {
    Fast,
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchDepth::Fast => "fast",
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub topic: WebTopic,
    pub time_range: Option<WebTimeRange>,
    pub depth: SearchDepth,
    pub include_raw_content: bool,
    pub timeout: Duration,
}

/// One provider call's worth of results. `raw_content` carries page text the
/// provider already extracted, keyed by result URL.
#[derive(Debug, Clone, Default)]
pub struct SearchBatch {
    pub results: Vec<WebSearchResult>,
    pub raw_content: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("{provider} returned status {status}")]
    BadStatus { provider: &'static str, status: u16 },
    #[error("{provider} returned an unreadable response")]
    InvalidResponse { provider: &'static str },
    #[error("search request failed: {0}")]
    Http(String),
    #[error("search request timed out")]
    Timeout,
}

pub fn classify_reqwest(provider: &'static str, err: reqwest::Error) -> SearchError {
    if err.is_timeout() {
        SearchError::Timeout
    } else if err.is_decode() {
        SearchError::InvalidResponse { provider }
    } else {
        SearchError::Http(err.to_string())
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// A disabled backend (no API key) is skipped, not an error.
    fn enabled(&self) -> bool;

    /// How many planned queries this backend accepts per request.
    fn max_queries(&self) -> usize {
        usize::MAX
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        options: &SearchOptions,
    ) -> Result<SearchBatch, SearchError>;
}
