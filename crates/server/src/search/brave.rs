use async_trait::async_trait;
use serde::Deserialize;

use nolia_contracts::WebSearchResult;

use super::{SearchBackend, SearchBatch, SearchError, SearchOptions, classify_reqwest};

const PROVIDER: &str = "brave";

/// Header-authenticated GET adapter for the Brave web-search API.
pub struct BraveSearch {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl BraveSearch {
    pub fn new(api_key: Option<String>, base_url: String) -> Result<Self, SearchError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SearchError::Http(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            base_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

#[async_trait]
impl SearchBackend for BraveSearch {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    fn max_queries(&self) -> usize {
        2
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        options: &SearchOptions,
    ) -> Result<SearchBatch, SearchError> {
        let Some(api_key) = &self.api_key else {
            return Ok(SearchBatch::default());
        };

        let count = max_results.to_string();
        let response = self
            .http
            .get(&self.base_url)
            .timeout(options.timeout)
            .header("X-Subscription-Token", api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await
            .map_err(|e| classify_reqwest(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::BadStatus {
                provider: PROVIDER,
                status: status.as_u16(),
            });
        }

        let parsed = response
            .json::<BraveResponse>()
            .await
            .map_err(|_| SearchError::InvalidResponse { provider: PROVIDER })?;

        let results = parsed
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| WebSearchResult {
                title: r.title,
                url: r.url,
                snippet: r.description,
            })
            .collect();

        Ok(SearchBatch {
            results,
            raw_content: Default::default(),
        })
    }
}
