use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use nolia_contracts::WebSearchResult;

use super::{SearchBackend, SearchBatch, SearchError, SearchOptions, classify_reqwest};

const PROVIDER: &str = "tavily";

/// Bearer-authenticated POST adapter for the Tavily search API. Tavily can
/// also ship extracted page text (`raw_content`), which we forward so the
/// pipeline can skip fetching those pages itself.
pub struct TavilySearch {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl TavilySearch {
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
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default, alias = "rawContent")]
    raw_content: Option<String>,
    #[serde(default)]
    published_date: Option<String>,
}

#[async_trait]
impl SearchBackend for TavilySearch {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some()
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

        let mut body = json!({
            "query": query,
            "max_results": max_results,
            "topic": options.topic.as_str(),
            "search_depth": options.depth.as_str(),
            "include_answer": false,
            "include_raw_content": if options.include_raw_content {
                json!("text")
            } else {
                json!(false)
            },
        });
        if let Some(range) = options.time_range {
            body["time_range"] = json!(range.as_str());
        }

        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .timeout(options.timeout)
            .bearer_auth(api_key)
            .json(&body)
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
            .json::<TavilyResponse>()
            .await
            .map_err(|_| SearchError::InvalidResponse { provider: PROVIDER })?;

        let mut batch = SearchBatch::default();
        for result in parsed.results {
            if result.url.is_empty() {
                continue;
            }

            let mut snippet = result.content;
            if let Some(date) = published_day(result.published_date.as_deref()) {
                snippet.push_str("\nPublished: ");
                snippet.push_str(&date);
            }

            if let Some(raw) = result.raw_content.filter(|raw| !raw.trim().is_empty()) {
                batch.raw_content.insert(result.url.clone(), raw);
            }

            batch.results.push(WebSearchResult {
                title: result.title,
                url: result.url,
                snippet,
            });
        }

        Ok(batch)
    }
}

/// Tavily dates arrive either as `YYYY-MM-DD` or as a full timestamp; only
/// the day part participates in recency scoring.
fn published_day(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw.split('T').next().unwrap_or(raw).to_string())
}
