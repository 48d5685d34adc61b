use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

const APP_TITLE: &str = "Nolia";
const MAX_ATTEMPTS: u32 = 2;
const NETWORK_RETRY_BACKOFF: Duration = Duration::from_millis(350);
const SHAPE_RETRY_BACKOFF: Duration = Duration::from_millis(200);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);
const MODELS_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const MAX_FREE_MODELS: usize = 100;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion provider rejected credentials (status {0})")]
    Auth(u16),
    #[error("completion provider failed: {0}")]
    Upstream(String),
    #[error("completion provider returned an unexpected response shape")]
    InvalidResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// False when no API key is configured; the pipeline turns that into a
    /// 503 before issuing any call.
    fn configured(&self) -> bool;

    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError>;

    /// Ids of models whose prompt/completion/request prices are all zero.
    async fn list_free_models(&self, timeout: Duration) -> Result<Vec<String>, LlmError>;
}

struct ModelsCacheEntry {
    models: Vec<String>,
    expires_at: Instant,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    models_cache: Mutex<Option<ModelsCacheEntry>>,
}

impl OpenRouterClient {
    pub fn new(api_key: Option<String>, base_url: String) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Upstream(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            base_url,
            models_cache: Mutex::new(None),
        })
    }

    fn bearer(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    pricing: Option<ModelPricing>,
}

#[derive(Debug, Deserialize)]
struct ModelPricing {
    #[serde(default)]
    prompt: Option<serde_json::Value>,
    #[serde(default)]
    completion: Option<serde_json::Value>,
    #[serde(default)]
    request: Option<serde_json::Value>,
}

/// OpenRouter prices arrive as strings ("0") or numbers; a price counts as
/// free only when it parses and is non-positive.
fn price_is_free(value: Option<&serde_json::Value>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    matches!(parsed, Some(price) if price <= 0.0)
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

fn retry_after_delay(response: &reqwest::Response) -> Duration {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .map(|d| d.min(MAX_RETRY_AFTER))
        .unwrap_or(NETWORK_RETRY_BACKOFF)
}

// Timeouts, connect-level failures (refused, resolver errors) and IO errors
// on an established connection (resets, broken pipes, aborted bodies) all
// get one more try. Resets mid-request surface as request/body errors from
// reqwest, not connect errors, so those classes are included too.
fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

#[async_trait]
impl ChatBackend for OpenRouterClient {
    fn configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError> {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let response = self
                .http
                .post(&url)
                .timeout(request.timeout)
                .bearer_auth(self.bearer())
                .header("X-Title", APP_TITLE)
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    if attempt < MAX_ATTEMPTS && is_retryable_network_error(&err) {
                        tokio::time::sleep(NETWORK_RETRY_BACKOFF).await;
                        continue;
                    }
                    return Err(LlmError::Upstream(err.to_string()));
                }
            };

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LlmError::Auth(status.as_u16()));
            }
            if is_retryable_status(status) {
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(retry_after_delay(&response)).await;
                    continue;
                }
                return Err(LlmError::Upstream(format!(
                    "completion endpoint returned status {}",
                    status
                )));
            }
            if !status.is_success() {
                return Err(LlmError::Upstream(format!(
                    "completion endpoint returned status {}",
                    status
                )));
            }

            match response.json::<ChatCompletionResponse>().await {
                Ok(parsed) => match parsed.choices.into_iter().next() {
                    Some(choice) => return Ok(choice.message.content),
                    None => {
                        if attempt < MAX_ATTEMPTS {
                            tokio::time::sleep(SHAPE_RETRY_BACKOFF).await;
                            continue;
                        }
                        return Err(LlmError::InvalidResponse);
                    }
                },
                Err(_) => {
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(SHAPE_RETRY_BACKOFF).await;
                        continue;
                    }
                    return Err(LlmError::InvalidResponse);
                }
            }
        }
    }

    async fn list_free_models(&self, timeout: Duration) -> Result<Vec<String>, LlmError> {
        if !self.configured() {
            return Ok(Vec::new());
        }

        {
            let cache = self.models_cache.lock().await;
            if let Some(entry) = cache.as_ref()
                && entry.expires_at > Instant::now()
            {
                return Ok(entry.models.clone());
            }
        }

        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .timeout(timeout)
            .bearer_auth(self.bearer())
            .header("X-Title", APP_TITLE)
            .send()
            .await
            .map_err(|e| LlmError::Upstream(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(LlmError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            return Err(LlmError::Upstream(format!(
                "models endpoint returned status {}",
                status
            )));
        }

        let parsed = response
            .json::<ModelsResponse>()
            .await
            .map_err(|_| LlmError::InvalidResponse)?;

        let models = parsed
            .data
            .into_iter()
            .filter(|entry| {
                entry.pricing.as_ref().is_some_and(|pricing| {
                    price_is_free(pricing.prompt.as_ref())
                        && price_is_free(pricing.completion.as_ref())
                        && price_is_free(pricing.request.as_ref())
                })
            })
            .map(|entry| entry.id)
            .take(MAX_FREE_MODELS)
            .collect::<Vec<_>>();

        let mut cache = self.models_cache.lock().await;
        *cache = Some(ModelsCacheEntry {
            models: models.clone(),
            expires_at: Instant::now() + MODELS_CACHE_TTL,
        });

        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_pricing_accepts_strings_and_numbers() {
        assert!(price_is_free(Some(&json!("0"))));
        assert!(price_is_free(Some(&json!(0))));
        assert!(price_is_free(Some(&json!("-0.0"))));
        assert!(!price_is_free(Some(&json!("0.002"))));
        assert!(!price_is_free(Some(&json!("free"))));
        assert!(!price_is_free(Some(&json!(null))));
        assert!(!price_is_free(None));
    }

    #[test]
    fn retryable_statuses_match_the_policy() {
        for code in [429u16, 502, 503, 504] {
            assert!(is_retryable_status(
                reqwest::StatusCode::from_u16(code).unwrap()
            ));
        }
        for code in [400u16, 401, 404, 500] {
            assert!(!is_retryable_status(
                reqwest::StatusCode::from_u16(code).unwrap()
            ));
        }
    }

    #[test]
    fn models_payload_filters_to_free_entries() {
        let raw = r#"{
            "data": [
                {"id": "free/one", "pricing": {"prompt": "0", "completion": "0", "request": "0"}},
                {"id": "paid/two", "pricing": {"prompt": "0.01", "completion": "0", "request": "0"}},
                {"id": "nopricing/three"}
            ]
        }"#;
        let parsed: ModelsResponse = serde_json::from_str(raw).unwrap();
        let free = parsed
            .data
            .into_iter()
            .filter(|entry| {
                entry.pricing.as_ref().is_some_and(|p| {
                    price_is_free(p.prompt.as_ref())
                        && price_is_free(p.completion.as_ref())
                        && price_is_free(p.request.as_ref())
                })
            })
            .map(|entry| entry.id)
            .collect::<Vec<_>>();
        assert_eq!(free, vec!["free/one".to_string()]);
    }

    #[tokio::test]
    async fn unconfigured_client_lists_no_models_without_network() {
        let client = OpenRouterClient::new(None, "https://openrouter.invalid/api/v1".into()).unwrap();
        assert!(!client.configured());
        let models = client.list_free_models(Duration::from_secs(1)).await.unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn chat_completion_payload_shape_parses() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello");
    }
}
