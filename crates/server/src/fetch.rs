use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::ssrf::{SsrfError, ensure_public_url};

const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = "nolia-ask/0.1 (+https://github.com/nolia)";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Ssrf(#[from] SsrfError),
    #[error("unsupported media type '{0}'")]
    UnsupportedMediaType(String),
    #[error("payload exceeds {max} bytes")]
    PayloadTooLarge { max: usize },
    #[error("fetch failed with status {0}")]
    BadStatus(u16),
    #[error("fetch failed: {0}")]
    Http(String),
    #[error("redirect chain exceeded the hop limit")]
    TooManyRedirects,
    #[error("fetch timed out")]
    Timeout,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(err.to_string())
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches one page and reduces it to plain text, reading at most
    /// `max_bytes` of the body.
    async fn fetch_page_text(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<String, FetchError>;
}

pub struct HttpPageFetcher {
    http: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, FetchError> {
        // Redirects are followed manually so every hop goes back through the
        // SSRF guard before a connection is opened.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page_text(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<String, FetchError> {
        let mut current = url.to_string();

        for _ in 0..=MAX_REDIRECTS {
            let target = ensure_public_url(&current).await?;

            let response = self
                .http
                .get(target.clone())
                .timeout(timeout)
                .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
                .send()
                .await?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(FetchError::BadStatus(status.as_u16()))?;
                current = target
                    .join(location)
                    .map_err(|e| SsrfError::InvalidUrl(e.to_string()))?
                    .to_string();
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::BadStatus(status.as_u16()));
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            if !is_html_content_type(&content_type) {
                return Err(FetchError::UnsupportedMediaType(content_type));
            }

            let mut body = Vec::new();
            let mut response = response;
            while let Some(chunk) = response.chunk().await? {
                if body.len() + chunk.len() > max_bytes {
                    return Err(FetchError::PayloadTooLarge { max: max_bytes });
                }
                body.extend_from_slice(&chunk);
            }

            return Ok(html_to_text(&String::from_utf8_lossy(&body)));
        }

        Err(FetchError::TooManyRedirects)
    }
}

pub fn is_html_content_type(value: &str) -> bool {
    let media = value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    media == "text/html" || media.starts_with("application/xhtml")
}

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
static NOSCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

/// Reduces an HTML document to whitespace-collapsed plain text.
pub fn html_to_text(html: &str) -> String {
    let text = COMMENT_RE.replace_all(html, " ");
    let text = SCRIPT_RE.replace_all(&text, " ");
    let text = STYLE_RE.replace_all(&text, " ");
    let text = NOSCRIPT_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, " ");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
