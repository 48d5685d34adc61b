#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use nolia_contracts::WebSearchResult;
use nolia_server::ask::AskEngine;
use nolia_server::fetch::{FetchError, PageFetcher};
use nolia_server::openrouter::{ChatBackend, ChatRequest, LlmError};
use nolia_server::search::{SearchBackend, SearchBatch, SearchError, SearchOptions};

pub enum Reply {
    Text(&'static str),
    Fail,
}

/// Chat backend that pops scripted replies in order and records every call.
pub struct ScriptedLlm {
    configured: bool,
    replies: Mutex<VecDeque<Reply>>,
    pub chat_calls: AtomicUsize,
    pub chat_log: Mutex<Vec<ChatRequest>>,
    models: Vec<String>,
    delay: Duration,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            configured: true,
            replies: Mutex::new(replies.into()),
            chat_calls: AtomicUsize::new(0),
            chat_log: Mutex::new(Vec::new()),
            models: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_models(mut self, models: Vec<&str>) -> Self {
        self.models = models.into_iter().map(String::from).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn unconfigured() -> Self {
        let mut stub = Self::new(Vec::new());
        stub.configured = false;
        stub
    }

    pub fn calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedLlm {
    fn configured(&self) -> bool {
        self.configured
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            self.chat_log.lock().unwrap().push(request);
            replies.pop_front()
        };
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        match reply {
            Some(Reply::Text(text)) => Ok(text.to_string()),
            Some(Reply::Fail) => Err(LlmError::Upstream("scripted failure".to_string())),
            None => Ok("ok.".to_string()),
        }
    }

    async fn list_free_models(&self, _timeout: Duration) -> Result<Vec<String>, LlmError> {
        Ok(self.models.clone())
    }
}

/// Search backend that returns a fixed batch and counts invocations.
pub struct StubSearch {
    name: &'static str,
    enabled: bool,
    results: Vec<WebSearchResult>,
    raw_content: HashMap<String, String>,
    max_queries: usize,
    pub calls: AtomicUsize,
}

impl StubSearch {
    pub fn new(name: &'static str, results: Vec<WebSearchResult>) -> Self {
        Self {
            name,
            enabled: true,
            results,
            raw_content: HashMap::new(),
            max_queries: usize::MAX,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn disabled(name: &'static str) -> Self {
        let mut stub = Self::new(name, Vec::new());
        stub.enabled = false;
        stub
    }

    pub fn with_raw_content(mut self, url: &str, text: &str) -> Self {
        self.raw_content.insert(url.to_string(), text.to_string());
        self
    }

    pub fn with_max_queries(mut self, max: usize) -> Self {
        self.max_queries = max;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for StubSearch {
    fn name(&self) -> &'static str {
        self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn max_queries(&self) -> usize {
        self.max_queries
    }

    async fn search(
        &self,
        _query: &str,
        _max_results: usize,
        _options: &SearchOptions,
    ) -> Result<SearchBatch, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SearchBatch {
            results: self.results.clone(),
            raw_content: self.raw_content.clone(),
        })
    }
}

/// Fetcher whose every fetch fails; the pipeline must tolerate it.
pub struct FailingFetcher;

#[async_trait]
impl PageFetcher for FailingFetcher {
    async fn fetch_page_text(
        &self,
        _url: &str,
        _timeout: Duration,
        _max_bytes: usize,
    ) -> Result<String, FetchError> {
        Err(FetchError::Timeout)
    }
}

pub fn result(title: &str, url: &str, snippet: &str) -> WebSearchResult {
    WebSearchResult {
        title: title.to_string(),
        url: url.to_string(),
        snippet: snippet.to_string(),
    }
}

pub fn engine(llm: Arc<ScriptedLlm>, backends: Vec<Arc<dyn SearchBackend>>) -> AskEngine {
    AskEngine {
        llm,
        search_backends: backends,
        fetcher: Arc::new(FailingFetcher),
        default_model: Some("test/model".to_string()),
    }
}
