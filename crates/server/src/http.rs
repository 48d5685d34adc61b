use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use regex::Regex;
use serde_json::json;
use uuid::Uuid;

use nolia_contracts::AskRequest;

use crate::ask::AskEngine;
use crate::cache::{self, AskCache, Coalescer, Flight, cache_key};
use crate::config::{ServerConfig, StartupError};
use crate::error::{json_error, to_api_error};
use crate::fetch::HttpPageFetcher;
use crate::metrics;
use crate::openrouter::OpenRouterClient;
use crate::planner;
use crate::profile::{AnonProfileStore, valid_anon_id};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::search::{BraveSearch, SearchBackend, TavilySearch};

pub const MAX_BODY_BYTES: usize = 1024 * 1024;
const MODELS_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_VALIDATION_ISSUES: usize = 5;

static REQUEST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,200}$").unwrap());

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub engine: Arc<AskEngine>,
    pub cache: Arc<AskCache>,
    pub coalescer: Coalescer,
    pub rate_limiter: RateLimiter,
    pub profiles: AnonProfileStore,
    pub started_at: Instant,
}

impl AppState {
    /// Production wiring: real provider clients built from the config.
    pub fn new(config: ServerConfig) -> Result<Self, StartupError> {
        let llm = OpenRouterClient::new(
            config.openrouter_api_key.clone(),
            config.openrouter_base_url.clone(),
        )
        .map_err(|err| StartupError {
            code: "ERR_CLIENT_INIT",
            message: format!("failed to initialize completion client: {}", err),
        })?;

        let brave = BraveSearch::new(config.brave_api_key.clone(), config.brave_base_url.clone())
            .map_err(|err| StartupError {
            code: "ERR_CLIENT_INIT",
            message: format!("failed to initialize brave client: {}", err),
        })?;

        let tavily =
            TavilySearch::new(config.tavily_api_key.clone(), config.tavily_base_url.clone())
                .map_err(|err| StartupError {
                    code: "ERR_CLIENT_INIT",
                    message: format!("failed to initialize tavily client: {}", err),
                })?;

        let fetcher = HttpPageFetcher::new().map_err(|err| StartupError {
            code: "ERR_CLIENT_INIT",
            message: format!("failed to initialize page fetcher: {}", err),
        })?;

        let engine = AskEngine {
            llm: Arc::new(llm),
            search_backends: vec![
                Arc::new(brave) as Arc<dyn SearchBackend>,
                Arc::new(tavily) as Arc<dyn SearchBackend>,
            ],
            fetcher: Arc::new(fetcher),
            default_model: config.openrouter_default_model.clone(),
        };

        Ok(Self::with_engine(config, engine))
    }

    /// Test wiring: any engine (stub backends included).
    pub fn with_engine(config: ServerConfig, engine: AskEngine) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            cache: Arc::new(AskCache::new()),
            coalescer: Coalescer::new(),
            rate_limiter: RateLimiter::default(),
            profiles: AnonProfileStore::new(),
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/models", get(models))
        .route("/api/ask", post(ask))
        .route("/robots.txt", get(robots))
        .route("/sitemap.xml", get(sitemap))
        .route("/metrics", get(metrics_text))
        .layer(middleware::from_fn(shell))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Assigns the request id, echoes it back, and emits the JSON access-log
/// line for `/api/*` requests.
async fn shell(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = request_id_from_headers(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    if path.starts_with("/api/") {
        let duration = started.elapsed();
        tracing::info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            duration_ms = duration.as_millis() as u64,
            "http.access"
        );
        metrics::observe_request(&path, method.as_str(), response.status().as_u16(), duration);
    }

    response
}

pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| REQUEST_ID_RE.is_match(value))
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Prefers the first `X-Forwarded-For` hop; the peer address is the direct
/// fallback.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .unwrap_or_else(|| peer.ip().to_string())
}

fn rate_limit_headers(decision: &RateDecision) -> Vec<(&'static str, String)> {
    vec![
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_at_secs.to_string()),
    ]
}

fn with_headers(mut response: Response, headers: Vec<(&'static str, String)>) -> Response {
    for (name, value) in headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

async fn health(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "requestId": request_id,
        "uptimeSec": state.started_at.elapsed().as_secs(),
        "env": state.config.env,
    }))
}

async fn models(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Response {
    match state.engine.llm.list_free_models(MODELS_TIMEOUT).await {
        Ok(model_ids) => Json(json!({
            "provider": "openrouter",
            "models": model_ids,
            "requiresApiKey": !state.engine.llm.configured(),
        }))
        .into_response(),
        Err(err) => {
            tracing::warn!(request_id = %request_id, error = %err, "models.upstream_failed");
            json_error(
                StatusCode::BAD_GATEWAY,
                "failed to list models from the completion provider",
                &request_id,
            )
            .into_response()
        }
    }
}

async fn ask(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    let ip = client_ip(&headers, peer);
    let decision = state.rate_limiter.hit(&format!("ask:{}", ip));
    let rate_headers = rate_limit_headers(&decision);

    if !decision.allowed {
        metrics::record_ask_outcome("rate_limited");
        let mut response = json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Too Many Requests, please try again later",
            &request_id,
        )
        .into_response();
        if let Ok(value) = HeaderValue::from_str(&decision.retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return with_headers(response, rate_headers);
    }

    let Json(mut request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let status = rejection.status();
            let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
                format!("request body exceeds {} bytes", MAX_BODY_BYTES)
            } else {
                rejection.body_text()
            };
            return with_headers(
                json_error(status, message, &request_id).into_response(),
                rate_headers,
            );
        }
    };

    if let Err(issues) = request.validate() {
        let message = issues
            .iter()
            .take(MAX_VALIDATION_ISSUES)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        return with_headers(
            json_error(StatusCode::BAD_REQUEST, message, &request_id).into_response(),
            rate_headers,
        );
    }

    let anon_id = headers
        .get("x-nolia-anon-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| valid_anon_id(value))
        .map(|value| value.to_string());

    let partition = anon_id.clone().unwrap_or_else(|| ip.clone());
    let body_value = serde_json::to_value(&request).unwrap_or(serde_json::Value::Null);
    let key = cache_key(&partition, &body_value);

    if let Some(cached) = state.cache.get(&key) {
        metrics::record_ask_outcome("cached");
        record_profile(&state, anon_id.as_deref(), &request);
        return with_headers(
            (StatusCode::OK, Json(cached)).into_response(),
            rate_headers,
        );
    }

    let outcome = match state.coalescer.join(&key) {
        Flight::Leader(guard) => {
            let result = state.engine.ask(&request, &request_id).await;
            if let Ok(response) = &result {
                state.cache.put(&key, response.clone());
            }
            guard.complete(result.clone());
            result
        }
        Flight::Follower(rx) => {
            metrics::record_ask_outcome("coalesced");
            cache::await_leader(rx).await
        }
    };

    match outcome {
        Ok(response) => {
            metrics::record_ask_outcome("answered");
            record_profile(&state, anon_id.as_deref(), &request);
            with_headers(
                (StatusCode::OK, Json(response)).into_response(),
                rate_headers,
            )
        }
        Err(err) => {
            metrics::record_ask_outcome("error");
            tracing::warn!(request_id = %request_id, error = %err, "ask.failed");
            with_headers(
                to_api_error(&err, &request_id, state.config.is_production()).into_response(),
                rate_headers,
            )
        }
    }
}

fn record_profile(state: &AppState, anon_id: Option<&str>, request: &AskRequest) {
    if let Some(anon_id) = anon_id {
        state.profiles.record(
            anon_id,
            request.language,
            request.style,
            &planner::normalize_question(&request.question),
        );
    }
}

/// Origin for robots/sitemap: configured public base URL, else forwarded
/// proto/host, else the request Host header over plain http.
fn site_origin(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.config.public_base_url {
        return base.clone();
    }
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .unwrap_or("http");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .unwrap_or_else(|| format!("localhost:{}", state.config.port));
    format!("{}://{}", proto, host)
}

async fn robots(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let origin = site_origin(&state, &headers);
    let body = format!(
        "User-agent: *\nAllow: /\nDisallow: /api/\nSitemap: {}/sitemap.xml\n",
        origin
    );
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

async fn sitemap(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let origin = site_origin(&state, &headers);
    let body = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
            "  <url>\n",
            "    <loc>{}/</loc>\n",
            "    <changefreq>daily</changefreq>\n",
            "    <priority>1.0</priority>\n",
            "  </url>\n",
            "</urlset>\n",
        ),
        origin
    );
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

async fn metrics_text() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
        .into_response()
}
