use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use futures::future::join_all;

use nolia_contracts::canonical::canonical_url_key;
use nolia_contracts::{
    AskMode, AskRequest, AskResponse, Citation, EvidenceSource, GroundedFact, Language,
    SourceCandidate, WebTopic,
};

use crate::citations;
use crate::clock;
use crate::error::{ErrorKind, HttpError};
use crate::excerpt;
use crate::fetch::PageFetcher;
use crate::followups;
use crate::openrouter::{ChatBackend, ChatMessage, ChatRequest, LlmError};
use crate::planner::{self, QueryPlan};
use crate::prompt::{self, PromptOptions};
use crate::rank;
use crate::safety;
use crate::search::{SearchBackend, SearchDepth, SearchOptions};

pub const PROVIDER_NAME: &str = "openrouter";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_MAX_BYTES: usize = 1_000_000;
const MODELS_TIMEOUT: Duration = Duration::from_secs(10);

const FACTS_TIMEOUT: Duration = Duration::from_secs(25);
const FACTS_TEMPERATURE: f32 = 0.1;
const FACTS_MAX_TOKENS: u32 = 520;

const COMPOSE_TIMEOUT: Duration = Duration::from_secs(30);
const COMPOSE_TEMPERATURE: f32 = 0.2;
const COMPOSE_MAX_TOKENS: u32 = 900;

const DIRECT_TIMEOUT: Duration = Duration::from_secs(30);
const DIRECT_TEMPERATURE_FAST: f32 = 0.7;
const DIRECT_TEMPERATURE_VERIFIED: f32 = 0.3;
const STRICT_TEMPERATURE: f32 = 0.2;

const FOLLOW_UPS_TIMEOUT: Duration = Duration::from_secs(12);
const FOLLOW_UPS_TEMPERATURE: f32 = 0.5;
const FOLLOW_UPS_MAX_TOKENS: u32 = 140;

const RAW_EXCERPT_CHARS: usize = 1200;
const RAW_EXCERPT_CHUNKS: usize = 3;
const FETCH_EXCERPT_CHARS: usize = 2200;
const FETCH_EXCERPT_CHUNKS: usize = 4;

/// The ask pipeline with its provider seams. Search, completion and page
/// fetching are trait objects so tests can script them.
pub struct AskEngine {
    pub llm: Arc<dyn ChatBackend>,
    pub search_backends: Vec<Arc<dyn SearchBackend>>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub default_model: Option<String>,
}

fn llm_error(err: LlmError) -> HttpError {
    match err {
        LlmError::Auth(_) => HttpError::new(
            ErrorKind::UpstreamAuth,
            "completion provider rejected the configured API key",
        ),
        other => HttpError::new(ErrorKind::UpstreamLlm, other.to_string()),
    }
}

fn max_fetch_for(verified: bool, fresh: bool) -> usize {
    match (verified, fresh) {
        (true, true) => 5,
        (true, false) => 4,
        (false, true) => 4,
        (false, false) => 3,
    }
}

fn direct_user_content(evidence: &str, question: &str) -> String {
    if evidence.trim().is_empty() {
        question.to_string()
    } else {
        format!("Sources:\n{}\nQuestion: {}", evidence, question)
    }
}

/// Tolerant parse of the grounded-facts reply: plain JSON, fenced JSON, or
/// an array embedded in prose. Facts are sanitized against the source count.
fn parse_grounded_facts(reply: &str, sources_count: usize) -> Vec<GroundedFact> {
    let body = reply.trim();
    let body = match body.find("```") {
        Some(start) => {
            let inner = &body[start + 3..];
            let inner = inner.strip_prefix("json").unwrap_or(inner);
            match inner.find("```") {
                Some(end) => inner[..end].trim(),
                None => inner.trim(),
            }
        }
        None => body,
    };

    let parsed = serde_json::from_str::<Vec<GroundedFact>>(body).ok().or_else(|| {
        let start = body.find('[')?;
        let end = body.rfind(']')?;
        if start >= end {
            return None;
        }
        serde_json::from_str::<Vec<GroundedFact>>(&body[start..=end]).ok()
    });

    parsed
        .unwrap_or_default()
        .into_iter()
        .filter_map(|fact| fact.sanitized(sources_count))
        .collect()
}

impl AskEngine {
    pub async fn ask(
        &self,
        request: &AskRequest,
        request_id: &str,
    ) -> Result<AskResponse, HttpError> {
        let started = Instant::now();
        let normalized = planner::normalize_question(&request.question);
        let hindi = request.language == Language::Hi
            || (request.language == Language::Auto && planner::detect_hinglish(&normalized));

        // Shortcuts return before any outbound call is made.
        if clock::clock_intent(&normalized) {
            tracing::info!(request_id = %request_id, "ask.local_clock");
            let core = planner::topical_core(&normalized);
            return Ok(respond(
                "local-clock".to_string(),
                clock::clock_answer(hindi, Local::now()),
                Vec::new(),
                followups::heuristic_follow_ups(&core, hindi),
                started,
            ));
        }

        if let Some(reason) = safety::check(&normalized) {
            tracing::warn!(request_id = %request_id, reason = reason, "ask.refused");
            return Ok(respond(
                format!("policy-{}", reason),
                safety::refusal_answer(reason, hindi),
                Vec::new(),
                safety::refusal_follow_ups(hindi),
                started,
            ));
        }

        let model = self.resolve_model(request).await?;
        if !self.llm.configured() {
            return Err(HttpError::new(
                ErrorKind::Misconfigured,
                "completion provider API key is not configured",
            ));
        }

        let plan = planner::plan(&request.question, &normalized, request.mode);
        let sources = if request.use_web {
            self.gather_evidence(request, &plan, &normalized, request_id)
                .await
        } else {
            Vec::new()
        };

        let answer = self.compose_answer(request, &model, &sources).await?;

        let citations = citations::map_citations(&answer, &sources);
        let follow_ups = self
            .follow_ups(request, &normalized, &model, &answer, hindi)
            .await;

        tracing::info!(
            request_id = %request_id,
            model = %model,
            sources = sources.len(),
            citations = citations.len(),
            "ask.answered"
        );

        Ok(respond(model, answer, citations, follow_ups, started))
    }

    async fn resolve_model(&self, request: &AskRequest) -> Result<String, HttpError> {
        if let Some(model) = &request.model {
            return Ok(model.clone());
        }
        if let Some(model) = &self.default_model {
            return Ok(model.clone());
        }
        self.llm
            .list_free_models(MODELS_TIMEOUT)
            .await
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| {
                HttpError::new(
                    ErrorKind::NoModelAvailable,
                    "no completion model is available",
                )
            })
    }

    async fn gather_evidence(
        &self,
        request: &AskRequest,
        plan: &QueryPlan,
        normalized: &str,
        request_id: &str,
    ) -> Vec<EvidenceSource> {
        let verified = request.mode == AskMode::Verified;
        let fresh = plan.fresh();
        let max_results = if fresh { 6 } else { 4 };
        let depth = if verified && fresh {
            SearchDepth::Advanced
        } else if verified {
            SearchDepth::Basic
        } else {
            SearchDepth::Fast
        };
        let topic = request.web_topic.unwrap_or(if plan.finance {
            WebTopic::Finance
        } else {
            WebTopic::General
        });
        let options = SearchOptions {
            topic,
            time_range: request.web_time_range,
            depth,
            include_raw_content: verified,
            timeout: SEARCH_TIMEOUT,
        };

        // Fan out every (provider, query) pair; a failing provider only
        // costs its own results.
        let mut calls = Vec::new();
        for backend in &self.search_backends {
            if !backend.enabled() {
                continue;
            }
            for query in plan.queries.iter().take(backend.max_queries()) {
                let backend = Arc::clone(backend);
                let query = query.clone();
                let options = options.clone();
                calls.push(async move {
                    match backend.search(&query, max_results, &options).await {
                        Ok(batch) => Some(batch),
                        Err(err) => {
                            tracing::warn!(
                                provider = backend.name(),
                                error = %err,
                                "search.provider_failed"
                            );
                            None
                        }
                    }
                });
            }
        }
        let batches = join_all(calls).await;

        let question_tokens = planner::question_tokens(normalized);
        let today = Utc::now().date_naive();

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut candidates: Vec<SourceCandidate> = Vec::new();

        for batch in batches.into_iter().flatten() {
            let raw_content = batch.raw_content;
            for result in batch.results {
                let Some(norm_url) = canonical_url_key(&result.url) else {
                    continue;
                };
                let mut source = EvidenceSource::from(result);
                if let Some(raw) = raw_content.get(&source.url) {
                    let excerpted = excerpt::build_excerpt(
                        raw,
                        normalized,
                        RAW_EXCERPT_CHARS,
                        RAW_EXCERPT_CHUNKS,
                    );
                    if !excerpted.is_empty() {
                        source.extracted_text = Some(excerpted);
                    }
                }
                let score = rank::score_source(&source, &question_tokens, fresh, today);

                match index.get(&norm_url).copied() {
                    Some(i) => {
                        let existing = &mut candidates[i];
                        if score > existing.score {
                            let mut source = source;
                            if source.extracted_text.is_none() {
                                source.extracted_text = existing.source.extracted_text.take();
                            }
                            existing.source = source;
                            existing.score = score;
                        } else if existing.source.extracted_text.is_none()
                            && source.extracted_text.is_some()
                        {
                            existing.source.extracted_text = source.extracted_text;
                        }
                    }
                    None => {
                        index.insert(norm_url.clone(), candidates.len());
                        candidates.push(SourceCandidate {
                            source,
                            score,
                            norm_url,
                        });
                    }
                }
            }
        }

        let mut sources = rank::select_sources(candidates, fresh);

        let max_fetch = max_fetch_for(verified, fresh);
        let targets = sources
            .iter()
            .enumerate()
            .filter(|(_, source)| source.extracted_text.is_none())
            .take(max_fetch)
            .map(|(idx, source)| (idx, source.url.clone()))
            .collect::<Vec<_>>();

        let fetches = targets.into_iter().map(|(idx, url)| {
            let fetcher = Arc::clone(&self.fetcher);
            async move {
                match fetcher
                    .fetch_page_text(&url, FETCH_TIMEOUT, FETCH_MAX_BYTES)
                    .await
                {
                    Ok(text) => Some((idx, text)),
                    Err(err) => {
                        tracing::debug!(url = %url, error = %err, "fetch.page_failed");
                        None
                    }
                }
            }
        });
        for (idx, text) in join_all(fetches).await.into_iter().flatten() {
            let excerpted = excerpt::build_excerpt(
                &text,
                normalized,
                FETCH_EXCERPT_CHARS,
                FETCH_EXCERPT_CHUNKS,
            );
            if !excerpted.is_empty() {
                sources[idx].extracted_text = Some(excerpted);
            }
        }

        tracing::info!(
            request_id = %request_id,
            sources = sources.len(),
            fresh = fresh,
            "ask.evidence_ready"
        );
        sources
    }

    async fn compose_answer(
        &self,
        request: &AskRequest,
        model: &str,
        sources: &[EvidenceSource],
    ) -> Result<String, HttpError> {
        let verified = request.mode == AskMode::Verified;
        let sources_count = sources.len();
        let today_utc = Utc::now().format("%Y-%m-%d").to_string();
        let system = prompt::system_prompt(
            request.style,
            request.mode,
            request.language,
            &today_utc,
            &PromptOptions {
                strict_citations: false,
                sources_count,
            },
        );
        let evidence = prompt::evidence_block(sources);

        let (answer, user_content) = if verified && sources_count > 0 {
            let facts = self
                .extract_facts(request, model, &evidence, sources_count)
                .await;
            if facts.is_empty() {
                // Fact extraction came up empty; fall back to composing
                // straight from the evidence block.
                let user = direct_user_content(&evidence, &request.question);
                let answer = self
                    .chat(
                        model,
                        &system,
                        &user,
                        DIRECT_TIMEOUT,
                        DIRECT_TEMPERATURE_VERIFIED,
                        COMPOSE_MAX_TOKENS,
                    )
                    .await?;
                (answer, user)
            } else {
                let user = format!(
                    "{}\n\nGrounded facts:\n{}\n\nQuestion: {}",
                    prompt::compose_from_facts_prompt(),
                    prompt::facts_block(&facts),
                    request.question
                );
                let answer = self
                    .chat(
                        model,
                        &system,
                        &user,
                        COMPOSE_TIMEOUT,
                        COMPOSE_TEMPERATURE,
                        COMPOSE_MAX_TOKENS,
                    )
                    .await?;
                (answer, user)
            }
        } else {
            let temperature = if verified {
                DIRECT_TEMPERATURE_VERIFIED
            } else {
                DIRECT_TEMPERATURE_FAST
            };
            let user = direct_user_content(&evidence, &request.question);
            let answer = self
                .chat(
                    model,
                    &system,
                    &user,
                    DIRECT_TIMEOUT,
                    temperature,
                    COMPOSE_MAX_TOKENS,
                )
                .await?;
            (answer, user)
        };

        if verified && sources_count > 0 {
            let check = citations::verify(&answer, sources_count);
            if !check.defective {
                return Ok(check.answer);
            }

            // Exactly one strict retry; its answer is final even if still
            // imperfect. A transport failure here keeps the first answer.
            let strict_system = prompt::system_prompt(
                request.style,
                request.mode,
                request.language,
                &today_utc,
                &PromptOptions {
                    strict_citations: true,
                    sources_count,
                },
            );
            match self
                .chat(
                    model,
                    &strict_system,
                    &user_content,
                    COMPOSE_TIMEOUT,
                    STRICT_TEMPERATURE,
                    COMPOSE_MAX_TOKENS,
                )
                .await
            {
                Ok(retried) => {
                    let (cleaned, _) = citations::sanitize(&retried, sources_count);
                    return Ok(cleaned);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "ask.strict_retry_failed");
                    return Ok(check.answer);
                }
            }
        }

        let (cleaned, _) = citations::sanitize(&answer, sources_count);
        Ok(cleaned)
    }

    async fn extract_facts(
        &self,
        request: &AskRequest,
        model: &str,
        evidence: &str,
        sources_count: usize,
    ) -> Vec<GroundedFact> {
        let system = prompt::facts_extraction_prompt(sources_count);
        let user = format!("Sources:\n{}\nQuestion: {}", evidence, request.question);
        match self
            .chat(
                model,
                &system,
                &user,
                FACTS_TIMEOUT,
                FACTS_TEMPERATURE,
                FACTS_MAX_TOKENS,
            )
            .await
        {
            Ok(reply) => parse_grounded_facts(&reply, sources_count),
            Err(err) => {
                tracing::warn!(error = %err, "ask.fact_extraction_failed");
                Vec::new()
            }
        }
    }

    async fn follow_ups(
        &self,
        request: &AskRequest,
        normalized: &str,
        model: &str,
        answer: &str,
        hindi: bool,
    ) -> Vec<String> {
        let user = format!("Question: {}\n\nAnswer:\n{}", request.question, answer);
        let reply = self
            .llm
            .chat(ChatRequest {
                model: model.to_string(),
                messages: vec![
                    ChatMessage::system(prompt::follow_ups_prompt()),
                    ChatMessage::user(user),
                ],
                timeout: FOLLOW_UPS_TIMEOUT,
                temperature: Some(FOLLOW_UPS_TEMPERATURE),
                max_tokens: Some(FOLLOW_UPS_MAX_TOKENS),
            })
            .await;

        let parsed = reply
            .ok()
            .and_then(|text| followups::parse_follow_ups(&text))
            .map(followups::sanitize_follow_ups)
            .filter(|items| !items.is_empty());

        parsed.unwrap_or_else(|| {
            followups::heuristic_follow_ups(&planner::topical_core(normalized), hindi)
        })
    }

    async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
        timeout: Duration,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, HttpError> {
        self.llm
            .chat(ChatRequest {
                model: model.to_string(),
                messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
                timeout,
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
            })
            .await
            .map_err(llm_error)
    }
}

fn respond(
    model: String,
    answer: String,
    citations: Vec<Citation>,
    follow_ups: Vec<String>,
    started: Instant,
) -> AskResponse {
    AskResponse {
        provider: PROVIDER_NAME.to_string(),
        model,
        answer,
        citations,
        follow_ups,
        latency_ms: started.elapsed().as_millis() as u64,
    }
}
