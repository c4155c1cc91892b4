//! Request orchestration: classify → plan → retrieve → fuse → compose.
//!
//! The orchestrator owns the request lifecycle and its budgets. Variant
//! searches fan out concurrently — the one place true concurrency matters,
//! since it bounds end-to-end latency under a multi-variant plan — and are
//! merged by variant index ascending so fusion never depends on completion
//! order. Component failures are caught here and degrade to a usable payload;
//! the caller never sees a raw error string.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::compose::{Composer, UNAVAILABLE_ANSWER};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::errors::AskError;
use crate::fuse;
use crate::generation;
use crate::intent::IntentRouter;
use crate::models::{
    AnswerMeta, AnswerPayload, Candidate, DebugMeta, IntentLabel, LatencyBreakdown, ScopeFilters,
    ScopeHint,
};
use crate::planner::{LlmParaphraser, Planner, RuleParaphraser};
use crate::store::CandidateStore;

/// Validated inbound question.
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub q: String,
    pub k: Option<i64>,
    pub hint: ScopeHint,
}

const SMALL_TALK_ANSWER: &str = "Hello! I'm the Sustainacore assistant. Ask me about the \
TECH100 index, a company's ESG profile, or sustainability regulation.";

pub struct Orchestrator {
    config: Config,
    intent: IntentRouter,
    planner: Planner,
    store: Arc<CandidateStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    composer: Composer,
}

impl Orchestrator {
    /// Composition root: builds the provider stack from configuration.
    ///
    /// Strategy selection happens here, not at request time — the planner and
    /// composer get either the rule-based or the LLM-assisted implementation
    /// depending on the generation master switch.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;

        let embedder: Arc<dyn EmbeddingProvider> =
            embedding::create_provider(&config.embedding)?.into();
        let generation: Arc<dyn generation::GenerationProvider> =
            generation::create_generation(&config.generation)?.into();

        let store = Arc::new(CandidateStore::new(
            pool,
            embedder.model_name().to_string(),
            embedder.dims(),
        ));

        // Fail fast on a mismatched corpus when strict parity is on;
        // otherwise log loudly and degrade per request.
        if let Err(e) = store.verify_parity().await {
            if config.embedding.strict_parity {
                return Err(e.into());
            }
            tracing::error!(error = %e, "serving with embedding parity mismatch");
        }

        let paraphraser: Box<dyn crate::planner::Paraphraser> = if config.generation.is_enabled() {
            Box::new(LlmParaphraser::new(generation.clone()))
        } else {
            Box::new(RuleParaphraser)
        };
        let planner = Planner::new(paraphraser, config.retrieval.clone());

        let composer = Composer::new(
            generation,
            &config.floor,
            &config.retrieval,
            &config.generation,
        );

        Ok(Self {
            config: config.clone(),
            intent: IntentRouter::new(&config.intent),
            planner,
            store,
            embedder,
            composer,
        })
    }

    pub fn store(&self) -> &CandidateStore {
        &self.store
    }

    /// Input validation ahead of any downstream work.
    pub fn validate(q: &str, k: Option<i64>) -> Result<(), AskError> {
        if q.trim().is_empty() {
            return Err(AskError::InvalidRequest("q must not be empty".to_string()));
        }
        if let Some(k) = k {
            if k < 1 {
                return Err(AskError::InvalidRequest(
                    "k must be a positive integer".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Run one validated request to completion. Infallible by contract:
    /// retrieval and generation failures degrade, they do not propagate.
    pub async fn handle(&self, request: &AskRequest) -> AnswerPayload {
        let request_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let mut latency = LatencyBreakdown::default();

        let label = self.intent.classify(&request.q);
        latency.classify = started.elapsed().as_millis() as u64;

        if label == IntentLabel::SmallTalk {
            latency.total = started.elapsed().as_millis() as u64;
            tracing::info!(%request_id, intent = "small_talk", "request served without retrieval");
            return self.small_talk_payload(latency);
        }

        let budget = Duration::from_millis(self.config.server.request_budget_ms);
        let result = tokio::time::timeout(budget, self.answer(request, started, &mut latency)).await;

        latency.total = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(payload)) => {
                tracing::info!(
                    %request_id,
                    total_ms = latency.total,
                    top_score = payload.meta.top_score,
                    sources = payload.sources.len(),
                    "request served"
                );
                payload
            }
            Ok(Err(e)) => {
                tracing::error!(%request_id, error = %e, "request degraded");
                self.unavailable_payload(latency)
            }
            Err(_) => {
                tracing::error!(%request_id, budget_ms = self.config.server.request_budget_ms, "request budget exceeded");
                self.unavailable_payload(latency)
            }
        }
    }

    async fn answer(
        &self,
        request: &AskRequest,
        started: Instant,
        latency: &mut LatencyBreakdown,
    ) -> Result<AnswerPayload, AskError> {
        // Planning
        let phase = Instant::now();
        let mut plan = self.planner.plan(&request.q, &request.hint).await;
        if let Some(k) = request.k {
            plan.k = k;
        }
        latency.plan = phase.elapsed().as_millis() as u64;

        // Retrieval: embed all variants in one batch, then fan out
        let phase = Instant::now();
        let vectors = self
            .embedder
            .embed(&plan.variants)
            .await
            .map_err(|e| AskError::RetrievalUnavailable(e.to_string()))?;

        let batches = self.search_variants(&plan.filters, vectors, plan.k).await?;
        let raw_candidates: usize = batches.iter().map(|(_, b)| b.len()).sum();
        latency.retrieve = phase.elapsed().as_millis() as u64;

        // Fusion (pure, in-memory)
        let phase = Instant::now();
        let facts = fuse::fuse(&batches, &self.config.retrieval);
        let top_score = facts.first().map(|f| f.score).unwrap_or(0.0);
        latency.fuse = phase.elapsed().as_millis() as u64;

        // Composition
        let phase = Instant::now();
        let composition = self.composer.compose(&request.q, &facts, top_score).await;
        latency.compose = phase.elapsed().as_millis() as u64;
        latency.total = started.elapsed().as_millis() as u64;

        let debug = self.config.server.debug_meta.then(|| DebugMeta {
            plan: plan.clone(),
            raw_candidates,
            merged_candidates: facts.len(),
            uncited: composition.uncited.clone(),
            floor_breached: composition.floor_breached,
        });

        Ok(AnswerPayload {
            answer: composition.answer,
            sources: composition.cited.iter().map(|f| f.source_line()).collect(),
            meta: AnswerMeta {
                scope: plan.scope,
                filters: plan.filters,
                top_score,
                latency_ms: latency.clone(),
                debug,
            },
            suggestions: Vec::new(),
        })
    }

    /// Fan the variant searches out concurrently, each under its own timeout,
    /// all under the aggregate retrieval deadline. Partial success is better
    /// than total failure: stragglers are abandoned once the deadline passes
    /// and fusion proceeds with what completed.
    async fn search_variants(
        &self,
        filters: &ScopeFilters,
        vectors: Vec<Vec<f32>>,
        k: i64,
    ) -> Result<Vec<(usize, Vec<Candidate>)>, AskError> {
        let variant_timeout = Duration::from_millis(self.config.retrieval.variant_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.retrieval.phase_budget_ms);

        let mut set: JoinSet<(usize, Result<Vec<Candidate>, AskError>)> = JoinSet::new();
        for (variant_index, vector) in vectors.into_iter().enumerate() {
            let store = self.store.clone();
            let filters = filters.clone();
            set.spawn(async move {
                let result = match tokio::time::timeout(
                    variant_timeout,
                    store.search(&filters, &vector, k),
                )
                .await
                {
                    Ok(r) => r,
                    Err(_) => Err(AskError::RetrievalUnavailable(
                        "variant search timed out".to_string(),
                    )),
                };
                (variant_index, result)
            });
        }

        let mut batches = Vec::new();
        let mut failures = 0usize;

        while !set.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    completed = batches.len(),
                    pending = set.len(),
                    "retrieval deadline reached, abandoning in-flight variants"
                );
                set.abort_all();
                break;
            }
            match tokio::time::timeout(remaining, set.join_next()).await {
                Ok(Some(Ok((variant_index, Ok(candidates))))) => {
                    batches.push((variant_index, candidates));
                }
                Ok(Some(Ok((variant_index, Err(e))))) => {
                    failures += 1;
                    tracing::warn!(variant_index, error = %e, "variant search failed");
                }
                Ok(Some(Err(join_error))) => {
                    failures += 1;
                    tracing::warn!(error = %join_error, "variant search task aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        completed = batches.len(),
                        pending = set.len(),
                        "retrieval deadline reached, abandoning in-flight variants"
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        if batches.is_empty() && failures > 0 {
            return Err(AskError::RetrievalUnavailable(
                "all variant searches failed".to_string(),
            ));
        }

        // Stable merge order for the later-duplicate-wins rule
        batches.sort_by_key(|(variant_index, _)| *variant_index);
        Ok(batches)
    }

    fn small_talk_payload(&self, latency: LatencyBreakdown) -> AnswerPayload {
        let suggestions: Vec<String> = self
            .config
            .intent
            .suggestions
            .iter()
            .take(4)
            .cloned()
            .collect();
        AnswerPayload {
            answer: SMALL_TALK_ANSWER.to_string(),
            sources: Vec::new(),
            meta: AnswerMeta {
                scope: None,
                filters: ScopeFilters::default(),
                top_score: 0.0,
                latency_ms: latency,
                debug: None,
            },
            suggestions,
        }
    }

    fn unavailable_payload(&self, latency: LatencyBreakdown) -> AnswerPayload {
        AnswerPayload {
            answer: UNAVAILABLE_ANSWER.to_string(),
            sources: Vec::new(),
            meta: AnswerMeta {
                scope: None,
                filters: ScopeFilters::default(),
                top_score: 0.0,
                latency_ms: latency,
                debug: None,
            },
            suggestions: Vec::new(),
        }
    }
}
