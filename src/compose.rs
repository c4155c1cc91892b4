//! Answer composition and citation management.
//!
//! Composition takes the fused fact list and produces the final narrative
//! with inline `[citation_id]` markers. The similarity floor gate runs first:
//! below the floor in `enforce` mode the standard insufficient-context answer
//! goes out with no sources at all, whatever was retrieved. Narrative prose
//! comes from the generation provider when the augmented path is enabled;
//! when it is off or the call fails, a templated citation-only answer is
//! built directly from the top facts. Every citation id appearing in the
//! answer maps to exactly one source entry, and uncited facts are dropped
//! from `sources` (they surface in `meta.debug` when that flag is on).

use std::sync::Arc;

use crate::config::{FloorConfig, GenerationConfig, RetrievalConfig};
use crate::generation::GenerationProvider;
use crate::models::Fact;

/// Standard refusal used when the floor gate fires or nothing was retrieved.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str = "I don't have enough reliable context to \
answer that confidently. Try rephrasing, or ask about a TECH100 company, an ESG \
regulation, or the index itself.";

/// Generic degradation payload text; never a raw error string.
pub const UNAVAILABLE_ANSWER: &str =
    "The assistant is temporarily unavailable. Please try again in a moment.";

/// Hard ceiling on rendered sources, independent of configuration.
const SOURCE_HARD_CAP: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloorMode {
    Enforce,
    Monitor,
    Off,
}

impl FloorMode {
    pub fn parse(mode: &str) -> Self {
        match mode {
            "monitor" => FloorMode::Monitor,
            "off" => FloorMode::Off,
            _ => FloorMode::Enforce,
        }
    }
}

/// Composition outcome handed back to the orchestrator.
#[derive(Debug, Clone)]
pub struct Composition {
    pub answer: String,
    /// Facts cited in `answer`, in rendering order; becomes `sources`.
    pub cited: Vec<Fact>,
    /// Facts that survived fusion but are not cited.
    pub uncited: Vec<Fact>,
    pub floor_breached: bool,
}

pub struct Composer {
    generation: Arc<dyn GenerationProvider>,
    generation_enabled: bool,
    floor: f64,
    mode: FloorMode,
    max_sources: usize,
}

impl Composer {
    pub fn new(
        generation: Arc<dyn GenerationProvider>,
        floor_config: &FloorConfig,
        retrieval_config: &RetrievalConfig,
        generation_config: &GenerationConfig,
    ) -> Self {
        Self {
            generation,
            generation_enabled: generation_config.is_enabled(),
            floor: floor_config.similarity_floor,
            mode: FloorMode::parse(&floor_config.mode),
            max_sources: retrieval_config.max_facts.min(SOURCE_HARD_CAP),
        }
    }

    pub async fn compose(&self, query: &str, facts: &[Fact], top_score: f64) -> Composition {
        let floor_breached = self.mode != FloorMode::Off && top_score < self.floor;

        if floor_breached {
            match self.mode {
                FloorMode::Enforce => {
                    return Composition {
                        answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                        cited: Vec::new(),
                        uncited: facts.to_vec(),
                        floor_breached: true,
                    };
                }
                FloorMode::Monitor => {
                    tracing::warn!(top_score, floor = self.floor, "similarity floor breached");
                }
                FloorMode::Off => unreachable!(),
            }
        }

        if facts.is_empty() {
            return Composition {
                answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                cited: Vec::new(),
                uncited: Vec::new(),
                floor_breached,
            };
        }

        // Rank by fused score and keep the top N
        let pool: Vec<Fact> = facts.iter().take(self.max_sources).cloned().collect();
        let overflow: Vec<Fact> = facts.iter().skip(self.max_sources).cloned().collect();

        if self.generation_enabled {
            match self.generate_narrative(query, &pool).await {
                Ok(text) => {
                    let (answer, cited, mut uncited) = reconcile_citations(&text, &pool);
                    if !cited.is_empty() {
                        uncited.extend(overflow);
                        return Composition {
                            answer,
                            cited,
                            uncited,
                            floor_breached,
                        };
                    }
                    tracing::warn!("generated narrative cited no known facts, using template");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "narrative generation failed, using template");
                }
            }
        }

        let (answer, cited) = templated_answer(query, &pool);
        Composition {
            answer,
            cited,
            uncited: overflow,
            floor_breached,
        }
    }

    async fn generate_narrative(&self, query: &str, facts: &[Fact]) -> anyhow::Result<String> {
        let mut fact_block = String::new();
        for fact in facts {
            fact_block.push_str(&format!(
                "[{}] {} ({}{}): {}\n",
                fact.citation_id,
                fact.title,
                fact.source_name,
                fact.date
                    .as_deref()
                    .map(|d| format!(", {}", d))
                    .unwrap_or_default(),
                fact.snippet,
            ));
        }
        let user = format!(
            "Question: {}\n\nFacts:\n{}\nAnswer the question in 2-4 sentences using only \
             these facts. Cite each fact you use inline with its bracketed id, e.g. [{}].",
            query,
            fact_block,
            facts[0].citation_id,
        );
        self.generation.complete(NARRATIVE_SYSTEM, &user).await
    }
}

const NARRATIVE_SYSTEM: &str = "You are the Sustainacore ESG assistant. Answer strictly \
from the provided facts. Never invent sources or citation ids. If the facts do not \
answer the question, say so.";

/// Validate generated text against the fact pool: keep markers whose id is a
/// known fact, strip citation-shaped markers that are not, and return the
/// cited facts in rendering order.
fn reconcile_citations(text: &str, pool: &[Fact]) -> (String, Vec<Fact>, Vec<Fact>) {
    let mut answer = String::with_capacity(text.len());
    let mut cited_order: Vec<String> = Vec::new();

    let mut rest = text;
    while let Some(open) = rest.find('[') {
        answer.push_str(&rest[..open]);
        let tail = &rest[open..];
        match tail.find(']') {
            Some(close) => {
                let token = &tail[1..close];
                if pool.iter().any(|f| f.citation_id == token) {
                    if !cited_order.contains(&token.to_string()) {
                        cited_order.push(token.to_string());
                    }
                    answer.push_str(&tail[..=close]);
                } else if !is_citation_shaped(token) {
                    // Ordinary bracketed text, not a citation marker
                    answer.push_str(&tail[..=close]);
                }
                // citation-shaped but unknown: dropped
                rest = &tail[close + 1..];
            }
            None => {
                answer.push_str(tail);
                rest = "";
            }
        }
    }
    answer.push_str(rest);

    // Collapse doubled spaces left by stripped markers
    let answer = answer.split_whitespace().collect::<Vec<_>>().join(" ");

    let cited: Vec<Fact> = pool
        .iter()
        .filter(|f| cited_order.contains(&f.citation_id))
        .cloned()
        .collect();
    let uncited: Vec<Fact> = pool
        .iter()
        .filter(|f| !cited_order.contains(&f.citation_id))
        .cloned()
        .collect();

    (answer, cited, uncited)
}

/// A token counts as citation-shaped when it is 8 hex chars, optionally with
/// the `-N` collision suffix fusion appends.
fn is_citation_shaped(token: &str) -> bool {
    let base = token.split('-').next().unwrap_or("");
    base.len() == 8 && base.chars().all(|c| c.is_ascii_hexdigit())
}

/// Citation-only fallback built directly from the top facts.
fn templated_answer(query: &str, pool: &[Fact]) -> (String, Vec<Fact>) {
    let mut answer = format!("Here is what the indexed sources say about \"{}\":", query);
    for fact in pool {
        answer.push_str(&format!("\n- {} [{}]", fact.snippet, fact.citation_id));
    }
    (answer, pool.to_vec())
}
