//! Retrieval planning: scope detection, metadata filters, and query variants.
//!
//! A plan widens recall before fusion: the original question plus up to four
//! paraphrases, each searched independently against the store. Paraphrase
//! generation sits behind the [`Paraphraser`] trait with a rule-based and an
//! LLM-backed implementation selected at composition time; if the LLM call
//! fails, planning degrades to a single-variant plan using the raw query and
//! retrieval still proceeds.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::generation::GenerationProvider;
use crate::models::{RetrievalPlan, Scope, ScopeFilters, ScopeHint};

#[async_trait]
pub trait Paraphraser: Send + Sync {
    /// Produce up to `n` paraphrases of `query`, original not included.
    async fn paraphrase(&self, query: &str, n: usize) -> Result<Vec<String>>;
}

// ============ Rule-based paraphraser ============

/// Deterministic paraphrasing: abbreviation expansion, question-prefix
/// stripping, and a keywords-only form. Always available, no network.
pub struct RuleParaphraser;

/// Domain abbreviations expanded to widen vocabulary overlap.
const EXPANSIONS: &[(&str, &str)] = &[
    ("esg", "environmental social governance"),
    ("ai", "artificial intelligence"),
    ("csrd", "corporate sustainability reporting directive"),
    ("sfdr", "sustainable finance disclosure regulation"),
    ("eu", "european union"),
    ("sec", "securities and exchange commission"),
    ("fca", "financial conduct authority"),
];

const QUESTION_PREFIXES: &[&str] = &[
    "is", "are", "was", "were", "does", "do", "did", "can", "could", "what", "which", "who",
    "when", "where", "why", "how", "tell", "show",
];

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "in", "on", "at", "to", "for", "and", "or", "with", "about", "me",
    "it", "its", "this", "that", "there",
];

impl RuleParaphraser {
    fn expand_abbreviations(query: &str) -> Option<String> {
        let mut changed = false;
        let expanded: Vec<String> = query
            .split_whitespace()
            .map(|word| {
                let bare: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                match EXPANSIONS.iter().find(|(abbr, _)| *abbr == bare) {
                    Some((_, full)) => {
                        changed = true;
                        full.to_string()
                    }
                    None => word.to_string(),
                }
            })
            .collect();
        changed.then(|| expanded.join(" "))
    }

    fn strip_question_prefix(query: &str) -> Option<String> {
        let words: Vec<&str> = query.split_whitespace().collect();
        let first = words.first()?.to_lowercase();
        let first_bare: String = first.chars().filter(|c| c.is_alphanumeric()).collect();
        if QUESTION_PREFIXES.contains(&first_bare.as_str()) && words.len() > 2 {
            Some(words[1..].join(" "))
        } else {
            None
        }
    }

    fn keywords_only(query: &str) -> Option<String> {
        let kept: Vec<String> = query
            .split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
            })
            .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.to_lowercase().as_str()))
            .collect();
        if kept.len() >= 2 && kept.len() < query.split_whitespace().count() {
            Some(kept.join(" "))
        } else {
            None
        }
    }
}

#[async_trait]
impl Paraphraser for RuleParaphraser {
    async fn paraphrase(&self, query: &str, n: usize) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if let Some(v) = Self::expand_abbreviations(query) {
            out.push(v);
        }
        if let Some(v) = Self::strip_question_prefix(query) {
            out.push(v);
        }
        if let Some(v) = Self::keywords_only(query) {
            out.push(v);
        }
        out.truncate(n);
        Ok(out)
    }
}

// ============ LLM paraphraser ============

/// Paraphrases via the shared generation client, one variant per line.
pub struct LlmParaphraser {
    generation: Arc<dyn GenerationProvider>,
}

impl LlmParaphraser {
    pub fn new(generation: Arc<dyn GenerationProvider>) -> Self {
        Self { generation }
    }
}

const PARAPHRASE_SYSTEM: &str = "You rewrite search queries for an ESG knowledge base. \
Return only the rewrites, one per line, no numbering. Vary phrasing and expand \
abbreviations; keep every rewrite faithful to the original question.";

#[async_trait]
impl Paraphraser for LlmParaphraser {
    async fn paraphrase(&self, query: &str, n: usize) -> Result<Vec<String>> {
        let user = format!("Rewrite this query {} different ways:\n{}", n, query);
        let text = self.generation.complete(PARAPHRASE_SYSTEM, &user).await?;
        let variants: Vec<String> = text
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*', ' ']).to_string())
            .filter(|l| !l.is_empty())
            .take(n)
            .collect();
        if variants.is_empty() {
            anyhow::bail!("Paraphrase response contained no variants");
        }
        Ok(variants)
    }
}

// ============ Scope detection ============

/// Keyword heuristics mapping a question onto one of the four docsets.
/// Returns `None` (full corpus) when nothing matches.
pub fn detect_scope(query: &str) -> Option<Scope> {
    let lowered = query.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    if has(&["this site", "sustainacore", "about you", "who runs", "who maintains"]) {
        return Some(Scope::SiteDocs);
    }
    if has(&[
        "in the tech100",
        "in tech100",
        "constituent",
        "member of",
        "membership",
        "included in the index",
        "part of the index",
    ]) {
        return Some(Scope::Membership);
    }
    if has(&[
        "regulation",
        "regulatory",
        "directive",
        "compliance",
        "csrd",
        "sfdr",
        "disclosure requirement",
    ]) {
        return Some(Scope::Regulatory);
    }
    if has(&["profile", "who is", "tell me about", "overview of", "esg score"]) {
        return Some(Scope::Profile);
    }
    None
}

// ============ Planner ============

pub struct Planner {
    paraphraser: Box<dyn Paraphraser>,
    retrieval: RetrievalConfig,
}

impl Planner {
    pub fn new(paraphraser: Box<dyn Paraphraser>, retrieval: RetrievalConfig) -> Self {
        Self {
            paraphraser,
            retrieval,
        }
    }

    /// Build the retrieval plan for one question.
    ///
    /// Caller-supplied hints override detected scope. Exactly-duplicate
    /// variants are removed; the original query is always variant 0.
    pub async fn plan(&self, query: &str, hint: &ScopeHint) -> RetrievalPlan {
        let scope = detect_scope(query);

        let docset = hint
            .docset
            .clone()
            .or_else(|| hint.namespace.clone())
            .or_else(|| scope.map(|s| s.docset().to_string()));

        let filters = ScopeFilters {
            docset,
            ticker: hint.ticker.clone(),
            company: hint.company.clone(),
        };

        let want = self.retrieval.variants.clamp(1, 5);
        let mut variants = vec![query.to_string()];

        if want > 1 {
            match self.paraphraser.paraphrase(query, want - 1).await {
                Ok(extra) => variants.extend(extra),
                Err(e) => {
                    // Degrade to the raw query; retrieval must still proceed.
                    tracing::warn!(error = %e, "paraphrase generation failed, using single-variant plan");
                }
            }
        }

        dedup_variants(&mut variants);
        variants.truncate(5);

        RetrievalPlan {
            scope,
            filters,
            variants,
            k: self.retrieval.top_k,
        }
    }
}

/// Remove exactly-duplicate variants (case/whitespace-insensitive), keeping
/// first occurrences in order.
fn dedup_variants(variants: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    variants.retain(|v| {
        let key = v.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        !key.is_empty() && seen.insert(key)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingParaphraser;

    #[async_trait]
    impl Paraphraser for FailingParaphraser {
        async fn paraphrase(&self, _query: &str, _n: usize) -> Result<Vec<String>> {
            anyhow::bail!("paraphrase service timed out")
        }
    }

    fn planner() -> Planner {
        Planner::new(Box::new(RuleParaphraser), RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_plan_includes_original_first() {
        let p = planner();
        let plan = p
            .plan("Is Microsoft in the TECH100 index?", &ScopeHint::default())
            .await;
        assert_eq!(plan.variants[0], "Is Microsoft in the TECH100 index?");
        assert!(plan.variants.len() >= 2);
        assert!(plan.variants.len() <= 5);
        assert_eq!(plan.k, 24);
    }

    #[tokio::test]
    async fn test_membership_scope_detected() {
        let p = planner();
        let plan = p
            .plan("Is Microsoft in the TECH100 index?", &ScopeHint::default())
            .await;
        assert_eq!(plan.scope, Some(Scope::Membership));
        assert_eq!(plan.filters.docset.as_deref(), Some("membership"));
    }

    #[tokio::test]
    async fn test_hint_overrides_detected_scope() {
        let p = planner();
        let hint = ScopeHint {
            docset: Some("regulatory".to_string()),
            ticker: Some("MSFT".to_string()),
            ..Default::default()
        };
        let plan = p.plan("Is Microsoft in the TECH100 index?", &hint).await;
        assert_eq!(plan.filters.docset.as_deref(), Some("regulatory"));
        assert_eq!(plan.filters.ticker.as_deref(), Some("MSFT"));
    }

    #[tokio::test]
    async fn test_no_scope_means_empty_filters() {
        let p = planner();
        let plan = p
            .plan("How green is the data center industry?", &ScopeHint::default())
            .await;
        assert_eq!(plan.scope, None);
        assert!(plan.filters.is_empty());
    }

    #[tokio::test]
    async fn test_paraphrase_failure_falls_back_to_single_variant() {
        let p = Planner::new(Box::new(FailingParaphraser), RetrievalConfig::default());
        let plan = p
            .plan("What does the CSRD require?", &ScopeHint::default())
            .await;
        assert_eq!(plan.variants, vec!["What does the CSRD require?"]);
    }

    #[tokio::test]
    async fn test_variants_are_deduplicated() {
        struct EchoParaphraser;

        #[async_trait]
        impl Paraphraser for EchoParaphraser {
            async fn paraphrase(&self, query: &str, _n: usize) -> Result<Vec<String>> {
                Ok(vec![query.to_string(), query.to_uppercase()])
            }
        }

        let p = Planner::new(Box::new(EchoParaphraser), RetrievalConfig::default());
        let plan = p.plan("tech100 weighting", &ScopeHint::default()).await;
        assert_eq!(plan.variants, vec!["tech100 weighting"]);
    }

    #[test]
    fn test_abbreviation_expansion() {
        let out = RuleParaphraser::expand_abbreviations("What does the CSRD require?").unwrap();
        assert_eq!(
            out,
            "What does the corporate sustainability reporting directive require?"
        );
        assert!(RuleParaphraser::expand_abbreviations("plain question").is_none());
    }

    #[test]
    fn test_question_prefix_stripping() {
        assert_eq!(
            RuleParaphraser::strip_question_prefix("Is Microsoft in the index?").unwrap(),
            "Microsoft in the index?"
        );
        assert!(RuleParaphraser::strip_question_prefix("Microsoft").is_none());
    }

    #[test]
    fn test_keywords_only_drops_stopwords() {
        let out = RuleParaphraser::keywords_only("the weighting of the TECH100 index").unwrap();
        assert_eq!(out, "weighting TECH100 index");
    }
}
