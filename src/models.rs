//! Core data models for the ask2 retrieval pipeline.
//!
//! These types represent the candidates, plans, facts, and answer payloads
//! that flow from the candidate store through fusion to the composed response.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Intent classification outcome for an inbound question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentLabel {
    SmallTalk,
    InfoRequest,
}

/// Detected query scope, used to derive metadata pre-filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Membership,
    Profile,
    Regulatory,
    SiteDocs,
}

impl Scope {
    pub fn docset(&self) -> &'static str {
        match self {
            Scope::Membership => "membership",
            Scope::Profile => "profiles",
            Scope::Regulatory => "regulatory",
            Scope::SiteDocs => "site",
        }
    }
}

/// Metadata restrictions applied in the store query *before* the
/// nearest-neighbor ranking step. Never applied post-hoc on a truncated
/// top-k — that would silently reduce effective recall.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl ScopeFilters {
    pub fn is_empty(&self) -> bool {
        self.docset.is_none() && self.ticker.is_none() && self.company.is_none()
    }
}

/// Caller-supplied overrides that take precedence over auto-detected scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeHint {
    pub docset: Option<String>,
    pub namespace: Option<String>,
    pub ticker: Option<String>,
    pub company: Option<String>,
}

/// Planner output: pre-filters plus 1–5 deduplicated query variants.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    pub filters: ScopeFilters,
    /// Ordered variants, original query first.
    pub variants: Vec<String>,
    /// Candidate pool size requested per variant.
    pub k: i64,
}

/// One retrieved chunk, as returned by the candidate store.
///
/// A candidate with `url`, `source_id`, and `doc_id` all absent has no
/// derivable canonical identity and is dropped during fusion.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub source_name: String,
    pub source_id: Option<String>,
    pub doc_id: Option<String>,
    /// ISO date (`YYYY-MM-DD`) when known.
    pub date: Option<String>,
    pub snippet: String,
    /// Cosine similarity in [0, 1]; higher is better.
    pub score: f64,
}

/// A deduplicated, citation-ready unit emitted by fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fact {
    pub citation_id: String,
    pub title: String,
    pub source_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub snippet: String,
    pub score: f64,
}

impl Fact {
    /// Stable short citation id derived from source, date, and title.
    pub fn derive_citation_id(source_name: &str, date: Option<&str>, title: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_name.as_bytes());
        hasher.update(b"|");
        hasher.update(date.unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(title.as_bytes());
        let digest = hasher.finalize();
        digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
    }

    /// Human-readable source line: `"Title — Publisher (Date)"`.
    pub fn source_line(&self) -> String {
        match &self.date {
            Some(d) => format!("{} — {} ({})", self.title, self.source_name, d),
            None => format!("{} — {}", self.title, self.source_name),
        }
    }
}

/// Per-phase latency breakdown carried in `meta`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyBreakdown {
    pub classify: u64,
    pub plan: u64,
    pub retrieve: u64,
    pub fuse: u64,
    pub compose: u64,
    pub total: u64,
}

/// Diagnostics block, present only when `server.debug_meta` is enabled.
#[derive(Debug, Clone, Serialize)]
pub struct DebugMeta {
    pub plan: RetrievalPlan,
    pub raw_candidates: usize,
    pub merged_candidates: usize,
    /// Facts that survived fusion but were not cited in the answer.
    pub uncited: Vec<Fact>,
    pub floor_breached: bool,
}

/// Response metadata for the `/ask2` contract.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    pub filters: ScopeFilters,
    pub top_score: f64,
    pub latency_ms: LatencyBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugMeta>,
}

/// The `/ask2` response body.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerPayload {
    pub answer: String,
    /// Rendered source lines for the facts actually cited in `answer`, ≤ 6.
    pub sources: Vec<String>,
    pub meta: AnswerMeta,
    /// Suggested follow-up prompts; populated on the small-talk path.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_citation_id_is_stable_and_short() {
        let a = Fact::derive_citation_id("FCA", Some("2025-03-01"), "Consumer Duty update");
        let b = Fact::derive_citation_id("FCA", Some("2025-03-01"), "Consumer Duty update");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_citation_id_varies_by_inputs() {
        let a = Fact::derive_citation_id("FCA", Some("2025-03-01"), "Consumer Duty update");
        let b = Fact::derive_citation_id("FCA", None, "Consumer Duty update");
        let c = Fact::derive_citation_id("SEC", Some("2025-03-01"), "Consumer Duty update");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_source_line_rendering() {
        let fact = Fact {
            citation_id: "deadbeef".to_string(),
            title: "TECH100 constituents".to_string(),
            source_name: "Sustainacore".to_string(),
            url: None,
            date: Some("2025-06-30".to_string()),
            snippet: String::new(),
            score: 0.9,
        };
        assert_eq!(
            fact.source_line(),
            "TECH100 constituents — Sustainacore (2025-06-30)"
        );
    }
}
