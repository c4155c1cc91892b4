//! Request-path failure taxonomy.
//!
//! Only [`AskError::InvalidRequest`] and [`AskError::RateLimited`] surface as
//! non-success HTTP responses. Retrieval and generation failures are caught at
//! the orchestrator boundary and degrade toward a usable, if reduced, answer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AskError {
    /// Bad or missing `q`; surfaced as a client error, no retry.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Caller exceeded the per-client quota.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Store unreachable or query timeout, after the single bounded retry.
    #[error("candidate store unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Corpus embedding model/dimension disagrees with the configured model.
    /// Fatal at startup under strict parity; otherwise logged loudly and
    /// treated as [`AskError::RetrievalUnavailable`] at request time.
    #[error("embedding parity mismatch: corpus has {corpus}, configured {configured}")]
    EmbeddingParity { corpus: String, configured: String },

    /// Paraphrase or composition service failed. Always recoverable via the
    /// rule-based and templated fallback paths; never user-facing.
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),
}

impl AskError {
    /// Errors that must never reach the caller as a failure response.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            AskError::RetrievalUnavailable(_)
                | AskError::EmbeddingParity { .. }
                | AskError::GenerationUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradable_partition() {
        assert!(!AskError::InvalidRequest("empty q".into()).is_degradable());
        assert!(!AskError::RateLimited.is_degradable());
        assert!(AskError::RetrievalUnavailable("timeout".into()).is_degradable());
        assert!(AskError::GenerationUnavailable("429".into()).is_degradable());
    }
}
