//! Candidate store adapter: metadata-filtered vector KNN over the document
//! table.
//!
//! Filters are applied as a SQL `WHERE` restriction *before* the similarity
//! ranking step — filtering post-hoc on a truncated top-k would silently
//! reduce effective recall. Connections are checked out per call and released
//! immediately; the table is also written by unrelated ingestion jobs.

use sqlx::{Row, SqlitePool};
use std::time::Duration;

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::errors::AskError;
use crate::models::{Candidate, ScopeFilters};

pub struct CandidateStore {
    pool: SqlitePool,
    model: String,
    dims: usize,
}

impl CandidateStore {
    pub fn new(pool: SqlitePool, model: impl Into<String>, dims: usize) -> Self {
        Self {
            pool,
            model: model.into(),
            dims,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read the corpus embedding identity recorded at ingestion time.
    pub async fn corpus_identity(&self) -> Result<Option<(String, usize)>, AskError> {
        let row = sqlx::query("SELECT embedding_model, embedding_dims FROM corpus_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AskError::RetrievalUnavailable(e.to_string()))?;

        Ok(row.map(|r| {
            let model: String = r.get("embedding_model");
            let dims: i64 = r.get("embedding_dims");
            (model, dims as usize)
        }))
    }

    /// Assert that the corpus was embedded with the configured model and
    /// dimensionality. Serving against a mismatched corpus would rank noise.
    pub async fn verify_parity(&self) -> Result<(), AskError> {
        match self.corpus_identity().await? {
            Some((corpus_model, corpus_dims)) => {
                if corpus_model != self.model || corpus_dims != self.dims {
                    return Err(AskError::EmbeddingParity {
                        corpus: format!("{}/{}", corpus_model, corpus_dims),
                        configured: format!("{}/{}", self.model, self.dims),
                    });
                }
                Ok(())
            }
            None => {
                tracing::warn!("corpus_meta is empty; embedding parity cannot be verified");
                Ok(())
            }
        }
    }

    pub async fn document_count(&self) -> Result<i64, AskError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AskError::RetrievalUnavailable(e.to_string()))
    }

    /// Nearest-neighbor search for one query variant.
    ///
    /// Returns up to `k` candidates ordered best-first. One bounded retry
    /// with a short backoff is attempted before surfacing
    /// [`AskError::RetrievalUnavailable`].
    pub async fn search(
        &self,
        filters: &ScopeFilters,
        query_vec: &[f32],
        k: i64,
    ) -> Result<Vec<Candidate>, AskError> {
        if query_vec.len() != self.dims {
            return Err(AskError::EmbeddingParity {
                corpus: format!("{}/{}", self.model, self.dims),
                configured: format!("query/{}", query_vec.len()),
            });
        }

        match self.search_once(filters, query_vec, k).await {
            Ok(candidates) => Ok(candidates),
            Err(first) => {
                tracing::warn!(error = %first, "store query failed, retrying once");
                tokio::time::sleep(Duration::from_millis(150)).await;
                self.search_once(filters, query_vec, k)
                    .await
                    .map_err(|e| AskError::RetrievalUnavailable(e.to_string()))
            }
        }
    }

    async fn search_once(
        &self,
        filters: &ScopeFilters,
        query_vec: &[f32],
        k: i64,
    ) -> Result<Vec<Candidate>, sqlx::Error> {
        // Metadata restriction ahead of the ranking step
        let mut sql = String::from(
            "SELECT id, url, title, source_name, source_id, doc_id, published_at, snippet, embedding \
             FROM documents WHERE 1=1",
        );
        if filters.docset.is_some() {
            sql.push_str(" AND docset = ?");
        }
        if filters.ticker.is_some() {
            sql.push_str(" AND ticker = ?");
        }
        if filters.company.is_some() {
            sql.push_str(" AND company LIKE ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(docset) = &filters.docset {
            query = query.bind(docset);
        }
        if let Some(ticker) = &filters.ticker {
            query = query.bind(ticker);
        }
        if let Some(company) = &filters.company {
            query = query.bind(format!("%{}%", company));
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut candidates: Vec<Candidate> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                if vec.len() != self.dims {
                    // Rows from a different model are meaningless to rank;
                    // skip them rather than pollute the pool.
                    let id: String = row.get("id");
                    tracing::error!(
                        document = %id,
                        row_dims = vec.len(),
                        expected = self.dims,
                        "document embedding dimension mismatch, skipping row"
                    );
                    return None;
                }
                let similarity = cosine_similarity(query_vec, &vec) as f64;
                // Malformed ingestion dates must not leak into citations
                let date: Option<String> = row.get("published_at");
                let date = date
                    .filter(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok());
                Some(Candidate {
                    id: row.get("id"),
                    url: row.get("url"),
                    title: row.get("title"),
                    source_name: row.get("source_name"),
                    source_id: row.get("source_id"),
                    doc_id: row.get("doc_id"),
                    date,
                    snippet: row.get("snippet"),
                    score: similarity,
                })
            })
            .collect();

        // Best first; id ascending as the deterministic tie-break
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(k.max(0) as usize);

        Ok(candidates)
    }
}
