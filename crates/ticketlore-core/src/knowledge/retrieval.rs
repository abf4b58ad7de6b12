//! Semantic retrieval over published articles
//!
//! Embeds the query, ranks stored article embeddings by cosine similarity
//! and returns the top matches. Retrieval is a read path on the ticket
//! intake flow, so it degrades to an empty result instead of failing: a
//! slow embedding provider or a storage error must not block triage.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::llm::{cosine_similarity, Embedder};

use super::store::ArticleStore;

/// A ranked retrieval hit
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub article_id: String,
    pub similarity: f64,
    pub rank: usize,
}

/// Similarity search over published article embeddings
#[derive(Clone)]
pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
    store: ArticleStore,
    embedding_model: String,
    min_similarity: f64,
    default_limit: usize,
    embed_timeout: Duration,
}

impl RetrievalService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: ArticleStore,
        embedding_model: impl Into<String>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            embedding_model: embedding_model.into(),
            min_similarity: config.min_similarity,
            default_limit: config.default_limit,
            embed_timeout: Duration::from_secs(config.embed_timeout_secs),
        }
    }

    /// Search published articles for the query.
    ///
    /// Results are ordered by similarity descending; ties break by usage
    /// count, then by most recent update. Only matches at or above the
    /// similarity floor are returned.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<RetrievalResult> {
        let limit = limit.unwrap_or(self.default_limit);
        if query.trim().is_empty() || limit == 0 {
            return Vec::new();
        }

        let query_vector =
            match tokio::time::timeout(self.embed_timeout, self.embedder.embed(query)).await {
                Ok(Ok(vector)) => vector,
                Ok(Err(e)) => {
                    warn!(error = %e, "Query embedding failed, returning no matches");
                    return Vec::new();
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.embed_timeout.as_secs(),
                        "Query embedding timed out, returning no matches"
                    );
                    return Vec::new();
                }
            };

        let candidates = match self.store.published_embeddings(&self.embedding_model).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Failed to load article embeddings, returning no matches");
                return Vec::new();
            }
        };

        let mut scored: Vec<_> = candidates
            .into_iter()
            .map(|c| {
                let similarity = cosine_similarity(&query_vector, &c.vector) as f64;
                (similarity, c)
            })
            .filter(|(similarity, _)| *similarity >= self.min_similarity)
            .collect();

        scored.sort_by(|(sim_a, a), (sim_b, b)| {
            sim_b
                .partial_cmp(sim_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.usage_count.cmp(&a.usage_count))
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });

        debug!(
            query_len = query.len(),
            matches = scored.len(),
            "Retrieval ranked candidates"
        );

        scored
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (similarity, c))| RetrievalResult {
                article_id: c.article_id,
                similarity,
                rank: i + 1,
            })
            .collect()
    }
}
