//! Batch pattern extraction
//!
//! Groups resolved tickets coarsely by category and tag set, embeds each
//! group's learning text in one batch, and merges tickets whose embeddings
//! are similar enough into clusters. Output ordering is deterministic for a
//! given input set so repeated runs see the same patterns in the same order.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::LearningConfig;
use crate::error::Result;
use crate::llm::{cosine_similarity, Embedder};
use crate::tickets::ResolvedTicket;

/// A cluster of tickets describing the same recurring issue
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Member tickets, ordered by creation time then id
    pub tickets: Vec<ResolvedTicket>,
}

impl Pattern {
    pub fn member_ids(&self) -> Vec<String> {
        self.tickets.iter().map(|t| t.id.clone()).collect()
    }

    /// The shared category of the cluster (members always agree on it)
    pub fn category(&self) -> &str {
        self.tickets
            .first()
            .map(|t| t.category.as_str())
            .unwrap_or("")
    }

    pub fn size(&self) -> usize {
        self.tickets.len()
    }
}

/// Similarity-based clustering over resolved tickets
pub struct PatternExtractor {
    embedder: Arc<dyn Embedder>,
    similarity_threshold: f32,
    min_cluster_size: usize,
}

impl PatternExtractor {
    pub fn new(embedder: Arc<dyn Embedder>, config: &LearningConfig) -> Self {
        Self {
            embedder,
            similarity_threshold: config.similarity_threshold,
            min_cluster_size: config.min_cluster_size,
        }
    }

    /// Extract patterns from a batch of tickets.
    ///
    /// Tickets in different categories (or with different tag sets) never
    /// merge. Clusters below the minimum size are dropped; their tickets
    /// simply produce no pattern.
    pub async fn extract(&self, tickets: &[ResolvedTicket]) -> Result<Vec<Pattern>> {
        if tickets.is_empty() {
            return Ok(Vec::new());
        }

        // BTreeMap keeps group iteration order stable across runs
        let mut groups: BTreeMap<String, Vec<ResolvedTicket>> = BTreeMap::new();
        for ticket in tickets {
            groups
                .entry(ticket.group_key())
                .or_default()
                .push(ticket.clone());
        }

        let mut patterns = Vec::new();
        for (key, group) in groups {
            if group.len() < self.min_cluster_size {
                continue;
            }
            debug!(group = %key, tickets = group.len(), "Clustering ticket group");
            patterns.extend(self.cluster_group(group).await?);
        }

        patterns.sort_by(|a, b| {
            b.size()
                .cmp(&a.size())
                .then_with(|| {
                    let a_first = a.tickets.first().map(|t| t.created_at);
                    let b_first = b.tickets.first().map(|t| t.created_at);
                    a_first.cmp(&b_first)
                })
                .then_with(|| {
                    let a_id = a.tickets.first().map(|t| t.id.clone());
                    let b_id = b.tickets.first().map(|t| t.id.clone());
                    a_id.cmp(&b_id)
                })
        });

        info!(
            tickets = tickets.len(),
            patterns = patterns.len(),
            "Pattern extraction finished"
        );
        Ok(patterns)
    }

    async fn cluster_group(&self, mut group: Vec<ResolvedTicket>) -> Result<Vec<Pattern>> {
        group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let texts: Vec<String> = group.iter().map(|t| t.learning_text()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let mut uf = UnionFind::new(group.len());
        for i in 0..group.len() {
            for j in (i + 1)..group.len() {
                let similarity = cosine_similarity(&embeddings[i], &embeddings[j]);
                if similarity >= self.similarity_threshold {
                    uf.union(i, j);
                }
            }
        }

        // Collect members per root, preserving the sorted ticket order
        let mut clusters: BTreeMap<usize, Vec<ResolvedTicket>> = BTreeMap::new();
        for (i, ticket) in group.into_iter().enumerate() {
            clusters.entry(uf.find(i)).or_default().push(ticket);
        }

        Ok(clusters
            .into_values()
            .filter(|members| members.len() >= self.min_cluster_size)
            .map(|tickets| Pattern { tickets })
            .collect())
    }
}

/// Disjoint-set forest with path compression
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            // Smaller root wins so cluster roots track the earliest member
            let (keep, absorb) = if root_a < root_b {
                (root_a, root_b)
            } else {
                (root_b, root_a)
            };
            self.parent[absorb] = keep;
        }
    }
}
