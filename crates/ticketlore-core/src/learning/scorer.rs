//! Effectiveness scoring
//!
//! Recomputes each article's effectiveness score from accumulated usage
//! signals: helpfulness votes, how often the article gets used, and how
//! often tickets it was cited on actually resolved. The computation itself
//! is pure; persistence goes through the store's optimistic version check.

use tracing::{debug, info, warn};

use crate::config::LearningConfig;
use crate::error::{Error, Result};
use crate::knowledge::store::ArticleStore;

/// Usage normalizer: an article used this often scores a full usage signal
const USAGE_SATURATION: f64 = 100.0;

/// Optimistic write retries before giving up on one article
const SCORE_WRITE_ATTEMPTS: u32 = 3;

/// Signals feeding one article's score
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageSignals {
    pub helpful_votes: i64,
    pub unhelpful_votes: i64,
    pub usage_count: i64,
    pub citing_tickets: i64,
    pub citing_resolved: i64,
}

impl UsageSignals {
    /// Fraction of votes that were helpful; no votes scores zero
    pub fn vote_ratio(&self) -> f64 {
        let total = self.helpful_votes + self.unhelpful_votes;
        self.helpful_votes as f64 / (total.max(1)) as f64
    }

    /// Log-scaled usage, saturating at [`USAGE_SATURATION`] uses
    pub fn usage_trend(&self) -> f64 {
        let scaled = (1.0 + self.usage_count.max(0) as f64).ln() / (1.0 + USAGE_SATURATION).ln();
        scaled.clamp(0.0, 1.0)
    }

    /// Fraction of citing tickets that resolved; no citations scores zero
    pub fn resolution_correlation(&self) -> f64 {
        self.citing_resolved as f64 / (self.citing_tickets.max(1)) as f64
    }
}

/// Weighted scorer over usage signals
#[derive(Debug, Clone)]
pub struct EffectivenessScorer {
    store: ArticleStore,
    weight_votes: f64,
    weight_usage: f64,
    weight_resolution: f64,
}

impl EffectivenessScorer {
    pub fn new(store: ArticleStore, config: &LearningConfig) -> Self {
        Self {
            store,
            weight_votes: config.weight_votes,
            weight_usage: config.weight_usage,
            weight_resolution: config.weight_resolution,
        }
    }

    /// Pure score computation, always in [0, 1]
    pub fn compute(&self, signals: &UsageSignals) -> f64 {
        let score = self.weight_votes * signals.vote_ratio()
            + self.weight_usage * signals.usage_trend()
            + self.weight_resolution * signals.resolution_correlation();
        score.clamp(0.0, 1.0)
    }

    /// Recompute and persist one article's score. Retries the optimistic
    /// write a few times; a persistent conflict surfaces to the caller.
    pub async fn recompute(&self, article_id: &str) -> Result<f64> {
        for attempt in 1..=SCORE_WRITE_ATTEMPTS {
            let article = self
                .store
                .get(article_id)
                .await?
                .ok_or_else(|| Error::ArticleNotFound(article_id.to_string()))?;

            let (citing_tickets, citing_resolved) =
                self.store.citation_counts(article_id).await?;

            let signals = UsageSignals {
                helpful_votes: article.helpful_votes,
                unhelpful_votes: article.unhelpful_votes,
                usage_count: article.usage_count,
                citing_tickets,
                citing_resolved,
            };
            let score = self.compute(&signals);

            match self
                .store
                .update_score(article_id, article.version, score)
                .await
            {
                Ok(()) => {
                    debug!(article_id = %article_id, score = score, "Effectiveness score updated");
                    return Ok(score);
                }
                Err(Error::VersionConflict(_)) if attempt < SCORE_WRITE_ATTEMPTS => {
                    debug!(article_id = %article_id, attempt = attempt, "Score write conflicted, rereading");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::VersionConflict(article_id.to_string()))
    }

    /// Recompute scores for every published article; returns how many were
    /// updated. Individual failures are logged and skipped so one bad
    /// article does not abort the sweep.
    pub async fn recompute_all(&self) -> Result<usize> {
        let articles = self.store.list_published().await?;
        let mut updated = 0;

        for article in &articles {
            match self.recompute(&article.id).await {
                Ok(_) => updated += 1,
                Err(e) => {
                    warn!(article_id = %article.id, error = %e, "Score recompute failed");
                }
            }
        }

        info!(articles = articles.len(), updated = updated, "Score sweep finished");
        Ok(updated)
    }
}
