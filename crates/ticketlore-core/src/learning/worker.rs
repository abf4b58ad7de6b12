//! Background learning worker
//!
//! Polls the queue, claims a batch, clusters the claimed tickets and
//! synthesizes articles. Queue transitions depend on the failure class:
//! transient errors send members back to pending under the retry policy,
//! terminal errors (malformed model output, missing tickets) fail them
//! permanently. Claimed tickets that end up in no cluster complete without
//! producing an article.

use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::LearningConfig;
use crate::error::{Error, Result};
use crate::tickets::TicketStore;

use super::extractor::{Pattern, PatternExtractor};
use super::queue::{LearningQueue, QueueStatus};
use super::scorer::EffectivenessScorer;
use super::synthesizer::{ArticleSynthesizer, SynthesisOutcome};

/// Exponential backoff with jitter for queue retries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, jitter: f64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            jitter,
        }
    }

    pub fn from_config(config: &LearningConfig) -> Self {
        Self::new(
            config.retry_max_attempts,
            config.retry_base_delay_ms,
            config.retry_jitter,
        )
    }

    /// Delay before the given (1-based) retry attempt: base * 2^(n-1) plus
    /// up to `jitter` fraction of random extra.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << exponent);

        let jitter_ms = (delay_ms as f64 * self.jitter) as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };

        Duration::from_millis(delay_ms + extra)
    }
}

/// What one worker tick did
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    pub claimed: usize,
    pub patterns: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Continuous queue consumer
pub struct LearningWorker {
    queue: LearningQueue,
    tickets: TicketStore,
    extractor: PatternExtractor,
    synthesizer: ArticleSynthesizer,
    scorer: Option<EffectivenessScorer>,
    retry_policy: RetryPolicy,
    batch_size: usize,
    poll_interval: Duration,
    score_interval: Duration,
    concurrency: usize,
}

impl LearningWorker {
    pub fn new(
        queue: LearningQueue,
        tickets: TicketStore,
        extractor: PatternExtractor,
        synthesizer: ArticleSynthesizer,
        config: &LearningConfig,
    ) -> Self {
        Self {
            queue,
            tickets,
            extractor,
            synthesizer,
            scorer: None,
            retry_policy: RetryPolicy::from_config(config),
            batch_size: config.worker_batch_size,
            poll_interval: Duration::from_secs(config.worker_poll_secs),
            score_interval: Duration::from_secs(config.score_recompute_secs),
            concurrency: config.worker_concurrency.max(1),
        }
    }

    /// Attach a scorer so the worker sweeps effectiveness scores on the
    /// configured interval instead of relying on an external schedule.
    pub fn with_scorer(mut self, scorer: EffectivenessScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Run until the task is aborted, sleeping between polls when the queue
    /// is empty and ticking again immediately while work remains.
    pub async fn run(&self) -> Result<()> {
        info!(
            batch_size = self.batch_size,
            poll_secs = self.poll_interval.as_secs(),
            "Learning worker started"
        );

        let mut last_rescore = tokio::time::Instant::now();
        loop {
            match self.tick().await {
                Ok(report) if report.claimed == 0 => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(report) => {
                    info!(
                        claimed = report.claimed,
                        patterns = report.patterns,
                        completed = report.completed,
                        failed = report.failed,
                        "Worker tick finished"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Worker tick failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }

            if self.scorer.is_some() && last_rescore.elapsed() >= self.score_interval {
                if let Err(e) = self.recompute_scores().await {
                    error!(error = %e, "Score sweep failed");
                }
                last_rescore = tokio::time::Instant::now();
            }
        }
    }

    /// Run one effectiveness score sweep; a no-op without a scorer attached
    pub async fn recompute_scores(&self) -> Result<usize> {
        match &self.scorer {
            Some(scorer) => scorer.recompute_all().await,
            None => Ok(0),
        }
    }

    /// Claim and process one batch.
    ///
    /// An error after the claim must not leave items stuck in `processing`
    /// with no consumer: every claimed item that was not already resolved is
    /// routed back through the queue's failure path before the error
    /// surfaces, so transient trouble retries under the policy and terminal
    /// trouble counts as failed.
    pub async fn tick(&self) -> Result<TickReport> {
        let claimed = self.queue.claim_next(self.batch_size).await?;
        if claimed.is_empty() {
            return Ok(TickReport::default());
        }

        let mut report = TickReport {
            claimed: claimed.len(),
            ..Default::default()
        };

        let claimed_ids: Vec<String> = claimed.iter().map(|i| i.ticket_id.clone()).collect();
        match self.process_claimed(&claimed_ids, &mut report).await {
            Ok(()) => Ok(report),
            Err(e) => {
                self.release_claimed(&claimed_ids, &e).await;
                Err(e)
            }
        }
    }

    async fn process_claimed(&self, claimed_ids: &[String], report: &mut TickReport) -> Result<()> {
        let tickets = self.tickets.get_many(claimed_ids).await?;

        // Claimed items whose ticket vanished from the feed cannot ever
        // succeed
        let found: std::collections::HashSet<&str> =
            tickets.iter().map(|t| t.id.as_str()).collect();
        for id in claimed_ids {
            if !found.contains(id.as_str()) {
                warn!(ticket_id = %id, "Claimed ticket missing from feed");
                self.queue
                    .fail_permanently(id, "ticket not found in feed")
                    .await?;
                report.failed += 1;
            }
        }

        let patterns = self.extractor.extract(&tickets).await?;
        report.patterns = patterns.len();

        let mut clustered: std::collections::HashSet<String> = std::collections::HashSet::new();
        for pattern in &patterns {
            clustered.extend(pattern.member_ids());
        }

        for (member_ids, outcome) in self.synthesize_all(patterns).await? {
            match outcome {
                Ok(_) => {
                    for id in &member_ids {
                        self.queue.complete(id).await?;
                        report.completed += 1;
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, members = member_ids.len(), "Transient synthesis failure, retrying later");
                    for id in &member_ids {
                        self.queue.fail(id, &e.to_string(), &self.retry_policy).await?;
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, members = member_ids.len(), "Terminal synthesis failure");
                    for id in &member_ids {
                        self.queue.fail_permanently(id, &e.to_string()).await?;
                        report.failed += 1;
                    }
                }
            }
        }

        // Singletons: nothing recurring to learn from, done
        for ticket in &tickets {
            if !clustered.contains(&ticket.id) {
                self.queue.complete(&ticket.id).await?;
                report.completed += 1;
            }
        }

        Ok(())
    }

    /// Route still-claimed items through the failure path after a tick
    /// error. Bookkeeping errors here are logged rather than propagated so
    /// every remaining item gets a chance to be released.
    async fn release_claimed(&self, claimed_ids: &[String], cause: &Error) {
        for id in claimed_ids {
            let still_processing = match self.queue.get(id).await {
                Ok(Some(item)) => item.status == QueueStatus::Processing,
                Ok(None) => false,
                Err(e) => {
                    error!(ticket_id = %id, error = %e, "Could not inspect claimed item");
                    continue;
                }
            };
            if !still_processing {
                continue;
            }

            let released = if cause.is_transient() {
                self.queue.fail(id, &cause.to_string(), &self.retry_policy).await
            } else {
                self.queue.fail_permanently(id, &cause.to_string()).await
            };
            if let Err(e) = released {
                error!(ticket_id = %id, error = %e, "Could not release claimed item");
            }
        }
    }

    async fn synthesize_all(
        &self,
        patterns: Vec<Pattern>,
    ) -> Result<Vec<(Vec<String>, Result<SynthesisOutcome>)>> {
        let mut results = Vec::with_capacity(patterns.len());

        if self.concurrency <= 1 {
            for pattern in patterns {
                let member_ids = pattern.member_ids();
                let outcome = self.synthesizer.synthesize(&pattern).await;
                results.push((member_ids, outcome));
            }
            return Ok(results);
        }

        for chunk in patterns.chunks(self.concurrency) {
            let mut join_set = JoinSet::new();
            for pattern in chunk {
                let synthesizer = self.synthesizer.clone();
                let pattern = pattern.clone();
                join_set.spawn(async move {
                    let member_ids = pattern.member_ids();
                    let outcome = synthesizer.synthesize(&pattern).await;
                    (member_ids, outcome)
                });
            }
            while let Some(joined) = join_set.join_next().await {
                let entry = joined
                    .map_err(|e| Error::Other(format!("synthesis task failed: {}", e)))?;
                results.push(entry);
            }
        }

        Ok(results)
    }
}
