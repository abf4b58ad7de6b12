//! Learning queue persistence
//!
//! Each resolved ticket enters the queue exactly once. Items move
//! pending -> processing -> completed | failed; a transient failure sends
//! the item back to pending with a delayed next_attempt_at until the retry
//! budget is exhausted. Claiming is a single UPDATE so concurrent workers
//! never hand out the same item twice.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::storage::Database;

use super::worker::RetryPolicy;

/// State of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A queue entry for one resolved ticket
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub ticket_id: String,
    pub status: QueueStatus,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct QueueRow {
    ticket_id: String,
    status: String,
    attempt_count: i64,
    last_error: Option<String>,
    enqueued_at: DateTime<Utc>,
    next_attempt_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl QueueRow {
    fn into_item(self) -> QueueItem {
        QueueItem {
            ticket_id: self.ticket_id,
            status: QueueStatus::parse(&self.status).unwrap_or(QueueStatus::Pending),
            attempt_count: self.attempt_count,
            last_error: self.last_error,
            enqueued_at: self.enqueued_at,
            next_attempt_at: self.next_attempt_at,
            processed_at: self.processed_at,
        }
    }
}

/// Queue counters for the status surface
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub completed_today: i64,
}

/// SQLite-backed learning queue
#[derive(Debug, Clone)]
pub struct LearningQueue {
    db: Database,
}

impl LearningQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enqueue a resolved ticket. Re-enqueueing an already-known ticket is
    /// a no-op; returns whether a new item was added.
    pub async fn enqueue(&self, ticket_id: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO learning_queue (ticket_id, status, attempt_count, enqueued_at, next_attempt_at)
            VALUES (?, 'pending', 0, ?, ?)
            ON CONFLICT(ticket_id) DO NOTHING
            "#,
        )
        .bind(ticket_id)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!(ticket_id = %ticket_id, "Ticket enqueued for learning");
        }
        Ok(inserted)
    }

    /// Atomically claim up to `batch_size` due pending items, moving them to
    /// processing. Items come back oldest-enqueued first.
    pub async fn claim_next(&self, batch_size: usize) -> Result<Vec<QueueItem>> {
        let now = Utc::now();
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            UPDATE learning_queue
            SET status = 'processing'
            WHERE ticket_id IN (
                SELECT ticket_id FROM learning_queue
                WHERE status = 'pending' AND next_attempt_at <= ?
                ORDER BY enqueued_at, ticket_id
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(batch_size as i64)
        .fetch_all(self.db.pool())
        .await?;

        let mut items: Vec<QueueItem> = rows.into_iter().map(QueueRow::into_item).collect();
        items.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.ticket_id.cmp(&b.ticket_id))
        });

        if !items.is_empty() {
            debug!(claimed = items.len(), "Claimed queue items");
        }
        Ok(items)
    }

    /// Mark a processing item completed
    pub async fn complete(&self, ticket_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE learning_queue
            SET status = 'completed', processed_at = ?, last_error = NULL
            WHERE ticket_id = ? AND status = 'processing'
            "#,
        )
        .bind(Utc::now())
        .bind(ticket_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::QueueState {
                ticket_id: ticket_id.to_string(),
                reason: "complete requires a processing item".to_string(),
            });
        }
        Ok(())
    }

    /// Record a transient failure on a processing item.
    ///
    /// With retry budget left the item returns to pending with a backed-off
    /// next_attempt_at; otherwise it lands in failed.
    pub async fn fail(&self, ticket_id: &str, error: &str, policy: &RetryPolicy) -> Result<()> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT attempt_count FROM learning_queue WHERE ticket_id = ? AND status = 'processing'",
        )
        .bind(ticket_id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some((attempt_count,)) = row else {
            return Err(Error::QueueState {
                ticket_id: ticket_id.to_string(),
                reason: "fail requires a processing item".to_string(),
            });
        };

        let attempts = attempt_count + 1;
        if attempts < policy.max_attempts as i64 {
            let delay = policy.delay_for(attempts as u32);
            let next_attempt = Utc::now() + Duration::milliseconds(delay.as_millis() as i64);
            sqlx::query(
                r#"
                UPDATE learning_queue
                SET status = 'pending', attempt_count = ?, last_error = ?, next_attempt_at = ?
                WHERE ticket_id = ? AND status = 'processing'
                "#,
            )
            .bind(attempts)
            .bind(error)
            .bind(next_attempt)
            .bind(ticket_id)
            .execute(self.db.pool())
            .await?;

            info!(
                ticket_id = %ticket_id,
                attempt = attempts,
                next_attempt = %next_attempt,
                "Queue item scheduled for retry"
            );
        } else {
            self.mark_failed(ticket_id, attempts, error).await?;
        }
        Ok(())
    }

    /// Record a terminal failure: no retries regardless of budget
    pub async fn fail_permanently(&self, ticket_id: &str, error: &str) -> Result<()> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT attempt_count FROM learning_queue WHERE ticket_id = ? AND status = 'processing'",
        )
        .bind(ticket_id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some((attempt_count,)) = row else {
            return Err(Error::QueueState {
                ticket_id: ticket_id.to_string(),
                reason: "fail requires a processing item".to_string(),
            });
        };

        self.mark_failed(ticket_id, attempt_count + 1, error).await
    }

    async fn mark_failed(&self, ticket_id: &str, attempts: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE learning_queue
            SET status = 'failed', attempt_count = ?, last_error = ?, processed_at = ?
            WHERE ticket_id = ? AND status = 'processing'
            "#,
        )
        .bind(attempts)
        .bind(error)
        .bind(Utc::now())
        .bind(ticket_id)
        .execute(self.db.pool())
        .await?;

        info!(ticket_id = %ticket_id, attempts = attempts, "Queue item failed permanently");
        Ok(())
    }

    /// Get a single queue item
    pub async fn get(&self, ticket_id: &str) -> Result<Option<QueueItem>> {
        let row: Option<QueueRow> =
            sqlx::query_as("SELECT * FROM learning_queue WHERE ticket_id = ?")
                .bind(ticket_id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(QueueRow::into_item))
    }

    /// Queue counters, with completions windowed to the current UTC day
    pub async fn stats(&self) -> Result<QueueStats> {
        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM learning_queue GROUP BY status")
                .fetch_all(self.db.pool())
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in &counts {
            match status.as_str() {
                "pending" => stats.pending = *count,
                "processing" => stats.processing = *count,
                "failed" => stats.failed = *count,
                _ => {}
            }
        }

        let day_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or_else(Utc::now);

        let (completed_today,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM learning_queue WHERE status = 'completed' AND processed_at >= ?",
        )
        .bind(day_start)
        .fetch_one(self.db.pool())
        .await?;
        stats.completed_today = completed_today;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, 10, 0.0)
    }

    async fn queue() -> (LearningQueue, Database) {
        let db = Database::in_memory().await.unwrap();
        (LearningQueue::new(db.clone()), db)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let (queue, _db) = queue().await;
        assert!(queue.enqueue("t-1").await.unwrap());
        assert!(!queue.enqueue("t-1").await.unwrap());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_claim_moves_to_processing_once() {
        let (queue, _db) = queue().await;
        queue.enqueue("t-1").await.unwrap();
        queue.enqueue("t-2").await.unwrap();

        let claimed = queue.claim_next(10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|i| i.status == QueueStatus::Processing));

        // Already claimed, nothing left to hand out
        assert!(queue.claim_next(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_batch_size_and_order() {
        let (queue, _db) = queue().await;
        for id in ["t-1", "t-2", "t-3"] {
            queue.enqueue(id).await.unwrap();
        }

        let claimed = queue.claim_next(2).await.unwrap();
        assert_eq!(claimed.len(), 2);

        let rest = queue.claim_next(2).await.unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let (queue, _db) = queue().await;
        queue.enqueue("t-1").await.unwrap();

        // Pending item cannot be completed directly
        let err = queue.complete("t-1").await.unwrap_err();
        assert!(matches!(err, Error::QueueState { .. }));

        queue.claim_next(1).await.unwrap();
        queue.complete("t-1").await.unwrap();

        let item = queue.get("t-1").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        assert!(item.processed_at.is_some());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed_today, 1);
    }

    #[tokio::test]
    async fn test_fail_retries_then_exhausts() {
        let (queue, db) = queue().await;
        queue.enqueue("t-1").await.unwrap();

        // Attempt 1: transient failure goes back to pending with a delay
        queue.claim_next(1).await.unwrap();
        queue.fail("t-1", "rate limited", &policy()).await.unwrap();
        let item = queue.get("t-1").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempt_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("rate limited"));

        // Not due yet
        assert!(queue.claim_next(1).await.unwrap().is_empty());

        // Make it due, burn the remaining attempts
        for expected_attempts in 2..=3 {
            sqlx::query("UPDATE learning_queue SET next_attempt_at = ? WHERE ticket_id = 't-1'")
                .bind(Utc::now() - Duration::seconds(1))
                .execute(db.pool())
                .await
                .unwrap();
            let claimed = queue.claim_next(1).await.unwrap();
            assert_eq!(claimed.len(), 1);
            queue.fail("t-1", "rate limited", &policy()).await.unwrap();

            let item = queue.get("t-1").await.unwrap().unwrap();
            assert_eq!(item.attempt_count, expected_attempts);
        }

        let item = queue.get("t-1").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn test_fail_permanently_skips_retries() {
        let (queue, _db) = queue().await;
        queue.enqueue("t-1").await.unwrap();
        queue.claim_next(1).await.unwrap();

        queue
            .fail_permanently("t-1", "malformed model output")
            .await
            .unwrap();

        let item = queue.get("t-1").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempt_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("malformed model output"));
    }

    #[tokio::test]
    async fn test_completed_never_reenters() {
        let (queue, _db) = queue().await;
        queue.enqueue("t-1").await.unwrap();
        queue.claim_next(1).await.unwrap();
        queue.complete("t-1").await.unwrap();

        // Enqueue again: primary key dedup keeps the completed row
        assert!(!queue.enqueue("t-1").await.unwrap());
        assert!(queue.claim_next(10).await.unwrap().is_empty());
    }
}
