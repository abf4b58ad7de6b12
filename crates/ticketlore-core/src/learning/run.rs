//! Batch learning runs
//!
//! A run processes every ticket resolved inside a date range in one pass:
//! extract patterns, synthesize articles, tally the outcome. Runs are
//! recorded up front and finalized on completion so an operator can always
//! see what the last batch did.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::Database;
use crate::tickets::TicketStore;

use super::extractor::PatternExtractor;
use super::synthesizer::{ArticleSynthesizer, SynthesisOutcome};

/// Record of one batch run
#[derive(Debug, Clone, FromRow)]
pub struct LearningRun {
    pub id: String,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub ticket_count: i64,
    pub patterns_found: i64,
    pub articles_created: i64,
    pub articles_published: i64,
    pub duplicates_skipped: i64,
    pub failures: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LearningRun {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Runs the full pipeline over a date range
pub struct BatchProcessor {
    db: Database,
    tickets: TicketStore,
    extractor: PatternExtractor,
    synthesizer: ArticleSynthesizer,
}

impl BatchProcessor {
    pub fn new(
        db: Database,
        tickets: TicketStore,
        extractor: PatternExtractor,
        synthesizer: ArticleSynthesizer,
    ) -> Self {
        Self {
            db,
            tickets,
            extractor,
            synthesizer,
        }
    }

    /// Process all tickets resolved within [start, end).
    ///
    /// Invalid ranges are rejected before any run row is written. Failures
    /// during synthesis are tallied per pattern and do not abort the run.
    pub async fn process(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<LearningRun> {
        if start >= end {
            return Err(Error::InvalidInput(format!(
                "invalid date range: start {} is not before end {}",
                start, end
            )));
        }

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO learning_runs (id, range_start, range_end, started_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&run_id)
        .bind(start)
        .bind(end)
        .bind(started_at)
        .execute(self.db.pool())
        .await?;

        info!(run_id = %run_id, start = %start, end = %end, "Batch run started");

        let tickets = self.tickets.resolved_between(start, end).await?;
        let patterns = self.extractor.extract(&tickets).await?;

        let mut articles_created = 0i64;
        let mut articles_published = 0i64;
        let mut duplicates_skipped = 0i64;
        let mut failures = 0i64;

        for pattern in &patterns {
            match self.synthesizer.synthesize(pattern).await {
                Ok(SynthesisOutcome::Created { published, .. }) => {
                    articles_created += 1;
                    if published {
                        articles_published += 1;
                    }
                }
                Ok(SynthesisOutcome::Duplicate { .. }) => duplicates_skipped += 1,
                Err(e) => {
                    warn!(
                        run_id = %run_id,
                        cluster_size = pattern.size(),
                        error = %e,
                        "Pattern synthesis failed"
                    );
                    failures += 1;
                }
            }
        }

        let completed_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE learning_runs
            SET ticket_count = ?, patterns_found = ?, articles_created = ?,
                articles_published = ?, duplicates_skipped = ?, failures = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(tickets.len() as i64)
        .bind(patterns.len() as i64)
        .bind(articles_created)
        .bind(articles_published)
        .bind(duplicates_skipped)
        .bind(failures)
        .bind(completed_at)
        .bind(&run_id)
        .execute(self.db.pool())
        .await?;

        info!(
            run_id = %run_id,
            tickets = tickets.len(),
            patterns = patterns.len(),
            created = articles_created,
            published = articles_published,
            duplicates = duplicates_skipped,
            failures = failures,
            "Batch run completed"
        );

        self.get_run(&run_id).await?.ok_or_else(|| {
            Error::Other(format!("run {} vanished after completion", run_id))
        })
    }

    /// Fetch a run by id
    pub async fn get_run(&self, run_id: &str) -> Result<Option<LearningRun>> {
        let run: Option<LearningRun> = sqlx::query_as("SELECT * FROM learning_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(run)
    }

    /// The most recently started run, if any
    pub async fn latest_run(&self) -> Result<Option<LearningRun>> {
        let run: Option<LearningRun> = sqlx::query_as(
            "SELECT * FROM learning_runs ORDER BY started_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(self.db.pool())
        .await?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Result as CoreResult;
    use crate::knowledge::store::ArticleStore;
    use crate::llm::{Embedder, GenerationProvider};
    use crate::tickets::test_fixtures::ticket;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Arc;

    /// Embedder keyed on phrases so clustering is deterministic
    struct PhraseEmbedder;

    impl PhraseEmbedder {
        fn vector_for(text: &str) -> Vec<f32> {
            if text.contains("vpn") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("printer") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            }
        }
    }

    #[async_trait]
    impl Embedder for PhraseEmbedder {
        async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
            Ok(Self::vector_for(text))
        }

        async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    /// Provider returning a valid article for every call
    struct AlwaysValidProvider;

    #[async_trait]
    impl GenerationProvider for AlwaysValidProvider {
        async fn generate(&self, _system: &str, user: &str) -> CoreResult<String> {
            // Echo the category back so each cluster gets a distinct article
            let category = user
                .lines()
                .find_map(|l| l.strip_prefix("Category: "))
                .unwrap_or("general");
            Ok(format!(
                r#"{{"title": "Fix for {category} issue", "summary": "s", "content": "steps", "category": "{category}", "tags": ["{category}"], "effectiveness_score": 0.8}}"#
            ))
        }
    }

    async fn processor() -> (BatchProcessor, TicketStore, ArticleStore) {
        let db = Database::in_memory().await.unwrap();
        let tickets = TicketStore::new(db.clone());
        let articles = ArticleStore::new(db.clone());
        let config = Config::default();

        let embedder: Arc<dyn Embedder> = Arc::new(PhraseEmbedder);
        let extractor = PatternExtractor::new(embedder.clone(), &config.learning);
        let synthesizer = ArticleSynthesizer::new(
            Arc::new(AlwaysValidProvider),
            embedder,
            articles.clone(),
            &config.llm,
            &config.learning,
        );

        (
            BatchProcessor::new(db, tickets.clone(), extractor, synthesizer),
            tickets,
            articles,
        )
    }

    fn range() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_batch_run_end_to_end() {
        let (processor, tickets, articles) = processor().await;

        for (id, cat, text, offset) in [
            ("t-1", "network", "vpn drops", 0),
            ("t-2", "network", "vpn flaky", 5),
            ("t-3", "hardware", "printer jam", 10),
            ("t-4", "hardware", "printer offline", 15),
            ("t-5", "hardware", "monitor flicker", 20),
        ] {
            tickets.insert(&ticket(id, cat, text, offset)).await.unwrap();
        }

        let (start, end) = range();
        let run = processor.process(start, end).await.unwrap();

        assert_eq!(run.ticket_count, 5);
        assert_eq!(run.patterns_found, 2);
        assert_eq!(run.articles_created, 2);
        assert_eq!(run.articles_published, 2);
        assert_eq!(run.failures, 0);
        assert!(run.is_complete());

        assert_eq!(articles.list_published().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_three_clusters_of_four() {
        let (processor, tickets, articles) = processor().await;

        let groups = [
            ("network", "vpn drops constantly"),
            ("hardware", "printer refuses jobs"),
            ("audio", "headset static noise"),
        ];
        let mut offset = 0;
        for (n, (category, text)) in groups.iter().enumerate() {
            for i in 0..4 {
                let id = format!("t-{}{}", n, i);
                tickets
                    .insert(&ticket(&id, category, text, offset))
                    .await
                    .unwrap();
                offset += 5;
            }
        }

        let (start, end) = range();
        let run = processor.process(start, end).await.unwrap();

        assert_eq!(run.ticket_count, 12);
        assert_eq!(run.patterns_found, 3);
        assert_eq!(run.articles_created, 3);
        assert_eq!(run.articles_published, 3);

        for article in articles.list_published().await.unwrap() {
            assert_eq!(article.source_ticket_ids.len(), 4);
        }
    }

    #[tokio::test]
    async fn test_second_run_skips_duplicates() {
        let (processor, tickets, articles) = processor().await;

        tickets.insert(&ticket("t-1", "network", "vpn drops", 0)).await.unwrap();
        tickets.insert(&ticket("t-2", "network", "vpn flaky", 5)).await.unwrap();

        let (start, end) = range();
        let first = processor.process(start, end).await.unwrap();
        assert_eq!(first.articles_created, 1);

        let second = processor.process(start, end).await.unwrap();
        assert_eq!(second.articles_created, 0);
        assert_eq!(second.duplicates_skipped, 1);

        // Still exactly one article
        assert_eq!(articles.list_published().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_range_writes_no_run() {
        let (processor, _tickets, _articles) = processor().await;
        let (start, end) = range();

        let err = processor.process(end, start).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(processor.latest_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_run_is_most_recent() {
        let (processor, tickets, _articles) = processor().await;
        tickets.insert(&ticket("t-1", "network", "vpn drops", 0)).await.unwrap();
        tickets.insert(&ticket("t-2", "network", "vpn flaky", 5)).await.unwrap();

        let (start, end) = range();
        processor.process(start, end).await.unwrap();
        let second = processor.process(start, end).await.unwrap();

        let latest = processor.latest_run().await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }
}
