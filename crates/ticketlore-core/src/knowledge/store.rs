//! Article store persistence
//!
//! SQLite-backed repository for knowledge articles, their embeddings and
//! their usage signals. The UNIQUE index on provenance_key is the storage
//! backstop for synthesis idempotency; the version column backs optimistic
//! concurrency for score and content updates.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::Database;

use super::article::{ArticleSource, ArticleStatus, KnowledgeArticle};

/// Repository for knowledge articles
#[derive(Debug, Clone)]
pub struct ArticleStore {
    db: Database,
}

#[derive(Debug, FromRow)]
struct ArticleRow {
    id: String,
    title: String,
    summary: String,
    content: String,
    category: String,
    tags: String,
    status: String,
    source: String,
    source_ticket_ids: String,
    provenance_key: Option<String>,
    effectiveness_score: f64,
    usage_count: i64,
    view_count: i64,
    helpful_votes: i64,
    unhelpful_votes: i64,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl ArticleRow {
    fn into_article(self) -> KnowledgeArticle {
        KnowledgeArticle {
            id: self.id,
            title: self.title,
            summary: self.summary,
            content: self.content,
            category: self.category,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            status: ArticleStatus::parse(&self.status).unwrap_or(ArticleStatus::Draft),
            source: ArticleSource::parse(&self.source).unwrap_or(ArticleSource::Manual),
            source_ticket_ids: serde_json::from_str(&self.source_ticket_ids).unwrap_or_default(),
            provenance_key: self.provenance_key,
            effectiveness_score: self.effectiveness_score,
            usage_count: self.usage_count,
            view_count: self.view_count,
            helpful_votes: self.helpful_votes,
            unhelpful_votes: self.unhelpful_votes,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            archived_at: self.archived_at,
        }
    }
}

/// A published article's embedding with the signals used for tie-breaking
#[derive(Debug, Clone)]
pub struct PublishedEmbedding {
    pub article_id: String,
    pub vector: Vec<f32>,
    pub usage_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Aggregates for the analytics surface
#[derive(Debug, Clone)]
pub struct AnalyticsSnapshot {
    pub articles_created: i64,
    pub avg_effectiveness: f64,
    pub auto_responses_sent: i64,
    pub tickets_resolved_by_ai: i64,
    pub top_categories: Vec<(String, i64)>,
}

impl ArticleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new article
    ///
    /// A unique-constraint violation on provenance_key surfaces as
    /// `DuplicateCluster`: two concurrent synthesis completions for the same
    /// cluster cannot both create an article.
    pub async fn insert(&self, article: &KnowledgeArticle) -> Result<()> {
        let tags = serde_json::to_string(&article.tags)
            .map_err(|e| Error::Other(format!("failed to serialize tags: {}", e)))?;
        let source_ticket_ids = serde_json::to_string(&article.source_ticket_ids)
            .map_err(|e| Error::Other(format!("failed to serialize source ids: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO knowledge_articles (
                id, title, summary, content, category, tags, status, source,
                source_ticket_ids, provenance_key, effectiveness_score,
                usage_count, view_count, helpful_votes, unhelpful_votes,
                version, created_at, updated_at, archived_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&article.id)
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&article.content)
        .bind(&article.category)
        .bind(&tags)
        .bind(article.status.as_str())
        .bind(article.source.as_str())
        .bind(&source_ticket_ids)
        .bind(&article.provenance_key)
        .bind(article.effectiveness_score)
        .bind(article.usage_count)
        .bind(article.view_count)
        .bind(article.helpful_votes)
        .bind(article.unhelpful_votes)
        .bind(article.version)
        .bind(article.created_at)
        .bind(article.updated_at)
        .bind(article.archived_at)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => {
                debug!(article_id = %article.id, status = %article.status, "Article inserted");
                Ok(())
            }
            Err(e) => {
                let is_unique = e
                    .as_database_error()
                    .is_some_and(|db_err| db_err.is_unique_violation());
                if is_unique && article.provenance_key.is_some() {
                    Err(Error::DuplicateCluster(
                        article.provenance_key.clone().unwrap_or_default(),
                    ))
                } else {
                    Err(Error::DatabaseError(e))
                }
            }
        }
    }

    /// Get an article by id
    pub async fn get(&self, article_id: &str) -> Result<Option<KnowledgeArticle>> {
        let row: Option<ArticleRow> =
            sqlx::query_as("SELECT * FROM knowledge_articles WHERE id = ?")
                .bind(article_id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(ArticleRow::into_article))
    }

    /// Find the article created from a given provenance key, if any
    pub async fn find_by_provenance(&self, key: &str) -> Result<Option<KnowledgeArticle>> {
        let row: Option<ArticleRow> =
            sqlx::query_as("SELECT * FROM knowledge_articles WHERE provenance_key = ?")
                .bind(key)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(ArticleRow::into_article))
    }

    /// All published articles, most recently updated first
    pub async fn list_published(&self) -> Result<Vec<KnowledgeArticle>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            "SELECT * FROM knowledge_articles WHERE status = 'published' ORDER BY updated_at DESC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(ArticleRow::into_article).collect())
    }

    /// Publish a draft article
    pub async fn publish(&self, article_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE knowledge_articles
            SET status = 'published', version = version + 1, updated_at = ?
            WHERE id = ? AND status = 'draft'
            "#,
        )
        .bind(Utc::now())
        .bind(article_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ArticleNotFound(article_id.to_string()));
        }
        Ok(())
    }

    /// Archive an article; archived articles are excluded from retrieval
    /// but never deleted.
    pub async fn archive(&self, article_id: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE knowledge_articles
            SET status = 'archived', archived_at = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND status != 'archived'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(article_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ArticleNotFound(article_id.to_string()));
        }
        Ok(())
    }

    /// Rewrite an article's editable fields with an optimistic version
    /// check. Source ticket ids and provenance never change; callers must
    /// refresh the embedding afterwards since the embedded text changed.
    pub async fn update_content(
        &self,
        article_id: &str,
        expected_version: i64,
        title: &str,
        summary: &str,
        content: &str,
        tags: &[String],
    ) -> Result<()> {
        let tags = serde_json::to_string(tags)
            .map_err(|e| Error::Other(format!("failed to serialize tags: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE knowledge_articles
            SET title = ?, summary = ?, content = ?, tags = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(title)
        .bind(summary)
        .bind(content)
        .bind(&tags)
        .bind(Utc::now())
        .bind(article_id)
        .bind(expected_version)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::VersionConflict(article_id.to_string()));
        }
        Ok(())
    }

    /// Update the effectiveness score with an optimistic version check.
    ///
    /// Fails with `VersionConflict` when another writer has bumped the
    /// version since the caller read the article.
    pub async fn update_score(
        &self,
        article_id: &str,
        expected_version: i64,
        score: f64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE knowledge_articles
            SET effectiveness_score = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(score.clamp(0.0, 1.0))
        .bind(Utc::now())
        .bind(article_id)
        .bind(expected_version)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::VersionConflict(article_id.to_string()));
        }
        Ok(())
    }

    /// Record that an article was viewed
    pub async fn record_view(&self, article_id: &str) -> Result<()> {
        sqlx::query("UPDATE knowledge_articles SET view_count = view_count + 1 WHERE id = ?")
            .bind(article_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Record that an article was used in a response
    pub async fn record_usage(&self, article_id: &str) -> Result<()> {
        sqlx::query("UPDATE knowledge_articles SET usage_count = usage_count + 1 WHERE id = ?")
            .bind(article_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Record a helpfulness vote
    pub async fn record_vote(&self, article_id: &str, helpful: bool) -> Result<()> {
        let column = if helpful { "helpful_votes" } else { "unhelpful_votes" };
        let sql = format!(
            "UPDATE knowledge_articles SET {col} = {col} + 1 WHERE id = ?",
            col = column
        );
        sqlx::query(&sql)
            .bind(article_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Save (or refresh) the embedding for an article
    pub async fn save_embedding(
        &self,
        article_id: &str,
        model: &str,
        embedding: &[f32],
        text_hash: &str,
    ) -> Result<()> {
        let embedding_bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
        let dimensions = embedding.len() as i32;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO article_embeddings (
                id, article_id, embedding_model, embedding, dimensions, text_hash, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(article_id, embedding_model) DO UPDATE SET
                embedding = excluded.embedding,
                dimensions = excluded.dimensions,
                text_hash = excluded.text_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(article_id)
        .bind(model)
        .bind(&embedding_bytes)
        .bind(dimensions)
        .bind(text_hash)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        debug!(article_id = %article_id, model = %model, dimensions = dimensions, "Article embedding saved");
        Ok(())
    }

    /// Get the stored embedding for an article
    pub async fn get_embedding(&self, article_id: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT embedding FROM article_embeddings WHERE article_id = ? AND embedding_model = ?",
        )
        .bind(article_id)
        .bind(model)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|(bytes,)| decode_embedding(&bytes)))
    }

    /// Embeddings for all published articles, with tie-breaking signals
    pub async fn published_embeddings(&self, model: &str) -> Result<Vec<PublishedEmbedding>> {
        let rows: Vec<(String, Vec<u8>, i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT a.id, e.embedding, a.usage_count, a.updated_at
            FROM knowledge_articles a
            JOIN article_embeddings e ON e.article_id = a.id AND e.embedding_model = ?
            WHERE a.status = 'published'
            "#,
        )
        .bind(model)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(article_id, bytes, usage_count, updated_at)| PublishedEmbedding {
                article_id,
                vector: decode_embedding(&bytes),
                usage_count,
                updated_at,
            })
            .collect())
    }

    /// Record that an article was cited against a ticket
    pub async fn record_citation(
        &self,
        article_id: &str,
        ticket_id: &str,
        auto_sent: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO article_citations (id, article_id, ticket_id, auto_sent, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(article_id, ticket_id) DO UPDATE SET
                auto_sent = MAX(auto_sent, excluded.auto_sent)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(article_id)
        .bind(ticket_id)
        .bind(auto_sent)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Mark every citation of a ticket as resolved (called when the citing
    /// ticket closes)
    pub async fn mark_citation_resolved(&self, ticket_id: &str) -> Result<()> {
        sqlx::query("UPDATE article_citations SET ticket_resolved = 1 WHERE ticket_id = ?")
            .bind(ticket_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Citation counts for an article: (citing tickets, subsequently resolved)
    pub async fn citation_counts(&self, article_id: &str) -> Result<(i64, i64)> {
        let (citing, resolved): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(ticket_resolved), 0)
            FROM article_citations WHERE article_id = ?
            "#,
        )
        .bind(article_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok((citing, resolved))
    }

    /// Aggregates for the analytics endpoint
    pub async fn analytics(&self) -> Result<AnalyticsSnapshot> {
        let (articles_created,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM knowledge_articles WHERE source = 'ai_generated'",
        )
        .fetch_one(self.db.pool())
        .await?;

        let (avg_effectiveness,): (Option<f64>,) = sqlx::query_as(
            "SELECT AVG(effectiveness_score) FROM knowledge_articles WHERE status = 'published'",
        )
        .fetch_one(self.db.pool())
        .await?;

        let (auto_responses_sent,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM article_citations WHERE auto_sent = 1")
                .fetch_one(self.db.pool())
                .await?;

        let (tickets_resolved_by_ai,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(DISTINCT ticket_id) FROM article_citations
            WHERE auto_sent = 1 AND ticket_resolved = 1
            "#,
        )
        .fetch_one(self.db.pool())
        .await?;

        let top_categories: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT category, COUNT(*) AS n FROM knowledge_articles
            WHERE category != ''
            GROUP BY category ORDER BY n DESC, category LIMIT 5
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(AnalyticsSnapshot {
            articles_created,
            avg_effectiveness: avg_effectiveness.unwrap_or(0.0),
            auto_responses_sent,
            tickets_resolved_by_ai,
            top_categories,
        })
    }
}

/// Decode an f32 little-endian BLOB back into a vector
fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> ArticleStore {
        let db = Database::in_memory().await.unwrap();
        ArticleStore::new(db)
    }

    fn ai_article(key: &str) -> KnowledgeArticle {
        let mut article = KnowledgeArticle::manual("VPN reconnect loop", "Steps...")
            .with_category("network")
            .with_summary("VPN drops and reconnects");
        article.source = ArticleSource::AiGenerated;
        article.source_ticket_ids = vec!["t-1".into(), "t-2".into()];
        article.provenance_key = Some(key.to_string());
        article
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let store = store().await;
        let article = ai_article("key-a");
        store.insert(&article).await.unwrap();

        let loaded = store.get(&article.id).await.unwrap().expect("present");
        assert_eq!(loaded.title, article.title);
        assert_eq!(loaded.source, ArticleSource::AiGenerated);
        assert_eq!(loaded.source_ticket_ids, vec!["t-1", "t-2"]);
        assert_eq!(loaded.provenance_key.as_deref(), Some("key-a"));
    }

    #[tokio::test]
    async fn test_duplicate_provenance_is_duplicate_cluster() {
        let store = store().await;
        store.insert(&ai_article("key-a")).await.unwrap();

        let err = store.insert(&ai_article("key-a")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateCluster(_)));
    }

    #[tokio::test]
    async fn test_find_by_provenance() {
        let store = store().await;
        let article = ai_article("key-b");
        store.insert(&article).await.unwrap();

        let found = store.find_by_provenance("key-b").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(article.id));
        assert!(store.find_by_provenance("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_and_archive_lifecycle() {
        let store = store().await;
        let article = ai_article("key-c");
        store.insert(&article).await.unwrap();

        store.publish(&article.id).await.unwrap();
        let published = store.get(&article.id).await.unwrap().unwrap();
        assert_eq!(published.status, ArticleStatus::Published);
        assert_eq!(published.version, 2);

        store.archive(&article.id).await.unwrap();
        let archived = store.get(&article.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ArticleStatus::Archived);
        assert!(archived.archived_at.is_some());

        // Archived articles never appear in the published list
        assert!(store.list_published().await.unwrap().is_empty());
        // Soft lifecycle only: the row still exists
        assert!(store.get(&article.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_optimistic_score_update() {
        let store = store().await;
        let article = ai_article("key-d");
        store.insert(&article).await.unwrap();

        store.update_score(&article.id, 1, 0.6).await.unwrap();

        // Stale version loses
        let err = store.update_score(&article.id, 1, 0.9).await.unwrap_err();
        assert!(matches!(err, Error::VersionConflict(_)));

        let loaded = store.get(&article.id).await.unwrap().unwrap();
        assert_eq!(loaded.effectiveness_score, 0.6);
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn test_update_content_preserves_provenance() {
        let store = store().await;
        let article = ai_article("key-j");
        store.insert(&article).await.unwrap();

        store
            .update_content(
                &article.id,
                1,
                "Better title",
                "Better summary",
                "Better steps",
                &["vpn".to_string()],
            )
            .await
            .unwrap();

        let loaded = store.get(&article.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Better title");
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.source_ticket_ids, vec!["t-1", "t-2"]);
        assert_eq!(loaded.provenance_key.as_deref(), Some("key-j"));

        // Stale version loses
        let err = store
            .update_content(&article.id, 1, "x", "y", "z", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict(_)));
    }

    #[tokio::test]
    async fn test_embedding_roundtrip() {
        let store = store().await;
        let article = ai_article("key-e");
        store.insert(&article).await.unwrap();

        let vector = vec![0.25f32, -1.5, 3.75];
        store
            .save_embedding(&article.id, "m", &vector, "hash1")
            .await
            .unwrap();

        let loaded = store.get_embedding(&article.id, "m").await.unwrap().unwrap();
        assert_eq!(loaded, vector);

        // Refresh replaces in place
        store
            .save_embedding(&article.id, "m", &[9.0], "hash2")
            .await
            .unwrap();
        let refreshed = store.get_embedding(&article.id, "m").await.unwrap().unwrap();
        assert_eq!(refreshed, vec![9.0]);
    }

    #[tokio::test]
    async fn test_published_embeddings_excludes_drafts() {
        let store = store().await;

        let draft = ai_article("key-f");
        store.insert(&draft).await.unwrap();
        store.save_embedding(&draft.id, "m", &[1.0], "h").await.unwrap();

        let live = ai_article("key-g");
        store.insert(&live).await.unwrap();
        store.save_embedding(&live.id, "m", &[1.0], "h").await.unwrap();
        store.publish(&live.id).await.unwrap();

        let embeddings = store.published_embeddings("m").await.unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].article_id, live.id);
    }

    #[tokio::test]
    async fn test_votes_and_counters() {
        let store = store().await;
        let article = ai_article("key-h");
        store.insert(&article).await.unwrap();

        store.record_view(&article.id).await.unwrap();
        store.record_usage(&article.id).await.unwrap();
        store.record_vote(&article.id, true).await.unwrap();
        store.record_vote(&article.id, true).await.unwrap();
        store.record_vote(&article.id, false).await.unwrap();

        let loaded = store.get(&article.id).await.unwrap().unwrap();
        assert_eq!(loaded.view_count, 1);
        assert_eq!(loaded.usage_count, 1);
        assert_eq!(loaded.helpful_votes, 2);
        assert_eq!(loaded.unhelpful_votes, 1);
    }

    #[tokio::test]
    async fn test_citations_and_analytics() {
        let store = store().await;
        let article = ai_article("key-i");
        store.insert(&article).await.unwrap();
        store.publish(&article.id).await.unwrap();

        store.record_citation(&article.id, "t-10", true).await.unwrap();
        store.record_citation(&article.id, "t-11", false).await.unwrap();
        store.mark_citation_resolved("t-10").await.unwrap();

        let (citing, resolved) = store.citation_counts(&article.id).await.unwrap();
        assert_eq!(citing, 2);
        assert_eq!(resolved, 1);

        let analytics = store.analytics().await.unwrap();
        assert_eq!(analytics.articles_created, 1);
        assert_eq!(analytics.auto_responses_sent, 1);
        assert_eq!(analytics.tickets_resolved_by_ai, 1);
        assert_eq!(analytics.top_categories[0].0, "network");
    }

    #[test]
    fn test_decode_embedding() {
        let vector = vec![1.0f32, -2.5, 0.0];
        let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        assert_eq!(decode_embedding(&bytes), vector);
    }
}
