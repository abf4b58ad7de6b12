//! Knowledge article types
//!
//! Articles follow a soft lifecycle (draft -> published -> archived) and are
//! never hard-deleted by the pipeline. AI-generated articles carry an
//! immutable provenance: the set of source ticket ids they were derived
//! from, fixed at creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reusable knowledge article synthesized from resolved tickets or
/// authored manually by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeArticle {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub status: ArticleStatus,
    pub source: ArticleSource,
    /// Source ticket ids, ordered; immutable once set at creation
    pub source_ticket_ids: Vec<String>,
    /// Idempotency key over the sorted source ticket ids (AI articles only)
    pub provenance_key: Option<String>,
    /// How useful the article has proven, in [0, 1]
    pub effectiveness_score: f64,
    pub usage_count: i64,
    pub view_count: i64,
    pub helpful_votes: i64,
    pub unhelpful_votes: i64,
    /// Optimistic concurrency version, bumped on every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl KnowledgeArticle {
    /// Create a manually authored draft
    pub fn manual(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            summary: String::new(),
            content: content.into(),
            category: String::new(),
            tags: Vec::new(),
            status: ArticleStatus::Draft,
            source: ArticleSource::Manual,
            source_ticket_ids: Vec::new(),
            provenance_key: None,
            effectiveness_score: 0.0,
            usage_count: 0,
            view_count: 0,
            helpful_votes: 0,
            unhelpful_votes: 0,
            version: 1,
            created_at: now,
            updated_at: now,
            archived_at: None,
        }
    }

    /// Set the category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the summary
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Set the effectiveness score (clamped to [0, 1])
    pub fn with_effectiveness(mut self, score: f64) -> Self {
        self.effectiveness_score = score.clamp(0.0, 1.0);
        self
    }

    /// The text used for the article's embedding: title, summary, content
    /// and tags combined.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.title,
            self.summary,
            self.content,
            self.tags.join(", ")
        )
    }

    /// Whether this article participates in retrieval
    pub fn is_retrievable(&self) -> bool {
        self.status == ArticleStatus::Published
    }

    /// Total votes cast
    pub fn total_votes(&self) -> i64 {
        self.helpful_votes + self.unhelpful_votes
    }
}

/// Lifecycle state of an article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Draft,
    Published,
    Archived,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an article came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleSource {
    Manual,
    AiGenerated,
}

impl ArticleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AiGenerated => "ai_generated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "ai_generated" => Some(Self::AiGenerated),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArticleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_article_defaults() {
        let article = KnowledgeArticle::manual("VPN drops", "Reconnect steps...")
            .with_category("network")
            .with_tags(vec!["vpn".into()]);

        assert!(!article.id.is_empty());
        assert_eq!(article.status, ArticleStatus::Draft);
        assert_eq!(article.source, ArticleSource::Manual);
        assert!(article.source_ticket_ids.is_empty());
        assert!(article.provenance_key.is_none());
        assert_eq!(article.version, 1);
        assert!(!article.is_retrievable());
    }

    #[test]
    fn test_effectiveness_clamped() {
        let article = KnowledgeArticle::manual("t", "c").with_effectiveness(1.7);
        assert_eq!(article.effectiveness_score, 1.0);

        let article = KnowledgeArticle::manual("t", "c").with_effectiveness(-0.2);
        assert_eq!(article.effectiveness_score, 0.0);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [ArticleStatus::Draft, ArticleStatus::Published, ArticleStatus::Archived] {
            assert_eq!(ArticleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ArticleStatus::parse("deleted"), None);
    }

    #[test]
    fn test_source_roundtrip() {
        for source in [ArticleSource::Manual, ArticleSource::AiGenerated] {
            assert_eq!(ArticleSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(ArticleSource::parse("imported"), None);
    }

    #[test]
    fn test_embedding_text_includes_tags() {
        let article = KnowledgeArticle::manual("Printer jam", "Open tray B")
            .with_tags(vec!["printer".into(), "hardware".into()]);
        let text = article.embedding_text();
        assert!(text.contains("Printer jam"));
        assert!(text.contains("printer, hardware"));
    }
}
