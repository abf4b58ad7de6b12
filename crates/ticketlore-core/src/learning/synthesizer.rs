//! Article synthesis from ticket clusters
//!
//! Sends a cluster's tickets to the generation provider, validates the
//! returned JSON strictly against the article schema, and persists the
//! result. The provenance key (hash of the sorted member ticket ids) makes
//! synthesis idempotent: the same cluster can never yield two articles.

use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::{LearningConfig, LlmConfig};
use crate::error::{Error, Result};
use crate::knowledge::article::{ArticleSource, ArticleStatus, KnowledgeArticle};
use crate::knowledge::store::ArticleStore;
use crate::llm::{Embedder, GenerationProvider};

use super::extractor::Pattern;

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a technical writer for an IT support knowledge base. You turn groups of resolved support tickets describing the same recurring issue into one reusable knowledge article.

Respond with ONLY a JSON object, no prose before or after, with exactly these fields:
{
  "title": "short, specific title",
  "summary": "one or two sentences describing the issue and its fix",
  "content": "step-by-step resolution in markdown",
  "category": "the category shared by the tickets",
  "tags": ["lowercase", "keywords"],
  "effectiveness_score": 0.0
}

effectiveness_score is your estimate, between 0.0 and 1.0, of how likely this article is to resolve a future ticket about the same issue without human help. Base the article only on what the tickets actually say."#;

/// Outcome of synthesizing one pattern
#[derive(Debug, Clone)]
pub enum SynthesisOutcome {
    /// A new article was created (and possibly auto-published)
    Created {
        article_id: String,
        published: bool,
    },
    /// The cluster was already synthesized earlier; nothing was written
    Duplicate { article_id: String },
}

/// Raw model output, every field optional so validation can report exactly
/// what is missing
#[derive(Debug, Deserialize)]
struct GeneratedArticle {
    title: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    category: Option<String>,
    tags: Option<Vec<String>>,
    effectiveness_score: Option<f64>,
}

impl GeneratedArticle {
    fn validate(self) -> Result<ValidatedArticle> {
        let title = require_text("title", self.title)?;
        let summary = require_text("summary", self.summary)?;
        let content = require_text("content", self.content)?;
        let category = require_text("category", self.category)?;
        let tags = self
            .tags
            .ok_or_else(|| Error::MalformedOutput("missing field: tags".to_string()))?;
        let effectiveness_score = self.effectiveness_score.ok_or_else(|| {
            Error::MalformedOutput("missing field: effectiveness_score".to_string())
        })?;

        if !(0.0..=1.0).contains(&effectiveness_score) {
            return Err(Error::MalformedOutput(format!(
                "effectiveness_score {} outside [0, 1]",
                effectiveness_score
            )));
        }

        Ok(ValidatedArticle {
            title,
            summary,
            content,
            category,
            tags,
            effectiveness_score,
        })
    }
}

fn require_text(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(Error::MalformedOutput(format!("empty field: {}", field))),
        None => Err(Error::MalformedOutput(format!("missing field: {}", field))),
    }
}

#[derive(Debug)]
struct ValidatedArticle {
    title: String,
    summary: String,
    content: String,
    category: String,
    tags: Vec<String>,
    effectiveness_score: f64,
}

/// Turns ticket clusters into knowledge articles
#[derive(Clone)]
pub struct ArticleSynthesizer {
    provider: Arc<dyn GenerationProvider>,
    embedder: Arc<dyn Embedder>,
    store: ArticleStore,
    embedding_model: String,
    publish_threshold: f64,
    auto_publish: bool,
}

impl ArticleSynthesizer {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        embedder: Arc<dyn Embedder>,
        store: ArticleStore,
        llm: &LlmConfig,
        learning: &LearningConfig,
    ) -> Self {
        Self {
            provider,
            embedder,
            store,
            embedding_model: llm.embedding_model.clone(),
            publish_threshold: learning.publish_threshold,
            auto_publish: learning.auto_publish,
        }
    }

    /// Synthesize one article from a pattern.
    ///
    /// Checks the provenance key before calling the provider, and again at
    /// insert time through the unique index, so a concurrent duplicate
    /// resolves to `Duplicate` instead of a second article.
    pub async fn synthesize(&self, pattern: &Pattern) -> Result<SynthesisOutcome> {
        let key = provenance_key(&pattern.member_ids());

        if let Some(existing) = self.store.find_by_provenance(&key).await? {
            info!(article_id = %existing.id, "Cluster already synthesized, skipping");
            return Ok(SynthesisOutcome::Duplicate {
                article_id: existing.id,
            });
        }

        let user_prompt = build_user_prompt(pattern);
        let response = self
            .provider
            .generate(SYNTHESIS_SYSTEM_PROMPT, &user_prompt)
            .await?;

        let json = extract_json_from_response(&response)
            .ok_or_else(|| Error::MalformedOutput("no JSON object in response".to_string()))?;
        let generated: GeneratedArticle = serde_json::from_str(json)
            .map_err(|e| Error::MalformedOutput(format!("invalid JSON: {}", e)))?;
        let validated = generated.validate()?;

        let publish = self.auto_publish && validated.effectiveness_score >= self.publish_threshold;

        let mut article = KnowledgeArticle::manual(validated.title, validated.content)
            .with_summary(validated.summary)
            .with_category(validated.category)
            .with_tags(validated.tags)
            .with_effectiveness(validated.effectiveness_score);
        article.source = ArticleSource::AiGenerated;
        article.source_ticket_ids = pattern.member_ids();
        article.provenance_key = Some(key.clone());
        if publish {
            article.status = ArticleStatus::Published;
        }

        let text = article.embedding_text();
        let embedding = self.embedder.embed(&text).await?;
        let text_hash = hex::encode(Sha256::digest(text.as_bytes()));

        match self.store.insert(&article).await {
            Ok(()) => {}
            Err(Error::DuplicateCluster(_)) => {
                // Lost the race to a concurrent worker
                let existing = self.store.find_by_provenance(&key).await?.ok_or_else(|| {
                    Error::Other("duplicate cluster reported but no article found".to_string())
                })?;
                warn!(article_id = %existing.id, "Concurrent synthesis detected");
                return Ok(SynthesisOutcome::Duplicate {
                    article_id: existing.id,
                });
            }
            Err(e) => return Err(e),
        }

        self.store
            .save_embedding(&article.id, &self.embedding_model, &embedding, &text_hash)
            .await?;

        info!(
            article_id = %article.id,
            cluster_size = pattern.size(),
            score = article.effectiveness_score,
            published = publish,
            "Article synthesized"
        );

        Ok(SynthesisOutcome::Created {
            article_id: article.id,
            published: publish,
        })
    }
}

/// Idempotency key for a cluster: hash of the sorted member ticket ids
pub fn provenance_key(ticket_ids: &[String]) -> String {
    let mut sorted: Vec<&str> = ticket_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    hex::encode(Sha256::digest(sorted.join(",").as_bytes()))
}

fn build_user_prompt(pattern: &Pattern) -> String {
    let mut prompt = format!(
        "Category: {}\nResolved tickets ({}):\n\n",
        pattern.category(),
        pattern.size()
    );
    for ticket in &pattern.tickets {
        prompt.push_str(&format!(
            "--- Ticket {} ---\nTitle: {}\nProblem: {}\nResolution: {}\n\n",
            ticket.id, ticket.title, ticket.description, ticket.resolution
        ));
    }
    prompt
}

/// Pull the JSON object out of a model response that may wrap it in code
/// fences or prose
fn extract_json_from_response(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    let inner = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end]).unwrap_or(after)
    } else if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        after.find("```").map(|end| &after[..end]).unwrap_or(after)
    } else {
        trimmed
    };

    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&inner[start..=end])
}
