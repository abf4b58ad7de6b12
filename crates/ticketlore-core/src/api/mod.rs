//! API facade
//!
//! Wire-shaped request/response types (camelCase JSON) and the async
//! operations behind them. An HTTP layer maps these one-to-one onto
//! endpoints; the types here are transport-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::knowledge::gate::{GateDecision, ResponseGate};
use crate::knowledge::retrieval::RetrievalService;
use crate::knowledge::store::ArticleStore;
use crate::learning::queue::LearningQueue;
use crate::learning::run::BatchProcessor;

/// GET /learning/queue/status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub completed_today: i64,
}

pub async fn queue_status(queue: &LearningQueue) -> Result<QueueStatusResponse> {
    let stats = queue.stats().await?;
    Ok(QueueStatusResponse {
        pending: stats.pending,
        processing: stats.processing,
        failed: stats.failed,
        completed_today: stats.completed_today,
    })
}

/// POST /learning/batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProcessRequest {
    /// RFC 3339 timestamp, inclusive
    pub start_date: String,
    /// RFC 3339 timestamp, exclusive
    pub end_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProcessResponse {
    pub run_id: String,
    pub ticket_count: i64,
    pub patterns_found: i64,
    pub articles_created: i64,
    pub articles_published: i64,
    pub duplicates_skipped: i64,
    pub failures: i64,
}

pub async fn batch_process(
    processor: &BatchProcessor,
    request: BatchProcessRequest,
) -> Result<BatchProcessResponse> {
    let start = parse_date("startDate", &request.start_date)?;
    let end = parse_date("endDate", &request.end_date)?;

    let run = processor.process(start, end).await?;
    Ok(BatchProcessResponse {
        run_id: run.id,
        ticket_count: run.ticket_count,
        patterns_found: run.patterns_found,
        articles_created: run.articles_created,
        articles_published: run.articles_published,
        duplicates_skipped: run.duplicates_skipped,
        failures: run.failures,
    })
}

fn parse_date(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("{} is not a valid RFC 3339 date: {}", field, e)))
}

/// POST /knowledge/search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub article_id: String,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub similarity_score: f64,
    pub rank: usize,
}

/// Search published articles; hits are hydrated with display fields
pub async fn search(
    retrieval: &RetrievalService,
    store: &ArticleStore,
    request: SearchRequest,
) -> Result<Vec<SearchHit>> {
    let results = retrieval.search(&request.query, request.limit).await;

    let mut hits = Vec::with_capacity(results.len());
    for result in results {
        // An article archived between ranking and hydration just drops out
        let Some(article) = store.get(&result.article_id).await? else {
            continue;
        };
        store.record_view(&article.id).await?;
        hits.push(SearchHit {
            article_id: article.id,
            title: article.title,
            summary: article.summary,
            category: article.category,
            similarity_score: result.similarity,
            rank: result.rank,
        });
    }
    Ok(hits)
}

/// POST /tickets/{id}/triage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageRequest {
    pub ticket_id: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageResponse {
    pub decision: GateDecision,
    pub auto_sent: bool,
    pub article_id: Option<String>,
    pub similarity_score: Option<f64>,
}

/// Run the auto-response gate against the best retrieval match for an
/// incoming ticket. Classification is purely threshold-based; whether an
/// `Auto` decision is actually sent depends on the feature flag, checked
/// here. Auto and suggest decisions are recorded as citations so scoring
/// can later correlate them with ticket resolution.
pub async fn triage(
    retrieval: &RetrievalService,
    gate: &ResponseGate,
    store: &ArticleStore,
    request: TriageRequest,
) -> Result<TriageResponse> {
    let results = retrieval.search(&request.query, Some(1)).await;

    let Some(best) = results.into_iter().next() else {
        return Ok(TriageResponse {
            decision: GateDecision::None,
            auto_sent: false,
            article_id: None,
            similarity_score: None,
        });
    };

    let decision = gate.classify(best.similarity);
    let mut auto_sent = false;
    match decision {
        GateDecision::Auto => {
            auto_sent = gate.auto_respond_enabled();
            store
                .record_citation(&best.article_id, &request.ticket_id, auto_sent)
                .await?;
            if auto_sent {
                store.record_usage(&best.article_id).await?;
            }
        }
        GateDecision::Suggest => {
            store
                .record_citation(&best.article_id, &request.ticket_id, false)
                .await?;
        }
        GateDecision::None => {}
    }

    Ok(TriageResponse {
        decision,
        auto_sent,
        article_id: Some(best.article_id),
        similarity_score: Some(best.similarity),
    })
}

/// POST /knowledge/{id}/vote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub article_id: String,
    pub helpful: bool,
}

pub async fn vote(store: &ArticleStore, request: VoteRequest) -> Result<()> {
    if store.get(&request.article_id).await?.is_none() {
        return Err(Error::ArticleNotFound(request.article_id));
    }
    store.record_vote(&request.article_id, request.helpful).await
}

/// GET /learning/analytics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub articles_created: i64,
    pub avg_effectiveness: f64,
    pub auto_responses_sent: i64,
    #[serde(rename = "ticketsResolvedByAI")]
    pub tickets_resolved_by_ai: i64,
    pub top_categories: Vec<CategoryCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

pub async fn analytics(store: &ArticleStore) -> Result<AnalyticsResponse> {
    let snapshot = store.analytics().await?;
    Ok(AnalyticsResponse {
        articles_created: snapshot.articles_created,
        avg_effectiveness: snapshot.avg_effectiveness,
        auto_responses_sent: snapshot.auto_responses_sent,
        tickets_resolved_by_ai: snapshot.tickets_resolved_by_ai,
        top_categories: snapshot
            .top_categories
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect(),
    })
}
