//! Resolved-ticket feed
//!
//! The ticketing CRUD system owns ticket lifecycle and storage; the learning
//! pipeline consumes a read-only feed of resolved tickets from here. The
//! insert path exists for the external writer and for test fixtures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Error, Result};
use crate::storage::Database;

/// A resolved support ticket as seen by the learning pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTicket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub resolution: String,
    pub category: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedTicket {
    /// The text the pipeline embeds and clusters on
    pub fn learning_text(&self) -> String {
        format!("{}\n{}", self.description, self.resolution)
    }

    /// Coarse grouping key: category plus the sorted tag set
    pub fn group_key(&self) -> String {
        let mut tags = self.tags.clone();
        tags.sort();
        format!("{}|{}", self.category, tags.join(","))
    }
}

#[derive(Debug, FromRow)]
struct TicketRow {
    id: String,
    title: String,
    description: String,
    resolution: String,
    category: String,
    tags: String,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TicketRow {
    fn into_ticket(self) -> Option<ResolvedTicket> {
        let resolved_at = self.resolved_at?;
        let tags: Vec<String> = serde_json::from_str(&self.tags).unwrap_or_default();
        Some(ResolvedTicket {
            id: self.id,
            title: self.title,
            description: self.description,
            resolution: self.resolution,
            category: self.category,
            tags,
            created_at: self.created_at,
            resolved_at,
        })
    }
}

/// Read path over the resolved-ticket feed
#[derive(Debug, Clone)]
pub struct TicketStore {
    db: Database,
}

impl TicketStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a resolved ticket by id
    pub async fn get(&self, ticket_id: &str) -> Result<Option<ResolvedTicket>> {
        let row: Option<TicketRow> = sqlx::query_as("SELECT * FROM tickets WHERE id = ?")
            .bind(ticket_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.and_then(TicketRow::into_ticket))
    }

    /// Fetch several tickets by id, skipping unknown ids
    pub async fn get_many(&self, ticket_ids: &[String]) -> Result<Vec<ResolvedTicket>> {
        let mut tickets = Vec::with_capacity(ticket_ids.len());
        for id in ticket_ids {
            if let Some(ticket) = self.get(id).await? {
                tickets.push(ticket);
            }
        }
        Ok(tickets)
    }

    /// All tickets resolved within [start, end), ordered by creation time
    ///
    /// An empty or inverted range is rejected synchronously; no work is
    /// queued for a bad request.
    pub async fn resolved_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ResolvedTicket>> {
        if start >= end {
            return Err(Error::InvalidInput(format!(
                "invalid date range: start {} is not before end {}",
                start, end
            )));
        }

        let rows: Vec<TicketRow> = sqlx::query_as(
            r#"
            SELECT * FROM tickets
            WHERE resolved_at IS NOT NULL AND resolved_at >= ? AND resolved_at < ?
            ORDER BY created_at, id
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().filter_map(TicketRow::into_ticket).collect())
    }

    /// Insert a resolved ticket (external feed / test fixtures)
    pub async fn insert(&self, ticket: &ResolvedTicket) -> Result<()> {
        let tags = serde_json::to_string(&ticket.tags)
            .map_err(|e| Error::Other(format!("failed to serialize tags: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO tickets (id, title, description, resolution, category, tags, created_at, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(&ticket.resolution)
        .bind(&ticket.category)
        .bind(&tags)
        .bind(ticket.created_at)
        .bind(ticket.resolved_at)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::ticket;
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::in_memory().await.unwrap();
        let store = TicketStore::new(db);

        let t = ticket("t-1", "network", "vpn drops every hour", 0);
        store.insert(&t).await.unwrap();

        let loaded = store.get("t-1").await.unwrap().expect("ticket present");
        assert_eq!(loaded.title, t.title);
        assert_eq!(loaded.category, "network");
        assert_eq!(loaded.resolved_at, t.resolved_at);
    }

    #[tokio::test]
    async fn test_resolved_between_filters_and_orders() {
        let db = Database::in_memory().await.unwrap();
        let store = TicketStore::new(db);

        store.insert(&ticket("t-2", "network", "b", 30)).await.unwrap();
        store.insert(&ticket("t-1", "network", "a", 0)).await.unwrap();
        store.insert(&ticket("t-3", "network", "c", 2000)).await.unwrap();

        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap();
        let tickets = store.resolved_between(start, end).await.unwrap();

        let ids: Vec<&str> = tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t-1", "t-2"]);
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let db = Database::in_memory().await.unwrap();
        let store = TicketStore::new(db);

        let start = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let err = store.resolved_between(start, end).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = store.resolved_between(start, start).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_group_key_is_tag_order_insensitive() {
        let mut a = ticket("t-1", "hardware", "x", 0);
        let mut b = ticket("t-2", "hardware", "y", 1);
        a.tags = vec!["printer".into(), "office".into()];
        b.tags = vec!["office".into(), "printer".into()];

        assert_eq!(a.group_key(), b.group_key());
    }
}
