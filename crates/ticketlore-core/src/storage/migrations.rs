//! Database migrations
//!
//! This module manages SQLite schema migrations for the learning pipeline.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Core pipeline schema
const MIGRATION_V1: &str = r#"
    -- Resolved-ticket feed. The ticket CRUD system owns this data; the
    -- pipeline only reads it (and tests seed it).
    CREATE TABLE IF NOT EXISTS tickets (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        resolution TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '[]',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        resolved_at TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_tickets_resolved_at ON tickets(resolved_at);
    CREATE INDEX IF NOT EXISTS idx_tickets_category ON tickets(category);

    -- Per-ticket learning work items. Status transitions are forward-only;
    -- terminal rows are retained for audit.
    CREATE TABLE IF NOT EXISTS learning_queue (
        ticket_id TEXT PRIMARY KEY NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
        attempt_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        enqueued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        next_attempt_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        processed_at TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_learning_queue_status ON learning_queue(status);
    CREATE INDEX IF NOT EXISTS idx_learning_queue_next_attempt ON learning_queue(next_attempt_at);

    -- Knowledge articles. provenance_key is the idempotency key derived from
    -- sorted source ticket ids; version backs optimistic concurrency.
    CREATE TABLE IF NOT EXISTS knowledge_articles (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '[]',
        status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'published', 'archived')),
        source TEXT NOT NULL DEFAULT 'manual' CHECK (source IN ('manual', 'ai_generated')),
        source_ticket_ids TEXT NOT NULL DEFAULT '[]',
        provenance_key TEXT,
        effectiveness_score REAL NOT NULL DEFAULT 0.0,
        usage_count INTEGER NOT NULL DEFAULT 0,
        view_count INTEGER NOT NULL DEFAULT 0,
        helpful_votes INTEGER NOT NULL DEFAULT 0,
        unhelpful_votes INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        archived_at TIMESTAMP
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_provenance_key
        ON knowledge_articles(provenance_key) WHERE provenance_key IS NOT NULL;
    CREATE INDEX IF NOT EXISTS idx_articles_status ON knowledge_articles(status);
    CREATE INDEX IF NOT EXISTS idx_articles_category ON knowledge_articles(category);

    -- Batch run bookkeeping; the most recently started run is authoritative
    -- for reporting.
    CREATE TABLE IF NOT EXISTS learning_runs (
        id TEXT PRIMARY KEY NOT NULL,
        range_start TIMESTAMP NOT NULL,
        range_end TIMESTAMP NOT NULL,
        ticket_count INTEGER NOT NULL DEFAULT 0,
        patterns_found INTEGER NOT NULL DEFAULT 0,
        articles_created INTEGER NOT NULL DEFAULT 0,
        articles_published INTEGER NOT NULL DEFAULT 0,
        duplicates_skipped INTEGER NOT NULL DEFAULT 0,
        failures INTEGER NOT NULL DEFAULT 0,
        started_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        completed_at TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_learning_runs_started_at ON learning_runs(started_at);
"#;

/// Migration 2: Embeddings and usage signals
const MIGRATION_V2: &str = r#"
    -- Article embeddings for semantic retrieval
    CREATE TABLE IF NOT EXISTS article_embeddings (
        id TEXT PRIMARY KEY NOT NULL,
        article_id TEXT NOT NULL REFERENCES knowledge_articles(id) ON DELETE CASCADE,
        embedding_model TEXT NOT NULL,
        embedding BLOB NOT NULL,                 -- Binary float array (f32 little-endian)
        dimensions INTEGER NOT NULL,
        text_hash TEXT NOT NULL,                 -- Hash of embedded text for refresh detection
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(article_id, embedding_model)
    );

    CREATE INDEX IF NOT EXISTS idx_article_embeddings_article_id ON article_embeddings(article_id);
    CREATE INDEX IF NOT EXISTS idx_article_embeddings_model ON article_embeddings(embedding_model);

    -- Article usage against tickets: suggestions shown, auto-responses sent,
    -- and whether the citing ticket was subsequently resolved. Feeds the
    -- resolution-correlation scoring term and the analytics surface.
    CREATE TABLE IF NOT EXISTS article_citations (
        id TEXT PRIMARY KEY NOT NULL,
        article_id TEXT NOT NULL REFERENCES knowledge_articles(id) ON DELETE CASCADE,
        ticket_id TEXT NOT NULL,
        auto_sent INTEGER NOT NULL DEFAULT 0,
        ticket_resolved INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(article_id, ticket_id)
    );

    CREATE INDEX IF NOT EXISTS idx_article_citations_article_id ON article_citations(article_id);
    CREATE INDEX IF NOT EXISTS idx_article_citations_ticket_id ON article_citations(ticket_id);
"#;

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Core pipeline schema");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Embeddings and usage signals");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Get the currently applied schema version
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    let row: (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;

    Ok(row.0.unwrap_or(0))
}

/// Record a migration as applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}
