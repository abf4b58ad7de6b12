//! Ticketlore Core Library
//!
//! This crate provides the knowledge learning pipeline for Ticketlore:
//! - Learning queue (per-ticket work items with atomic claim and retry)
//! - Batch pattern extraction (similarity clustering of resolved tickets)
//! - Article synthesis (LLM-backed draft generation with strict validation)
//! - Effectiveness scoring (periodic recompute from usage signals)
//! - Semantic retrieval (cosine ranking over published article embeddings)
//! - Auto-response gate (confidence-banded triage decisions)
//!
//! Ticket CRUD, user administration and all UI live outside this crate; the
//! pipeline only reads resolved tickets and writes knowledge articles.

pub mod api;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod learning;
pub mod llm;
pub mod storage;
pub mod tickets;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::knowledge::article::{ArticleStatus, KnowledgeArticle};
    pub use crate::storage::Database;
}
