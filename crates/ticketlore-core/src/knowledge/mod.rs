//! Knowledge articles: types, persistence, retrieval and triage gating

pub mod article;
pub mod gate;
pub mod retrieval;
pub mod store;

pub use article::{ArticleSource, ArticleStatus, KnowledgeArticle};
pub use gate::{GateDecision, ResponseGate};
pub use retrieval::{RetrievalResult, RetrievalService};
pub use store::ArticleStore;
