//! The learning pipeline: queue, pattern extraction, article synthesis,
//! effectiveness scoring, batch runs and the background worker

pub mod extractor;
pub mod queue;
pub mod run;
pub mod scorer;
pub mod synthesizer;
pub mod worker;

pub use extractor::{Pattern, PatternExtractor};
pub use queue::{LearningQueue, QueueItem, QueueStats, QueueStatus};
pub use run::{BatchProcessor, LearningRun};
pub use scorer::{EffectivenessScorer, UsageSignals};
pub use synthesizer::{ArticleSynthesizer, SynthesisOutcome};
pub use worker::{LearningWorker, RetryPolicy};
