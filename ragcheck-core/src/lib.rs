//! # Ragcheck Core
//!
//! Resilience engine for RAG evaluation runs.
//! Provides the result normalizer, evaluation strategies, the timeout-bounded
//! executor, the strategy orchestrator and the checkpointed batch manager,
//! along with the scorer boundary, configuration and checkpoint storage.

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod normalizer;
pub mod orchestrator;
pub mod pacing;
pub mod persistence;
pub mod record;
pub mod report;
pub mod resource_guard;
pub mod scorer;
pub mod strategy;

// Re-export commonly used types at the crate root.
pub use batch::BatchManager;
pub use checkpoint::{
    CheckpointState, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, RecordResult,
    SessionStatus, SessionSummary,
};
pub use config::{EvalConfig, load_config};
pub use error::{CheckpointError, ConfigError, RagCheckError, RecordError, Result, ScorerError};
pub use executor::{ExecutionOutcome, run_with_timeout};
pub use metrics::{Metric, MetricSet, RunningAggregate};
pub use normalizer::{ExtractionMethod, NormalizedResult, normalize};
pub use orchestrator::{AttemptReport, AttemptStatus, EvaluationContext, EvaluationOutcome, ResultSource};
pub use pacing::{ChunkPacer, Sleeper, TokioSleeper};
pub use record::{Dataset, EvaluationRecord};
pub use report::{EvaluationReport, RunMetadata};
pub use resource_guard::{MemoryPressure, MemoryProbe, ResourceGuard, SystemMemoryProbe};
pub use scorer::{
    BlockingScorer, ExecutionConfig, HttpScorer, MockResponse, MockScorer, RawResult,
    ResultTable, ScoreRequest, Scorer,
};
pub use strategy::{Strategy, StrategyKind};
