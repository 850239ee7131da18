//! The scorer boundary.
//!
//! Metric computation is delegated to an external evaluation service. This
//! module defines the capability the engine consumes (the [`Scorer`] trait) and
//! the adapters that sit at its edge:
//! - [`RawResult`], a tagged union over the result encodings a scorer may return
//! - [`HttpScorer`] for a scoring sidecar reachable over HTTP
//! - [`BlockingScorer`] for synchronous in-process scoring functions
//! - [`MockScorer`] for tests and dry runs

pub mod blocking;
pub mod http;
pub mod mock;
pub mod rate_limiter;
pub mod raw;

use crate::error::ScorerError;
use crate::metrics::{Metric, MetricSet};
use crate::record::EvaluationRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

pub use blocking::BlockingScorer;
pub use http::HttpScorer;
pub use mock::{MockResponse, MockScorer};
pub use rate_limiter::{RateLimitConfig, RequestLimiter};
pub use raw::{RawResult, ResultTable};

/// Execution parameters passed through to the scorer.
///
/// The scorer may use them however it likes; wall-clock enforcement happens in
/// the [executor](crate::executor), not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub concurrency: usize,
}

/// What to score and how.
#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub metrics: MetricSet,
    /// Alternate judge instructions per metric (empty for the default wording).
    pub instructions: BTreeMap<Metric, String>,
    pub execution: ExecutionConfig,
    /// Cancelled by the executor once its deadline passes.
    pub cancel: CancellationToken,
}

impl ScoreRequest {
    pub fn new(metrics: MetricSet, execution: ExecutionConfig) -> Self {
        Self {
            metrics,
            instructions: BTreeMap::new(),
            execution,
            cancel: CancellationToken::new(),
        }
    }

    /// Metric identifiers in a stable order.
    pub fn metric_names(&self) -> Vec<&'static str> {
        self.metrics.iter().map(Metric::as_str).collect()
    }
}

/// Trait for external scoring capabilities.
///
/// Implementations score a batch of records for the requested metrics and
/// return the result in whichever shape they natively produce.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score a batch. May take arbitrarily long or never return.
    async fn score(
        &self,
        batch: &[EvaluationRecord],
        request: &ScoreRequest,
    ) -> Result<RawResult, ScorerError>;

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_sorted() {
        let metrics: MetricSet = [Metric::ContextRecall, Metric::Faithfulness]
            .into_iter()
            .collect();
        let request = ScoreRequest::new(
            metrics,
            ExecutionConfig {
                timeout_secs: 10,
                max_retries: 0,
                concurrency: 1,
            },
        );
        assert_eq!(
            request.metric_names(),
            vec!["faithfulness", "context_recall"]
        );
        assert!(!request.cancel.is_cancelled());
    }
}
