//! Adapter for synchronous scoring functions.

use super::{RawResult, ScoreRequest, Scorer};
use crate::error::ScorerError;
use crate::record::EvaluationRecord;
use async_trait::async_trait;
use std::sync::Arc;

type ScoreFn =
    dyn Fn(&[EvaluationRecord], &ScoreRequest) -> Result<RawResult, ScorerError> + Send + Sync;

/// Runs a blocking scoring function on the blocking thread pool.
///
/// Blocking work cannot be interrupted. When the request is cancelled the
/// scorer returns immediately and the thread is left to finish on its own;
/// its result is discarded.
pub struct BlockingScorer {
    name: String,
    func: Arc<ScoreFn>,
}

impl BlockingScorer {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[EvaluationRecord], &ScoreRequest) -> Result<RawResult, ScorerError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Scorer for BlockingScorer {
    async fn score(
        &self,
        batch: &[EvaluationRecord],
        request: &ScoreRequest,
    ) -> Result<RawResult, ScorerError> {
        let func = Arc::clone(&self.func);
        let batch = batch.to_vec();
        let owned = request.clone();
        let handle = tokio::task::spawn_blocking(move || func(&batch, &owned));

        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Err(ScorerError::Cancelled),
            joined = handle => joined.map_err(|e| ScorerError::Panicked {
                message: e.to_string(),
            })?,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
