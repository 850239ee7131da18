//! Timeout-bounded execution of a strategy.
//!
//! The scoring call runs on its own tokio task so a deadline can be enforced
//! from outside. When the deadline passes the request's cancellation token is
//! cancelled and the task is aborted. Async scorers stop at their next await
//! point; blocking work already handed to a thread keeps running until it
//! returns, and its result is dropped.

use crate::error::ScorerError;
use crate::record::EvaluationRecord;
use crate::scorer::{RawResult, Scorer};
use crate::strategy::Strategy;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a bounded scoring attempt ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(RawResult),
    TimedOut { after: Duration },
    Failed(ScorerError),
}

impl ExecutionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed(_))
    }
}

/// Run `strategy` against `scorer`, waiting at most `timeout`.
///
/// Never panics and never returns an error: every failure mode is folded into
/// an [`ExecutionOutcome`].
pub async fn run_with_timeout(
    strategy: &Strategy,
    scorer: Arc<dyn Scorer>,
    batch: Arc<[EvaluationRecord]>,
    timeout: Duration,
) -> ExecutionOutcome {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task_strategy = strategy.clone();
    let records = batch.len();
    let started = Instant::now();

    debug!(
        strategy = strategy.name(),
        scorer = scorer.name(),
        records,
        timeout_secs = timeout.as_secs_f64(),
        "Starting bounded scoring attempt"
    );

    let mut handle = tokio::spawn(async move {
        task_strategy
            .run(scorer.as_ref(), &batch, task_cancel)
            .await
    });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(raw))) => {
            debug!(
                strategy = strategy.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                kind = raw.kind(),
                "Scoring attempt completed"
            );
            ExecutionOutcome::Completed(raw)
        }
        Ok(Ok(Err(err))) => {
            warn!(strategy = strategy.name(), error = %err, "Scoring attempt failed");
            ExecutionOutcome::Failed(err)
        }
        Ok(Err(join_err)) => {
            warn!(strategy = strategy.name(), error = %join_err, "Scoring task aborted");
            ExecutionOutcome::Failed(ScorerError::Panicked {
                message: join_err.to_string(),
            })
        }
        Err(_) => {
            cancel.cancel();
            handle.abort();
            warn!(
                strategy = strategy.name(),
                timeout_secs = timeout.as_secs_f64(),
                records,
                "Scoring attempt timed out, task abandoned"
            );
            ExecutionOutcome::TimedOut { after: timeout }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::scorer::{MockResponse, MockScorer};

    fn batch() -> Arc<[EvaluationRecord]> {
        vec![EvaluationRecord::new("q", ["c"], "a", "r")].into()
    }

    fn strategy() -> Strategy {
        Strategy::standard(&StrategyConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_within_deadline() {
        let scorer = Arc::new(MockScorer::new(MockResponse::Delayed(
            Duration::from_secs(2),
            Box::new(MockResponse::Constant(0.8)),
        )));
        let outcome =
            run_with_timeout(&strategy(), scorer, batch(), Duration::from_secs(10)).await;
        assert!(outcome.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_times_out() {
        let scorer = Arc::new(MockScorer::new(MockResponse::Hang));
        let start = Instant::now();
        let outcome =
            run_with_timeout(&strategy(), scorer, batch(), Duration::from_secs(30)).await;
        assert!(matches!(outcome, ExecutionOutcome::TimedOut { after } if after == Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_captured() {
        let scorer = Arc::new(MockScorer::new(MockResponse::Error("quota".into())));
        let outcome =
            run_with_timeout(&strategy(), scorer, batch(), Duration::from_secs(10)).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed(ScorerError::Request { .. })
        ));
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let scorer = Arc::new(crate::scorer::BlockingScorer::new(
            "boom",
            |_: &[EvaluationRecord], _: &crate::scorer::ScoreRequest| panic!("bad scorer"),
        ));
        let outcome =
            run_with_timeout(&strategy(), scorer, batch(), Duration::from_secs(10)).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed(ScorerError::Panicked { .. })
        ));
    }
}
