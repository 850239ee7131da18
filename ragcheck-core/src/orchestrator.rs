//! Strategy orchestration: primary, then fallback, then a placeholder.
//!
//! [`EvaluationContext::run_evaluation_with_timeout`] always produces a
//! well-formed result for the batch it was given. The primary strategy runs
//! under its own timeout; if it times out or errors, the fallback runs under
//! half that timeout; if the fallback fails too, a synthetic placeholder is
//! returned and flagged as such.

use crate::config::EvalConfig;
use crate::executor::{ExecutionOutcome, run_with_timeout};
use crate::normalizer::{NormalizedResult, normalize};
use crate::record::EvaluationRecord;
use crate::scorer::Scorer;
use crate::strategy::Strategy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Which stage produced the returned result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Primary,
    Fallback,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum AttemptStatus {
    Succeeded,
    TimedOut,
    Failed(String),
}

/// One strategy attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub strategy: String,
    pub status: AttemptStatus,
    pub elapsed: Duration,
}

/// The result of orchestrating one batch.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub result: NormalizedResult,
    pub source: ResultSource,
    /// Name of the strategy whose metric set the result carries.
    pub strategy: String,
    /// The scores are placeholders, not scorer output.
    pub is_synthetic: bool,
    pub attempts: Vec<AttemptReport>,
}

enum State {
    TryingPrimary,
    TryingFallback,
    Synthesizing,
    Done(EvaluationOutcome),
}

/// Scorer plus the primary/fallback strategy pair.
pub struct EvaluationContext {
    scorer: Arc<dyn Scorer>,
    primary: Strategy,
    fallback: Strategy,
    placeholder_score: f64,
}

impl EvaluationContext {
    pub fn new(scorer: Arc<dyn Scorer>, primary: Strategy, fallback: Strategy) -> Self {
        Self {
            scorer,
            primary,
            fallback,
            placeholder_score: 0.5,
        }
    }

    /// Primary from the configured domain (standard or custom), fallback from the same section.
    pub fn from_config(scorer: Arc<dyn Scorer>, config: &EvalConfig) -> Self {
        Self::new(
            scorer,
            Strategy::for_config(&config.strategy),
            Strategy::fallback(&config.strategy),
        )
        .with_placeholder_score(config.batch.placeholder_score)
    }

    /// Same scorer, strategies rebuilt from `config`.
    pub fn reconfigured(&self, config: &EvalConfig) -> Self {
        Self::from_config(Arc::clone(&self.scorer), config)
    }

    #[must_use]
    pub fn with_placeholder_score(mut self, score: f64) -> Self {
        self.placeholder_score = score.clamp(0.0, 1.0);
        self
    }

    pub fn primary(&self) -> &Strategy {
        &self.primary
    }

    pub fn fallback(&self) -> &Strategy {
        &self.fallback
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Deadline for the primary attempt.
    pub fn primary_timeout(&self) -> Duration {
        self.primary.timeout()
    }

    /// Deadline for the fallback attempt: half the primary deadline.
    pub fn fallback_timeout(&self) -> Duration {
        self.primary.timeout() / 2
    }

    /// Score `batch`, escalating through fallback and synthesis as needed.
    pub async fn run_evaluation_with_timeout(
        &self,
        batch: &[EvaluationRecord],
    ) -> EvaluationOutcome {
        let shared: Arc<[EvaluationRecord]> = batch.into();
        let mut attempts = Vec::new();
        let mut state = State::TryingPrimary;

        loop {
            state = match state {
                State::TryingPrimary => {
                    match self
                        .attempt(&self.primary, &shared, self.primary_timeout(), &mut attempts)
                        .await
                    {
                        Some(result) => State::Done(EvaluationOutcome {
                            result,
                            source: ResultSource::Primary,
                            strategy: self.primary.name().to_string(),
                            is_synthetic: false,
                            attempts: std::mem::take(&mut attempts),
                        }),
                        None => {
                            warn!(
                                primary = self.primary.name(),
                                fallback = self.fallback.name(),
                                "Primary strategy failed, trying fallback"
                            );
                            State::TryingFallback
                        }
                    }
                }
                State::TryingFallback => {
                    match self
                        .attempt(&self.fallback, &shared, self.fallback_timeout(), &mut attempts)
                        .await
                    {
                        Some(result) => State::Done(EvaluationOutcome {
                            result,
                            source: ResultSource::Fallback,
                            strategy: self.fallback.name().to_string(),
                            is_synthetic: false,
                            attempts: std::mem::take(&mut attempts),
                        }),
                        None => State::Synthesizing,
                    }
                }
                State::Synthesizing => {
                    warn!(
                        records = batch.len(),
                        placeholder = self.placeholder_score,
                        "All strategies failed, synthesizing placeholder result"
                    );
                    State::Done(EvaluationOutcome {
                        result: NormalizedResult::synthetic(
                            batch.len(),
                            self.primary.metric_set(),
                            self.placeholder_score,
                        ),
                        source: ResultSource::Synthetic,
                        strategy: "synthetic".to_string(),
                        is_synthetic: true,
                        attempts: std::mem::take(&mut attempts),
                    })
                }
                State::Done(outcome) => return outcome,
            };
        }
    }

    async fn attempt(
        &self,
        strategy: &Strategy,
        batch: &Arc<[EvaluationRecord]>,
        timeout: Duration,
        attempts: &mut Vec<AttemptReport>,
    ) -> Option<NormalizedResult> {
        let started = Instant::now();
        let outcome =
            run_with_timeout(strategy, Arc::clone(&self.scorer), Arc::clone(batch), timeout).await;
        let elapsed = started.elapsed();

        let (status, result) = match outcome {
            ExecutionOutcome::Completed(raw) => (
                AttemptStatus::Succeeded,
                Some(normalize(&raw, batch, strategy.metric_set())),
            ),
            ExecutionOutcome::TimedOut { .. } => (AttemptStatus::TimedOut, None),
            ExecutionOutcome::Failed(err) => (AttemptStatus::Failed(err.to_string()), None),
        };
        info!(
            strategy = strategy.name(),
            status = ?status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Strategy attempt finished"
        );
        attempts.push(AttemptReport {
            strategy: strategy.name().to_string(),
            status,
            elapsed,
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::metrics::Metric;
    use crate::scorer::{MockResponse, MockScorer};

    fn config(timeout: u64) -> StrategyConfig {
        StrategyConfig {
            standard_timeout_secs: timeout,
            fallback_timeout_secs: timeout / 2,
            ..StrategyConfig::default()
        }
    }

    fn context(scorer: Arc<MockScorer>) -> EvaluationContext {
        let cfg = config(60);
        EvaluationContext::new(scorer, Strategy::standard(&cfg), Strategy::fallback(&cfg))
    }

    fn batch(n: usize) -> Vec<EvaluationRecord> {
        (0..n)
            .map(|i| EvaluationRecord::new(format!("q{i}"), ["c"], "a", "r"))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_success() {
        let scorer = Arc::new(MockScorer::constant(0.9));
        let ctx = context(Arc::clone(&scorer));
        let outcome = ctx.run_evaluation_with_timeout(&batch(2)).await;
        assert_eq!(outcome.source, ResultSource::Primary);
        assert!(!outcome.is_synthetic);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.result.scores.len(), 4);
        assert_eq!(scorer.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_error() {
        let scorer = Arc::new(MockScorer::constant(0.7));
        scorer.queue_response(MockResponse::Error("judge unavailable".into()));
        let ctx = context(Arc::clone(&scorer));
        let outcome = ctx.run_evaluation_with_timeout(&batch(3)).await;
        assert_eq!(outcome.source, ResultSource::Fallback);
        assert_eq!(outcome.strategy, "fallback");
        assert!(!outcome.result.scores.contains_key(&Metric::Faithfulness));
        assert!(matches!(outcome.attempts[0].status, AttemptStatus::Failed(_)));
        assert_eq!(outcome.attempts[1].status, AttemptStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_when_both_fail() {
        let scorer = Arc::new(MockScorer::new(MockResponse::Hang));
        let ctx = context(Arc::clone(&scorer)).with_placeholder_score(0.25);
        let start = Instant::now();
        let outcome = ctx.run_evaluation_with_timeout(&batch(4)).await;
        assert!(outcome.is_synthetic);
        assert_eq!(outcome.source, ResultSource::Synthetic);
        assert_eq!(outcome.result.record_count, 4);
        assert_eq!(
            outcome.result.scores[&Metric::Faithfulness],
            vec![Some(0.25); 4]
        );
        assert!(start.elapsed() <= Duration::from_secs(90) + Duration::from_millis(50));
        assert!(outcome
            .attempts
            .iter()
            .all(|a| a.status == AttemptStatus::TimedOut));
    }

    #[test]
    fn test_fallback_timeout_is_half_primary() {
        let ctx = context(Arc::new(MockScorer::constant(1.0)));
        assert_eq!(ctx.primary_timeout(), Duration::from_secs(60));
        assert_eq!(ctx.fallback_timeout(), Duration::from_secs(30));
    }
}
