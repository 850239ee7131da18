//! Evaluation strategies.
//!
//! A [`Strategy`] binds a metric set to an execution envelope (timeout, retries,
//! concurrency). Three variants exist:
//! - **Standard**: every metric, generous timeout
//! - **Custom**: same metrics and envelope, domain-specific judge instructions
//! - **Fallback**: drops the costliest metric, short timeout, fewer workers

use crate::config::StrategyConfig;
use crate::error::ScorerError;
use crate::metrics::{Metric, MetricSet};
use crate::record::EvaluationRecord;
use crate::scorer::{ExecutionConfig, RawResult, ScoreRequest, Scorer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Standard,
    Custom,
    Fallback,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Standard => write!(f, "standard"),
            StrategyKind::Custom => write!(f, "custom"),
            StrategyKind::Fallback => write!(f, "fallback"),
        }
    }
}

/// An immutable scoring policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    kind: StrategyKind,
    name: String,
    metrics: MetricSet,
    timeout_secs: u64,
    max_retries: u32,
    concurrency: usize,
    instructions: BTreeMap<Metric, String>,
}

impl Strategy {
    /// All configured metrics with the standard envelope.
    pub fn standard(config: &StrategyConfig) -> Self {
        Self {
            kind: StrategyKind::Standard,
            name: "standard".to_string(),
            metrics: Metric::standard_set(config.include_answer_correctness),
            timeout_secs: config.standard_timeout_secs,
            max_retries: config.max_retries,
            concurrency: config.concurrency.max(1),
            instructions: BTreeMap::new(),
        }
    }

    /// Standard metrics and envelope with instructions worded for `domain`.
    ///
    /// Configured instructions override the built-in wording metric by metric.
    pub fn custom(config: &StrategyConfig, domain: &str) -> Self {
        let metrics = Metric::standard_set(config.include_answer_correctness);
        let mut instructions: BTreeMap<Metric, String> = metrics
            .iter()
            .map(|m| (*m, domain_instruction(*m, domain)))
            .collect();
        for (key, text) in &config.instructions {
            if let Ok(metric) = key.parse::<Metric>() {
                if metrics.contains(&metric) {
                    instructions.insert(metric, text.clone());
                }
            }
        }
        Self {
            kind: StrategyKind::Custom,
            name: format!("custom:{domain}"),
            metrics,
            timeout_secs: config.standard_timeout_secs,
            max_retries: config.max_retries,
            concurrency: config.concurrency.max(1),
            instructions,
        }
    }

    /// Reduced metric set with a short envelope, for use after the primary failed.
    pub fn fallback(config: &StrategyConfig) -> Self {
        let full = Metric::standard_set(config.include_answer_correctness);
        Self {
            kind: StrategyKind::Fallback,
            name: "fallback".to_string(),
            metrics: Metric::without_most_expensive(&full),
            timeout_secs: config.fallback_timeout_secs,
            max_retries: config.max_retries.min(1),
            concurrency: config
                .fallback_concurrency
                .clamp(1, config.concurrency.max(1)),
            instructions: BTreeMap::new(),
        }
    }

    /// Custom when a domain is configured, standard otherwise.
    pub fn for_config(config: &StrategyConfig) -> Self {
        match config.domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => Self::custom(config, domain),
            _ => Self::standard(config),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metric_set(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn instructions(&self) -> &BTreeMap<Metric, String> {
        &self.instructions
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            concurrency: self.concurrency,
        }
    }

    /// Build the scorer request for this strategy.
    pub fn request(&self, cancel: CancellationToken) -> ScoreRequest {
        ScoreRequest {
            metrics: self.metrics.clone(),
            instructions: self.instructions.clone(),
            execution: self.execution(),
            cancel,
        }
    }

    /// Score `batch` with this strategy's metrics and envelope.
    ///
    /// No deadline is enforced here; see [`crate::executor::run_with_timeout`].
    pub async fn run(
        &self,
        scorer: &dyn Scorer,
        batch: &[EvaluationRecord],
        cancel: CancellationToken,
    ) -> Result<RawResult, ScorerError> {
        let request = self.request(cancel);
        scorer.score(batch, &request).await
    }
}

fn domain_instruction(metric: Metric, domain: &str) -> String {
    let focus = match metric {
        Metric::Faithfulness => {
            "Treat any claim not directly supported by the retrieved contexts as unfaithful, \
             including plausible domain knowledge the contexts do not state."
        }
        Metric::AnswerRelevancy => {
            "Judge whether the answer addresses the question as a practitioner would expect, \
             penalizing generic or evasive responses."
        }
        Metric::ContextRecall => {
            "Check that every fact in the reference answer can be attributed to the retrieved contexts."
        }
        Metric::ContextPrecision => {
            "Rank contexts as useful only when they contain information needed for the reference answer."
        }
        Metric::AnswerCorrectness => {
            "Compare the answer with the reference using the terminology and precision of the field."
        }
    };
    format!("You are evaluating a {domain} question-answering system. {focus}")
}
