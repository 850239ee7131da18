//! Metric identifiers and score arithmetic.
//!
//! Scores are plain `f64` values in `[0.0, 1.0]`; `None` marks a score that
//! could not be computed and is excluded from every mean.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A RAG quality metric computed by the external scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Faithfulness,
    AnswerRelevancy,
    ContextRecall,
    ContextPrecision,
    AnswerCorrectness,
}

/// An ordered set of metrics requested from the scorer.
pub type MetricSet = BTreeSet<Metric>;

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Faithfulness,
        Metric::AnswerRelevancy,
        Metric::ContextRecall,
        Metric::ContextPrecision,
        Metric::AnswerCorrectness,
    ];

    /// Wire identifier used by the scorer and in checkpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Faithfulness => "faithfulness",
            Metric::AnswerRelevancy => "answer_relevancy",
            Metric::ContextRecall => "context_recall",
            Metric::ContextPrecision => "context_precision",
            Metric::AnswerCorrectness => "answer_correctness",
        }
    }

    /// Approximate judge cost of one evaluation of this metric.
    ///
    /// Faithfulness decomposes the answer into statements and verifies each one
    /// against the contexts, so it needs the most judge calls per record.
    pub fn relative_cost(&self) -> u8 {
        match self {
            Metric::Faithfulness => 5,
            Metric::AnswerCorrectness => 4,
            Metric::ContextRecall => 3,
            Metric::ContextPrecision => 2,
            Metric::AnswerRelevancy => 1,
        }
    }

    /// The four core metrics, plus answer correctness when requested.
    pub fn standard_set(include_answer_correctness: bool) -> MetricSet {
        let mut set: MetricSet = [
            Metric::Faithfulness,
            Metric::AnswerRelevancy,
            Metric::ContextRecall,
            Metric::ContextPrecision,
        ]
        .into_iter()
        .collect();
        if include_answer_correctness {
            set.insert(Metric::AnswerCorrectness);
        }
        set
    }

    /// Remove the most expensive metric from a set.
    ///
    /// A single-metric set is returned unchanged so the result is never empty.
    pub fn without_most_expensive(set: &MetricSet) -> MetricSet {
        if set.len() <= 1 {
            return set.clone();
        }
        let mut reduced = set.clone();
        if let Some(costliest) = set.iter().max_by_key(|m| m.relative_cost()) {
            reduced.remove(costliest);
        }
        reduced
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| format!("unknown metric: {s}"))
    }
}

/// Whether a value is a usable score.
pub fn is_valid_score(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// Mean over the present entries, or `None` when every entry is missing.
pub fn mean_of_present(scores: &[Option<f64>]) -> Option<f64> {
    let mut agg = RunningAggregate::default();
    for score in scores {
        agg.push(*score);
    }
    agg.mean()
}

/// Exact incremental mean for one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningAggregate {
    pub count: usize,
    pub sum: f64,
}

impl RunningAggregate {
    /// Fold a score in; missing values are skipped.
    pub fn push(&mut self, score: Option<f64>) {
        if let Some(v) = score {
            self.count += 1;
            self.sum += v;
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    /// Mean, with 0.0 for a metric that never produced a score.
    pub fn mean_or_zero(&self) -> f64 {
        self.mean().unwrap_or(0.0)
    }
}
