//! Final and partial evaluation reports.

use crate::checkpoint::{CheckpointState, RecordResult};
use crate::config::ModelConfig;
use crate::metrics::RunningAggregate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Aggregated scores plus every per-record result of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub session_id: String,
    /// Metric id -> mean over the whole session.
    pub metrics: BTreeMap<String, f64>,
    pub individual_results: Vec<RecordResult>,
    pub metadata: RunMetadata,
}

/// Run context reported next to the scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub dataset_name: String,
    pub llm_model: String,
    pub embedding_model: String,
    pub total_records: usize,
    /// Records scored by a placeholder or from a malformed chunk.
    pub error_count: usize,
    /// `(total - errors) / total`, 0.0 for an empty run.
    pub success_rate: f64,
    pub synthetic_chunks: usize,
    /// Strategy name -> chunks it scored.
    pub strategies: BTreeMap<String, usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Per-metric mean over the full result history.
///
/// Missing scores and placeholder results are excluded; a metric with no
/// present score reports 0.0.
pub fn compute_metrics(results: &[RecordResult]) -> BTreeMap<String, f64> {
    let mut aggregates: BTreeMap<&str, RunningAggregate> = BTreeMap::new();
    for result in results {
        for (metric, score) in &result.scores {
            let agg = aggregates.entry(metric.as_str()).or_default();
            if !result.synthetic {
                agg.push(*score);
            }
        }
    }
    aggregates
        .into_iter()
        .map(|(metric, agg)| (metric.to_string(), agg.mean_or_zero()))
        .collect()
}

pub fn success_rate(total: usize, errors: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        total.saturating_sub(errors) as f64 / total as f64
    }
}

impl EvaluationReport {
    /// Build a report from everything recorded in `state` so far.
    pub fn from_state(
        state: &CheckpointState,
        models: &ModelConfig,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let total_records = state.individual_results.len();
        Self {
            session_id: state.session_id.clone(),
            metrics: compute_metrics(&state.individual_results),
            individual_results: state.individual_results.clone(),
            metadata: RunMetadata {
                dataset_name: state.dataset_name.clone(),
                llm_model: models.llm_model.clone(),
                embedding_model: models.embedding_model.clone(),
                total_records,
                error_count: state.error_count,
                success_rate: success_rate(total_records, state.error_count),
                synthetic_chunks: state.synthetic_chunks,
                strategies: state.strategies_used.clone(),
                started_at: state.start_time,
                finished_at,
            },
        }
    }

    pub fn render_summary(&self) -> String {
        let meta = &self.metadata;
        let mut out = String::new();
        let _ = writeln!(out, "=== Evaluation Summary ===");
        let _ = writeln!(out, "Session: {}", self.session_id);
        let _ = writeln!(out, "Dataset: {}", meta.dataset_name);
        let _ = writeln!(
            out,
            "Models: {} (judge), {} (embeddings)",
            meta.llm_model, meta.embedding_model
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Records: {} total, {} errors",
            meta.total_records, meta.error_count
        );
        let _ = writeln!(out, "Success rate: {:.1}%", meta.success_rate * 100.0);
        if meta.synthetic_chunks > 0 {
            let _ = writeln!(out, "Synthetic chunks: {}", meta.synthetic_chunks);
        }
        if !meta.strategies.is_empty() {
            let strategies: Vec<String> = meta
                .strategies
                .iter()
                .map(|(name, chunks)| format!("{name} x{chunks}"))
                .collect();
            let _ = writeln!(out, "Strategies: {}", strategies.join(", "));
        }
        if !self.metrics.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Scores:");
            for (metric, mean) in &self.metrics {
                let _ = writeln!(out, "  {metric}: {mean:.3}");
            }
        }
        let elapsed = meta.finished_at - meta.started_at;
        let _ = writeln!(out);
        let _ = write!(
            out,
            "Duration: {:.1}s",
            elapsed.num_milliseconds().max(0) as f64 / 1000.0
        );
        out
    }

    /// Print a summary to stdout.
    pub fn print_summary(&self) {
        println!();
        println!("{}", self.render_summary());
    }

    /// Write the report to a JSON file.
    pub fn write_json(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}
