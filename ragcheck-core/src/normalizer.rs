//! Result normalization.
//!
//! Turns any [`RawResult`] into a [`NormalizedResult`]: one score list per
//! requested metric, exactly as long as the batch, plus the mean of the present
//! scores. Normalization never fails. A result that cannot be read degrades to
//! an all-missing result so the batch can continue.

use crate::metrics::{Metric, MetricSet, is_valid_score, mean_of_present};
use crate::record::EvaluationRecord;
use crate::scorer::{RawResult, ResultTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Which extraction path produced a normalized result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Tabular,
    ScoresByMetric,
    /// One scalar per metric broadcast to every record.
    Attributes,
    /// Nothing could be extracted; every score is missing.
    None,
    /// Placeholder scores, not produced by a scorer.
    Synthetic,
}

/// Canonical per-record scores for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResult {
    pub record_count: usize,
    /// One entry per record, in batch order. `None` is a missing score.
    pub scores: BTreeMap<Metric, Vec<Option<f64>>>,
    /// Mean of the present scores; 0.0 for a fully failed metric.
    pub means: BTreeMap<Metric, f64>,
    /// Metrics without a single present score.
    pub failed_metrics: BTreeSet<Metric>,
    pub extraction: ExtractionMethod,
    /// Per-record values are a broadcast aggregate, not real per-record scores.
    pub constant_fill: bool,
}

impl NormalizedResult {
    fn from_scores(
        record_count: usize,
        scores: BTreeMap<Metric, Vec<Option<f64>>>,
        extraction: ExtractionMethod,
        constant_fill: bool,
    ) -> Self {
        let mut means = BTreeMap::new();
        let mut failed_metrics = BTreeSet::new();
        for (metric, values) in &scores {
            match mean_of_present(values) {
                Some(mean) => {
                    means.insert(*metric, mean);
                }
                None => {
                    means.insert(*metric, 0.0);
                    failed_metrics.insert(*metric);
                }
            }
        }
        Self {
            record_count,
            scores,
            means,
            failed_metrics,
            extraction,
            constant_fill,
        }
    }

    /// Every metric missing for every record.
    pub fn all_missing(record_count: usize, metrics: &MetricSet) -> Self {
        let scores = metrics
            .iter()
            .map(|m| (*m, vec![None; record_count]))
            .collect();
        Self::from_scores(record_count, scores, ExtractionMethod::None, false)
    }

    /// A placeholder with the same score for every metric and record.
    pub fn synthetic(record_count: usize, metrics: &MetricSet, score: f64) -> Self {
        let scores = metrics
            .iter()
            .map(|m| (*m, vec![Some(score); record_count]))
            .collect();
        Self::from_scores(record_count, scores, ExtractionMethod::Synthetic, true)
    }

    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.scores.keys().copied()
    }

    pub fn missing_count(&self, metric: Metric) -> usize {
        self.scores
            .get(&metric)
            .map_or(0, |v| v.iter().filter(|s| s.is_none()).count())
    }

    /// Scores of one record keyed by metric identifier.
    pub fn record_scores(&self, index: usize) -> BTreeMap<String, Option<f64>> {
        self.scores
            .iter()
            .map(|(m, values)| (m.as_str().to_string(), values.get(index).copied().flatten()))
            .collect()
    }
}

#[derive(Debug)]
struct ExtractError(String);

/// Normalize a raw scorer result for `batch`.
pub fn normalize(
    raw: &RawResult,
    batch: &[EvaluationRecord],
    metrics: &MetricSet,
) -> NormalizedResult {
    let n = batch.len();
    let extracted = match raw {
        RawResult::Tabular(table) => extract_tabular(table, n, metrics)
            .map(|s| NormalizedResult::from_scores(n, s, ExtractionMethod::Tabular, false)),
        RawResult::ScoresByMetric(lists) => extract_scores(lists, n, metrics)
            .map(|s| NormalizedResult::from_scores(n, s, ExtractionMethod::ScoresByMetric, false)),
        RawResult::Attributes(attrs) => Ok(NormalizedResult::from_scores(
            n,
            extract_attributes(attrs, n, metrics),
            ExtractionMethod::Attributes,
            true,
        )),
        RawResult::Unrecognized(_) => Err(ExtractError("unrecognized result shape".into())),
    };

    let result = match extracted {
        Ok(result) => result,
        Err(ExtractError(reason)) => {
            warn!(
                kind = raw.kind(),
                reason = %reason,
                records = n,
                "No extraction strategy matched, marking all scores missing"
            );
            NormalizedResult::all_missing(n, metrics)
        }
    };

    for metric in result.metrics() {
        debug!(
            metric = %metric,
            missing = result.missing_count(metric),
            mean = result.means.get(&metric).copied().unwrap_or(0.0),
            "Normalized metric"
        );
    }
    info!(
        extraction = ?result.extraction,
        records = n,
        failed_metrics = result.failed_metrics.len(),
        constant_fill = result.constant_fill,
        "Normalized scorer result"
    );
    result
}

/// Map a raw value to a score, dropping NaN and out-of-range values.
fn sanitize(metric: Metric, value: f64) -> Option<f64> {
    if is_valid_score(value) {
        Some(value)
    } else {
        if !value.is_nan() {
            warn!(metric = %metric, value, "Score outside [0, 1] treated as missing");
        }
        None
    }
}

fn extract_tabular(
    table: &ResultTable,
    n: usize,
    metrics: &MetricSet,
) -> Result<BTreeMap<Metric, Vec<Option<f64>>>, ExtractError> {
    if table.row_count() != n {
        return Err(ExtractError(format!(
            "table has {} rows for {n} records",
            table.row_count()
        )));
    }
    Ok(metrics
        .iter()
        .map(|metric| {
            let values = match table.column(metric.as_str()) {
                Some(column) => column
                    .into_iter()
                    .map(|cell| cell.and_then(|v| sanitize(*metric, v)))
                    .collect(),
                None => {
                    warn!(metric = %metric, "Metric column absent from result table");
                    vec![None; n]
                }
            };
            (*metric, values)
        })
        .collect())
}

fn extract_scores(
    lists: &BTreeMap<String, Vec<f64>>,
    n: usize,
    metrics: &MetricSet,
) -> Result<BTreeMap<Metric, Vec<Option<f64>>>, ExtractError> {
    let mut out = BTreeMap::new();
    for metric in metrics {
        let values = match lists.get(metric.as_str()) {
            Some(list) if list.len() == n => {
                list.iter().map(|v| sanitize(*metric, *v)).collect()
            }
            Some(list) => {
                return Err(ExtractError(format!(
                    "{metric} has {} scores for {n} records",
                    list.len()
                )));
            }
            None => {
                warn!(metric = %metric, "Metric absent from score mapping");
                vec![None; n]
            }
        };
        out.insert(*metric, values);
    }
    Ok(out)
}

fn extract_attributes(
    attrs: &BTreeMap<String, f64>,
    n: usize,
    metrics: &MetricSet,
) -> BTreeMap<Metric, Vec<Option<f64>>> {
    warn!(
        records = n,
        "Only aggregate scores available, broadcasting one value per metric"
    );
    metrics
        .iter()
        .map(|metric| {
            let value = attrs
                .get(metric.as_str())
                .and_then(|v| sanitize(*metric, *v));
            (*metric, vec![value; n])
        })
        .collect()
}
