//! Raw scorer results and the JSON adapter that classifies them.

use serde_json::Value;
use std::collections::BTreeMap;

/// A scorer result in one of the encodings evaluation libraries produce.
///
/// Which variant a result is gets decided once, at the scorer boundary; the
/// normalizer only ever matches on the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    /// A table with one row per record and one column per metric.
    Tabular(ResultTable),
    /// Per-metric score lists. `NaN` marks a score that could not be computed.
    ScoresByMetric(BTreeMap<String, Vec<f64>>),
    /// One aggregate scalar per metric, with no per-record breakdown.
    Attributes(BTreeMap<String, f64>),
    /// A payload no extractor understands.
    Unrecognized(Value),
}

/// Row-major score table. `None` cells are table nulls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<f64>>>) -> Self {
        Self { columns, rows }
    }

    /// A table with the same score in every cell.
    pub fn constant(columns: &[&str], rows: usize, score: f64) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: vec![vec![Some(score); columns.len()]; rows],
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Read one column. Short rows yield nulls.
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).copied().flatten())
                .collect(),
        )
    }
}

impl RawResult {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RawResult::Tabular(_) => "tabular",
            RawResult::ScoresByMetric(_) => "scores_by_metric",
            RawResult::Attributes(_) => "attributes",
            RawResult::Unrecognized(_) => "unrecognized",
        }
    }

    /// Classify a JSON payload.
    ///
    /// Shapes are probed in order: a table (`{"columns", "rows"}` or an array of
    /// row objects), then a `{"scores": {metric: [..]}}` mapping, then an object
    /// carrying numeric fields. Anything else is `Unrecognized`.
    pub fn from_json(value: Value) -> Self {
        if let Some(table) = table_from_json(&value) {
            return RawResult::Tabular(table);
        }
        if let Some(scores) = scores_from_json(&value) {
            return RawResult::ScoresByMetric(scores);
        }
        if let Some(attrs) = attributes_from_json(&value) {
            return RawResult::Attributes(attrs);
        }
        RawResult::Unrecognized(value)
    }
}

fn cell(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn table_from_json(value: &Value) -> Option<ResultTable> {
    match value {
        Value::Object(obj) => {
            let columns = obj.get("columns")?.as_array()?;
            let rows = obj.get("rows")?.as_array()?;
            let columns: Vec<String> = columns
                .iter()
                .map(|c| c.as_str().map(str::to_string))
                .collect::<Option<_>>()?;
            let rows = rows
                .iter()
                .map(|row| row.as_array().map(|cells| cells.iter().map(cell).collect()))
                .collect::<Option<Vec<Vec<Option<f64>>>>>()?;
            Some(ResultTable { columns, rows })
        }
        // Records orientation: one object per row.
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            let mut columns: Vec<String> = Vec::new();
            for item in items {
                if let Value::Object(row) = item {
                    for (key, v) in row {
                        if v.is_number() && !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                }
            }
            if columns.is_empty() {
                return None;
            }
            let rows = items
                .iter()
                .map(|item| {
                    columns
                        .iter()
                        .map(|c| item.get(c).and_then(cell))
                        .collect()
                })
                .collect();
            Some(ResultTable { columns, rows })
        }
        _ => None,
    }
}

fn scores_from_json(value: &Value) -> Option<BTreeMap<String, Vec<f64>>> {
    let scores = value.get("scores")?.as_object()?;
    let mut out = BTreeMap::new();
    // Non-list entries are metadata, not metrics
    for (metric, list) in scores {
        let Some(list) = list.as_array() else {
            continue;
        };
        out.insert(
            metric.clone(),
            list.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect(),
        );
    }
    Some(out)
}

fn attributes_from_json(value: &Value) -> Option<BTreeMap<String, f64>> {
    let obj = value.as_object()?;
    let attrs: BTreeMap<String, f64> = obj
        .iter()
        .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
        .collect();
    if attrs.is_empty() { None } else { Some(attrs) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_columns_rows() {
        let raw = RawResult::from_json(json!({
            "columns": ["faithfulness", "context_recall"],
            "rows": [[0.9, null], [0.7, 0.5]]
        }));
        let RawResult::Tabular(table) = raw else {
            panic!("expected tabular");
        };
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column("context_recall").unwrap(), vec![None, Some(0.5)]);
        assert!(table.column("answer_relevancy").is_none());
    }

    #[test]
    fn test_from_json_records_orientation() {
        let raw = RawResult::from_json(json!([
            {"question": "q1", "faithfulness": 1.0},
            {"question": "q2", "faithfulness": null}
        ]));
        let RawResult::Tabular(table) = raw else {
            panic!("expected tabular");
        };
        assert_eq!(table.columns, vec!["faithfulness"]);
        assert_eq!(table.column("faithfulness").unwrap(), vec![Some(1.0), None]);
    }

    #[test]
    fn test_from_json_scores_by_metric() {
        let raw = RawResult::from_json(json!({
            "scores": {"answer_relevancy": [0.8, null, "n/a"]}
        }));
        let RawResult::ScoresByMetric(scores) = raw else {
            panic!("expected scores");
        };
        let list = &scores["answer_relevancy"];
        assert_eq!(list[0], 0.8);
        assert!(list[1].is_nan());
        assert!(list[2].is_nan());
    }

    #[test]
    fn test_from_json_scores_skip_non_list_entries() {
        let raw = RawResult::from_json(json!({
            "scores": {"faithfulness": [1.0, 0.5], "meta": "x", "judge": {"model": "m"}}
        }));
        let RawResult::ScoresByMetric(scores) = raw else {
            panic!("expected scores");
        };
        assert_eq!(scores.len(), 1);
        assert_eq!(scores["faithfulness"], vec![1.0, 0.5]);
    }

    #[test]
    fn test_from_json_attributes() {
        let raw = RawResult::from_json(json!({"faithfulness": 0.75, "model": "judge"}));
        assert_eq!(raw.kind(), "attributes");
        let RawResult::Attributes(attrs) = raw else {
            panic!("expected attributes");
        };
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs["faithfulness"], 0.75);
    }

    #[test]
    fn test_from_json_unrecognized() {
        assert_eq!(RawResult::from_json(json!("done")).kind(), "unrecognized");
        assert_eq!(
            RawResult::from_json(json!({"status": "ok"})).kind(),
            "unrecognized"
        );
        assert_eq!(RawResult::from_json(json!([])).kind(), "unrecognized");
    }

    #[test]
    fn test_constant_table() {
        let table = ResultTable::constant(&["a", "b"], 3, 0.4);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.column("b").unwrap(), vec![Some(0.4); 3]);
    }
}
