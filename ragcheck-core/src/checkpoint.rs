//! Checkpoint state and durable checkpoint stores.
//!
//! A [`CheckpointState`] is written after every chunk. The file store keeps two
//! independent encodings of each write (checksummed JSON and a YAML backup) so
//! a corrupt primary can still be recovered on resume.

use crate::error::CheckpointError;
use crate::metrics::RunningAggregate;
use crate::persistence::{read_checksummed_json, read_yaml, write_checksummed_json, write_yaml};
use crate::report::EvaluationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle of an evaluation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Started => write!(f, "started"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Scores for one dataset record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
    /// Position of the record in the dataset.
    pub index: usize,
    /// Metric id -> score; `None` is a missing score.
    pub scores: BTreeMap<String, Option<f64>>,
    /// Placeholder scores from a synthesized result.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordResult {
    /// Counts toward a session's error count.
    pub fn is_error(&self) -> bool {
        self.synthetic || self.error.is_some()
    }
}

/// Persisted progress of one evaluation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub session_id: String,
    pub dataset_name: String,
    pub dataset_size: usize,
    /// Effective configuration the session was started with.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    pub status: SessionStatus,
    pub completed_items: usize,
    pub individual_results: Vec<RecordResult>,
    pub partial_metrics: BTreeMap<String, f64>,
    pub error_count: usize,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Exact per-metric running aggregates over non-synthetic results.
    #[serde(default)]
    pub aggregates: BTreeMap<String, RunningAggregate>,
    #[serde(default)]
    pub chunks_processed: usize,
    #[serde(default)]
    pub synthetic_chunks: usize,
    /// Strategy name -> number of chunks it scored.
    #[serde(default)]
    pub strategies_used: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<EvaluationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<EvaluationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// What one chunk contributed to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub results: Vec<RecordResult>,
    pub strategy: String,
    pub synthetic: bool,
}

impl CheckpointState {
    pub fn new(
        session_id: impl Into<String>,
        dataset_name: impl Into<String>,
        dataset_size: usize,
        config: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            dataset_name: dataset_name.into(),
            dataset_size,
            config,
            status: SessionStatus::Started,
            completed_items: 0,
            individual_results: Vec::new(),
            partial_metrics: BTreeMap::new(),
            error_count: 0,
            start_time: now,
            last_update: now,
            aggregates: BTreeMap::new(),
            chunks_processed: 0,
            synthetic_chunks: 0,
            strategies_used: BTreeMap::new(),
            final_result: None,
            partial_result: None,
            failure: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    pub fn remaining_items(&self) -> usize {
        self.dataset_size.saturating_sub(self.completed_items)
    }

    /// Append a chunk's results and refresh the derived counters.
    ///
    /// `window` bounds partial metrics to the most recent `n` results; `None`
    /// reports the exact running mean.
    pub fn record_chunk(&mut self, chunk: ChunkRecord, window: Option<usize>) {
        for result in &chunk.results {
            for (metric, score) in &result.scores {
                let agg = self.aggregates.entry(metric.clone()).or_default();
                if !result.synthetic {
                    agg.push(*score);
                }
            }
        }
        self.completed_items += chunk.results.len();
        self.error_count += chunk.results.iter().filter(|r| r.is_error()).count();
        self.chunks_processed += 1;
        if chunk.synthetic {
            self.synthetic_chunks += 1;
        }
        *self.strategies_used.entry(chunk.strategy).or_insert(0) += 1;
        self.individual_results.extend(chunk.results);
        self.recompute_partial_metrics(window);
        self.touch();
    }

    pub fn recompute_partial_metrics(&mut self, window: Option<usize>) {
        self.partial_metrics = match window {
            None => self
                .aggregates
                .iter()
                .map(|(metric, agg)| (metric.clone(), agg.mean_or_zero()))
                .collect(),
            Some(n) => {
                let start = self.individual_results.len().saturating_sub(n.max(1));
                let mut windowed: BTreeMap<String, RunningAggregate> = self
                    .aggregates
                    .keys()
                    .map(|k| (k.clone(), RunningAggregate::default()))
                    .collect();
                for result in self.individual_results[start..].iter().filter(|r| !r.synthetic) {
                    for (metric, score) in &result.scores {
                        windowed.entry(metric.clone()).or_default().push(*score);
                    }
                }
                windowed
                    .into_iter()
                    .map(|(metric, agg)| (metric, agg.mean_or_zero()))
                    .collect()
            }
        };
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            dataset_name: self.dataset_name.clone(),
            status: self.status,
            completed_items: self.completed_items,
            dataset_size: self.dataset_size,
            error_count: self.error_count,
            last_update: self.last_update,
        }
    }
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub dataset_name: String,
    pub status: SessionStatus,
    pub completed_items: usize,
    pub dataset_size: usize,
    pub error_count: usize,
    pub last_update: DateTime<Utc>,
}

/// Durable storage for checkpoint states.
pub trait CheckpointStore: Send + Sync {
    fn write(&self, session_id: &str, state: &CheckpointState) -> Result<(), CheckpointError>;

    /// Load a session, or [`CheckpointError::NotFound`].
    fn read(&self, session_id: &str) -> Result<CheckpointState, CheckpointError>;

    /// Stored sessions, most recently updated first.
    fn list_sessions(&self) -> Result<Vec<SessionSummary>, CheckpointError>;

    fn delete(&self, session_id: &str) -> Result<(), CheckpointError>;
}

fn not_found(session_id: &str) -> CheckpointError {
    CheckpointError::NotFound {
        session_id: session_id.to_string(),
    }
}

fn sort_summaries(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| {
        b.last_update
            .cmp(&a.last_update)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
}

const PRIMARY_EXT: &str = ".json";
const BACKUP_EXT: &str = ".backup.yaml";

/// Stores each session as `<id>.json` (checksummed) plus `<id>.backup.yaml`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, session_id: &str) -> Result<(PathBuf, PathBuf), CheckpointError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CheckpointError::Unavailable {
                message: format!("invalid session id '{session_id}'"),
            });
        }
        Ok((
            self.dir.join(format!("{session_id}{PRIMARY_EXT}")),
            self.dir.join(format!("{session_id}{BACKUP_EXT}")),
        ))
    }

    fn stored_ids(&self) -> Result<BTreeSet<String>, CheckpointError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        let mut ids = BTreeSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let id = name
                .strip_suffix(BACKUP_EXT)
                .or_else(|| name.strip_suffix(PRIMARY_EXT));
            if let Some(id) = id {
                ids.insert(id.to_string());
            }
        }
        Ok(ids)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn write(&self, session_id: &str, state: &CheckpointState) -> Result<(), CheckpointError> {
        let (primary, backup) = self.paths(session_id)?;
        write_checksummed_json(&primary, state)?;
        write_yaml(&backup, state)?;
        debug!(
            session_id,
            status = %state.status,
            completed_items = state.completed_items,
            "Checkpoint written"
        );
        Ok(())
    }

    fn read(&self, session_id: &str) -> Result<CheckpointState, CheckpointError> {
        let (primary, backup) = self.paths(session_id)?;
        match read_checksummed_json::<CheckpointState>(&primary) {
            Ok(Some(state)) => return Ok(state),
            Ok(None) => {}
            Err(e) => warn!(session_id, error = %e, "Primary checkpoint unreadable, trying backup"),
        }
        match read_yaml::<CheckpointState>(&backup) {
            Ok(Some(state)) => {
                info!(session_id, "Recovered checkpoint from backup");
                Ok(state)
            }
            Ok(None) => Err(not_found(session_id)),
            Err(e) => {
                warn!(session_id, error = %e, "Backup checkpoint unreadable");
                Err(not_found(session_id))
            }
        }
    }

    fn list_sessions(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        let mut summaries = Vec::new();
        for id in self.stored_ids()? {
            match self.read(&id) {
                Ok(state) => summaries.push(state.summary()),
                Err(e) => warn!(session_id = %id, error = %e, "Skipping unreadable session"),
            }
        }
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    fn delete(&self, session_id: &str) -> Result<(), CheckpointError> {
        let (primary, backup) = self.paths(session_id)?;
        let mut removed = false;
        for path in [primary, backup] {
            match std::fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(CheckpointError::Write { path, source }),
            }
        }
        if removed {
            info!(session_id, "Session deleted");
            Ok(())
        } else {
            Err(not_found(session_id))
        }
    }
}

/// In-memory store that keeps a history of every write.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    sessions: Mutex<HashMap<String, CheckpointState>>,
    history: Mutex<Vec<(SessionStatus, usize)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// `(status, completed_items)` of every write, in order.
    pub fn write_history(&self) -> Vec<(SessionStatus, usize)> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn write(&self, session_id: &str, state: &CheckpointState) -> Result<(), CheckpointError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), state.clone());
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((state.status, state.completed_items));
        Ok(())
    }

    fn read(&self, session_id: &str) -> Result<CheckpointState, CheckpointError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
            .ok_or_else(|| not_found(session_id))
    }

    fn list_sessions(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(CheckpointState::summary)
            .collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    fn delete(&self, session_id: &str) -> Result<(), CheckpointError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| not_found(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn result(index: usize, score: Option<f64>) -> RecordResult {
        RecordResult {
            index,
            scores: BTreeMap::from([("faithfulness".to_string(), score)]),
            synthetic: false,
            strategy: "standard".into(),
            error: None,
        }
    }

    fn chunk(results: Vec<RecordResult>) -> ChunkRecord {
        ChunkRecord {
            results,
            strategy: "standard".into(),
            synthetic: false,
        }
    }

    fn state(id: &str) -> CheckpointState {
        let mut state = CheckpointState::new(id, "golden", 3, BTreeMap::new());
        state.record_chunk(chunk(vec![result(0, Some(0.6)), result(1, None)]), None);
        state
    }

    #[test]
    fn test_record_chunk_updates_counters() {
        let mut state = state("s1");
        assert_eq!(state.completed_items, 2);
        assert_eq!(state.remaining_items(), 1);
        assert_eq!(state.chunks_processed, 1);
        assert_eq!(state.partial_metrics["faithfulness"], 0.6);

        let mut synthetic = result(2, Some(0.5));
        synthetic.synthetic = true;
        state.record_chunk(
            ChunkRecord {
                results: vec![synthetic],
                strategy: "synthetic".into(),
                synthetic: true,
            },
            None,
        );
        assert_eq!(state.error_count, 1);
        assert_eq!(state.synthetic_chunks, 1);
        // Placeholder scores stay out of the aggregate
        assert_eq!(state.aggregates["faithfulness"].count, 1);
        assert_eq!(state.strategies_used["synthetic"], 1);
    }

    #[test]
    fn test_partial_metrics_window() {
        let mut state = CheckpointState::new("w", "golden", 4, BTreeMap::new());
        state.record_chunk(
            chunk(vec![
                result(0, Some(0.2)),
                result(1, Some(0.4)),
                result(2, Some(0.8)),
                result(3, Some(1.0)),
            ]),
            Some(2),
        );
        assert!((state.partial_metrics["faithfulness"] - 0.9).abs() < 1e-12);
        state.recompute_partial_metrics(None);
        assert!((state.partial_metrics["faithfulness"] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_file_store_roundtrip_and_list() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let first = state("first");
        store.write("first", &first).unwrap();
        let mut second = state("second");
        second.last_update = first.last_update + chrono::Duration::seconds(5);
        store.write("second", &second).unwrap();

        assert_eq!(store.read("first").unwrap(), first);
        let listed: Vec<String> = store
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(listed, vec!["second".to_string(), "first".to_string()]);
    }

    #[test]
    fn test_corrupt_primary_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let original = state("s1");
        store.write("s1", &original).unwrap();
        std::fs::write(dir.path().join("s1.json"), "sha256:00\n{ truncated").unwrap();

        assert_eq!(store.read("s1").unwrap(), original);
    }

    #[test]
    fn test_both_encodings_corrupt_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.write("s1", &state("s1")).unwrap();
        std::fs::write(dir.path().join("s1.json"), "garbage").unwrap();
        std::fs::write(dir.path().join("s1.backup.yaml"), ": : :").unwrap();

        assert!(matches!(
            store.read("s1"),
            Err(CheckpointError::NotFound { .. })
        ));
    }

    #[test]
    fn test_file_store_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.write("s1", &state("s1")).unwrap();
        store.delete("s1").unwrap();
        assert!(matches!(store.read("s1"), Err(CheckpointError::NotFound { .. })));
        assert!(matches!(store.delete("s1"), Err(CheckpointError::NotFound { .. })));
        assert!(store.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_session_id_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.write("../escape", &state("x")).is_err());
        assert!(store.read("").is_err());
    }

    #[test]
    fn test_memory_store_history() {
        let store = MemoryCheckpointStore::new();
        let mut s = state("m");
        store.write("m", &s).unwrap();
        s.status = SessionStatus::Completed;
        store.write("m", &s).unwrap();
        assert_eq!(store.write_count(), 2);
        assert_eq!(
            store.write_history(),
            vec![(SessionStatus::Started, 2), (SessionStatus::Completed, 2)]
        );
        assert_eq!(store.read("m").unwrap().status, SessionStatus::Completed);
        store.delete("m").unwrap();
        assert!(store.list_sessions().unwrap().is_empty());
    }
}
