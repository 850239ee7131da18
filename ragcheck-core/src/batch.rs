//! Checkpointed batch evaluation.
//!
//! [`BatchManager`] splits a dataset into fixed-size chunks, scores each chunk
//! through an [`EvaluationContext`], and persists a [`CheckpointState`] after
//! every chunk. A crash loses at most the chunk in flight; a resumed session
//! continues from `completed_items`.
//!
//! Scoring problems never abort a session: they become missing scores,
//! placeholder results and error counts. Only a checkpoint store failure is
//! returned to the caller, after the session has been marked failed.

use crate::checkpoint::{
    CheckpointState, CheckpointStore, ChunkRecord, RecordResult, SessionStatus, SessionSummary,
};
use crate::config::{BatchConfig, EvalConfig};
use crate::error::{CheckpointError, ConfigError, RagCheckError};
use crate::metrics::MetricSet;
use crate::normalizer::ExtractionMethod;
use crate::orchestrator::{EvaluationContext, EvaluationOutcome, ResultSource};
use crate::pacing::{ChunkPacer, Sleeper, TokioSleeper};
use crate::record::{Dataset, EvaluationRecord, validate_batch};
use crate::report::EvaluationReport;
use crate::resource_guard::{MemoryPressure, MemoryProbe, ResourceGuard};
use chrono::Utc;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Strategy name recorded for records of a chunk that could not be scored.
const MALFORMED_STRATEGY: &str = "error";

/// Error recorded for a record whose reply carried no usable score.
const UNSCORED_MESSAGE: &str = "scorer returned no usable score for this record";

/// Result of scoring one chunk, before it is merged into the session.
#[derive(Debug)]
struct ChunkOutcome {
    record: ChunkRecord,
    /// Slow down before the next chunk.
    had_error: bool,
}

impl ChunkOutcome {
    fn from_evaluation(outcome: EvaluationOutcome, start_index: usize) -> Self {
        let unreadable = outcome.result.extraction == ExtractionMethod::None;
        let results: Vec<RecordResult> = (0..outcome.result.record_count)
            .map(|i| {
                let scores = outcome.result.record_scores(i);
                let unscored = !outcome.is_synthetic
                    && (unreadable || scores.values().all(Option::is_none));
                RecordResult {
                    index: start_index + i,
                    scores,
                    synthetic: outcome.is_synthetic,
                    strategy: outcome.strategy.clone(),
                    error: unscored.then(|| UNSCORED_MESSAGE.to_string()),
                }
            })
            .collect();
        let had_error = outcome.source != ResultSource::Primary
            || results.iter().any(|r| r.error.is_some());
        if unreadable {
            warn!(
                start_index,
                records = results.len(),
                strategy = %outcome.strategy,
                "Scorer reply could not be read, recording chunk as failed"
            );
        }
        Self {
            record: ChunkRecord {
                results,
                strategy: outcome.strategy,
                synthetic: outcome.is_synthetic,
            },
            had_error,
        }
    }

    fn malformed(len: usize, start_index: usize, metrics: &MetricSet, message: &str) -> Self {
        let scores: BTreeMap<String, Option<f64>> = metrics
            .iter()
            .map(|m| (m.as_str().to_string(), None))
            .collect();
        let results = (0..len)
            .map(|i| RecordResult {
                index: start_index + i,
                scores: scores.clone(),
                synthetic: false,
                strategy: MALFORMED_STRATEGY.to_string(),
                error: Some(message.to_string()),
            })
            .collect();
        Self {
            record: ChunkRecord {
                results,
                strategy: MALFORMED_STRATEGY.to_string(),
                synthetic: false,
            },
            had_error: true,
        }
    }
}

/// Decode one section of a session's config snapshot.
fn restore_section<T: DeserializeOwned>(state: &CheckpointState, key: &str) -> Option<T> {
    let value = state.config.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(section) => Some(section),
        Err(err) => {
            warn!(
                session_id = %state.session_id,
                section = key,
                error = %err,
                "Stored session settings unreadable, using current configuration"
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs sessions against a checkpoint store.
pub struct BatchManager {
    store: Arc<dyn CheckpointStore>,
    guard: ResourceGuard,
    sleeper: Arc<dyn Sleeper>,
    config: EvalConfig,
    reclaims: AtomicUsize,
}

impl BatchManager {
    pub fn new(store: Arc<dyn CheckpointStore>, config: EvalConfig) -> Self {
        Self {
            store,
            guard: ResourceGuard::from_config(&config.resources),
            sleeper: Arc::new(TokioSleeper),
            config,
            reclaims: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.guard = self.guard.with_probe(probe);
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Number of times memory pressure triggered buffer reclamation.
    pub fn reclaim_count(&self) -> usize {
        self.reclaims.load(Ordering::Relaxed)
    }

    /// Evaluate `dataset` in a new session.
    ///
    /// Returns the final report, or the checkpoint error that stopped the
    /// session after it was marked failed.
    pub async fn evaluate_with_checkpoints(
        &self,
        dataset: &Dataset,
        ctx: &EvaluationContext,
    ) -> Result<EvaluationReport, CheckpointError> {
        let session_id = Uuid::new_v4().to_string();
        let mut state = CheckpointState::new(
            &session_id,
            &dataset.name,
            dataset.len(),
            self.config_snapshot(ctx),
        );
        if let Err(err) = self.persist(&state) {
            error!(session_id = %session_id, error = %err, "Could not create session checkpoint");
            return Err(err);
        }
        info!(
            session_id = %session_id,
            dataset = %dataset.name,
            records = dataset.len(),
            chunk_size = self.chunk_size(),
            strategy = ctx.primary().name(),
            "Session started"
        );
        self.process(&mut state, &dataset.records, ctx, &self.config.batch)
            .await
    }

    /// Load a stored session as-is.
    ///
    /// Completed and failed sessions are returned for inspection; nothing is
    /// re-scored. Use [`continue_session`](Self::continue_session) to finish a
    /// started one.
    pub fn resume(&self, session_id: &str) -> Result<CheckpointState, CheckpointError> {
        let state = self.store.read(session_id)?;
        info!(
            session_id,
            status = %state.status,
            completed_items = state.completed_items,
            dataset_size = state.dataset_size,
            "Session loaded"
        );
        Ok(state)
    }

    /// Finish a stored session over the same dataset.
    ///
    /// A completed session returns its stored report without scoring. A
    /// started or failed session scores `dataset[completed_items..]` and
    /// appends to the existing results, using the strategy and batch settings
    /// the session was started with. `ctx` only contributes its scorer.
    pub async fn continue_session(
        &self,
        session_id: &str,
        dataset: &Dataset,
        ctx: &EvaluationContext,
    ) -> Result<EvaluationReport, RagCheckError> {
        let mut state = self.resume(session_id)?;
        if state.status == SessionStatus::Completed {
            return Ok(match state.final_result.take() {
                Some(report) => report,
                None => EvaluationReport::from_state(&state, &self.config.models, state.last_update),
            });
        }
        if dataset.len() != state.dataset_size {
            return Err(ConfigError::invalid(format!(
                "session {session_id} was started on {} records, dataset has {}",
                state.dataset_size,
                dataset.len()
            ))
            .into());
        }

        state.status = SessionStatus::Started;
        state.partial_result = None;
        state.failure = None;
        state.touch();
        self.persist(&state)?;

        let session_config = self.session_config(&state);
        let ctx = ctx.reconfigured(&session_config);
        let remaining = dataset.slice_from(state.completed_items);
        info!(
            session_id,
            completed_items = state.completed_items,
            remaining = remaining.len(),
            chunk_size = session_config.batch.chunk_size,
            strategy = ctx.primary().name(),
            "Continuing session"
        );
        Ok(self
            .process(&mut state, remaining, &ctx, &session_config.batch)
            .await?)
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        self.store.list_sessions()
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), CheckpointError> {
        self.store.delete(session_id)
    }

    fn chunk_size(&self) -> usize {
        self.config.batch.chunk_size.max(1)
    }

    fn config_snapshot(&self, ctx: &EvaluationContext) -> BTreeMap<String, serde_json::Value> {
        let mut snapshot: BTreeMap<String, serde_json::Value> =
            match serde_json::to_value(&self.config) {
                Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
                _ => BTreeMap::new(),
            };
        snapshot.insert("scorer_name".into(), ctx.scorer_name().into());
        snapshot.insert("primary_strategy".into(), ctx.primary().name().into());
        snapshot.insert("fallback_strategy".into(), ctx.fallback().name().into());
        snapshot
    }

    /// The manager's config with the session's stored `strategy` and `batch`
    /// sections restored.
    fn session_config(&self, state: &CheckpointState) -> EvalConfig {
        let mut config = self.config.clone();
        if let Some(strategy) = restore_section(state, "strategy") {
            config.strategy = strategy;
        }
        if let Some(batch) = restore_section(state, "batch") {
            config.batch = batch;
        }
        config
    }

    fn persist(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        self.store.write(&state.session_id, state)?;
        debug!(
            session_id = %state.session_id,
            status = %state.status,
            completed_items = state.completed_items,
            "Checkpoint persisted"
        );
        Ok(())
    }

    async fn process(
        &self,
        state: &mut CheckpointState,
        records: &[EvaluationRecord],
        ctx: &EvaluationContext,
        batch: &BatchConfig,
    ) -> Result<EvaluationReport, CheckpointError> {
        let result = match self.run_chunks(state, records, ctx, batch).await {
            Ok(()) => self.complete(state),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            self.fail(state, err);
        }
        result
    }

    async fn run_chunks(
        &self,
        state: &mut CheckpointState,
        records: &[EvaluationRecord],
        ctx: &EvaluationContext,
        batch: &BatchConfig,
    ) -> Result<(), CheckpointError> {
        let chunk_size = batch.chunk_size.max(1);
        let pacer = ChunkPacer::from_config(batch);
        let total_chunks = records.len().div_ceil(chunk_size);

        for (i, chunk) in records.chunks(chunk_size).enumerate() {
            self.check_resources(state, i);

            let start_index = state.completed_items;
            let outcome = self.score_chunk(chunk, start_index, ctx).await;
            let had_error = outcome.had_error;
            state.record_chunk(outcome.record, batch.partial_window);
            self.persist(state)?;

            info!(
                session_id = %state.session_id,
                chunk = i + 1,
                total_chunks,
                completed_items = state.completed_items,
                dataset_size = state.dataset_size,
                errors = state.error_count,
                "Chunk processed"
            );

            if i + 1 < total_chunks {
                let delay = pacer.delay_for(chunk.len(), had_error);
                debug!(delay_ms = delay.as_millis() as u64, had_error, "Pacing before next chunk");
                self.sleeper.sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn score_chunk(
        &self,
        chunk: &[EvaluationRecord],
        start_index: usize,
        ctx: &EvaluationContext,
    ) -> ChunkOutcome {
        let metrics = ctx.primary().metric_set();
        if let Err(err) = validate_batch(chunk, start_index) {
            warn!(
                start_index,
                records = chunk.len(),
                error = %err,
                "Malformed chunk, recording as failed"
            );
            return ChunkOutcome::malformed(chunk.len(), start_index, metrics, &err.to_string());
        }

        match AssertUnwindSafe(ctx.run_evaluation_with_timeout(chunk))
            .catch_unwind()
            .await
        {
            Ok(outcome) => ChunkOutcome::from_evaluation(outcome, start_index),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(start_index, error = %message, "Chunk evaluation panicked, recording as failed");
                ChunkOutcome::malformed(chunk.len(), start_index, metrics, &message)
            }
        }
    }

    fn check_resources(&self, state: &mut CheckpointState, chunk: usize) {
        match self.guard.check() {
            MemoryPressure::High(utilization) => {
                warn!(
                    session_id = %state.session_id,
                    chunk = chunk + 1,
                    utilization,
                    threshold = self.guard.max_memory_percent,
                    "Memory pressure high, reclaiming buffers"
                );
                state.individual_results.shrink_to_fit();
                self.reclaims.fetch_add(1, Ordering::Relaxed);
            }
            MemoryPressure::Normal(utilization) => {
                debug!(chunk = chunk + 1, utilization, "Memory check passed");
            }
            MemoryPressure::Unknown => {}
        }
    }

    fn complete(&self, state: &mut CheckpointState) -> Result<EvaluationReport, CheckpointError> {
        let report = EvaluationReport::from_state(state, &self.config.models, Utc::now());
        state.status = SessionStatus::Completed;
        state.final_result = Some(report.clone());
        state.touch();
        self.persist(state)?;
        info!(
            session_id = %state.session_id,
            records = report.metadata.total_records,
            errors = report.metadata.error_count,
            success_rate = report.metadata.success_rate,
            synthetic_chunks = report.metadata.synthetic_chunks,
            "Session completed"
        );
        Ok(report)
    }

    /// Mark the session failed and persist it if the store still accepts writes.
    fn fail(&self, state: &mut CheckpointState, err: &CheckpointError) {
        state.status = SessionStatus::Failed;
        state.final_result = None;
        state.partial_result = Some(EvaluationReport::from_state(
            state,
            &self.config.models,
            Utc::now(),
        ));
        state.failure = Some(err.to_string());
        state.touch();
        error!(
            session_id = %state.session_id,
            completed_items = state.completed_items,
            error = %err,
            "Session failed"
        );
        if let Err(persist_err) = self.persist(state) {
            error!(
                session_id = %state.session_id,
                error = %persist_err,
                "Could not persist failed session"
            );
        }
    }
}
