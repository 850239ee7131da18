//! End-to-end tests for orchestration, checkpointing and resume.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::time::Instant;

use ragcheck_core::{
    BatchManager, CheckpointError, CheckpointState, CheckpointStore, Dataset, EvalConfig,
    EvaluationContext, EvaluationRecord, FileCheckpointStore, MemoryCheckpointStore, Metric,
    MockResponse, MockScorer, RawResult, ResultSource, ResultTable, SessionStatus,
    SessionSummary,
};

fn dataset(n: usize) -> Dataset {
    Dataset::new(
        "golden",
        (0..n)
            .map(|i| {
                EvaluationRecord::new(
                    format!("q{i}"),
                    [format!("context {i}")],
                    format!("answer {i}"),
                    format!("reference {i}"),
                )
            })
            .collect(),
    )
}

fn config(chunk_size: usize) -> EvalConfig {
    let mut config = EvalConfig::default();
    config.batch.chunk_size = chunk_size;
    config
}

fn context(scorer: Arc<MockScorer>, config: &EvalConfig) -> EvaluationContext {
    EvaluationContext::from_config(scorer, config)
}

/// A store that rejects the writes selected by `fails` (1-based write number).
struct FlakyStore {
    inner: Arc<MemoryCheckpointStore>,
    writes: AtomicUsize,
    fails: Box<dyn Fn(usize) -> bool + Send + Sync>,
}

impl FlakyStore {
    fn new(
        inner: Arc<MemoryCheckpointStore>,
        fails: impl Fn(usize) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            fails: Box::new(fails),
        }
    }
}

impl CheckpointStore for FlakyStore {
    fn write(&self, session_id: &str, state: &CheckpointState) -> Result<(), CheckpointError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if (self.fails)(n) {
            return Err(CheckpointError::Unavailable {
                message: format!("disk full on write {n}"),
            });
        }
        self.inner.write(session_id, state)
    }

    fn read(&self, session_id: &str) -> Result<CheckpointState, CheckpointError> {
        self.inner.read(session_id)
    }

    fn list_sessions(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        self.inner.list_sessions()
    }

    fn delete(&self, session_id: &str) -> Result<(), CheckpointError> {
        self.inner.delete(session_id)
    }
}

fn only_session(store: &MemoryCheckpointStore) -> String {
    let sessions = store.list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    sessions[0].session_id.clone()
}

// --- Orchestrator scenarios ---

#[tokio::test(start_paused = true)]
async fn well_formed_table_succeeds_via_primary() {
    let table = ResultTable::new(
        vec![
            "faithfulness".into(),
            "answer_relevancy".into(),
            "context_recall".into(),
            "context_precision".into(),
        ],
        vec![
            vec![Some(0.9), Some(0.8), Some(1.0), Some(0.5)],
            vec![Some(0.7), Some(0.6), Some(0.5), Some(0.25)],
        ],
    );
    let cfg = config(10);
    let scorer = Arc::new(MockScorer::new(MockResponse::Raw(RawResult::Tabular(table))));
    let ctx = context(scorer, &cfg);

    let outcome = ctx.run_evaluation_with_timeout(&dataset(2).records).await;
    assert_eq!(outcome.source, ResultSource::Primary);
    assert!(!outcome.is_synthetic);
    assert!((outcome.result.means[&Metric::Faithfulness] - 0.8).abs() < 1e-12);
    assert!((outcome.result.means[&Metric::AnswerRelevancy] - 0.7).abs() < 1e-12);
    assert!((outcome.result.means[&Metric::ContextRecall] - 0.75).abs() < 1e-12);
    assert!((outcome.result.means[&Metric::ContextPrecision] - 0.375).abs() < 1e-12);
    assert!(outcome.result.failed_metrics.is_empty());

    // Same numbers through the batch manager
    let store = Arc::new(MemoryCheckpointStore::new());
    let manager = BatchManager::new(store, cfg);
    let report = manager
        .evaluate_with_checkpoints(&dataset(2), &ctx)
        .await
        .unwrap();
    assert!((report.metrics["faithfulness"] - 0.8).abs() < 1e-12);
    assert!((report.metrics["answer_relevancy"] - 0.7).abs() < 1e-12);
    assert_eq!(report.metadata.success_rate, 1.0);
}

#[tokio::test(start_paused = true)]
async fn primary_timeout_falls_back_to_reduced_metric_set() {
    let cfg = config(10);
    let scorer = Arc::new(MockScorer::constant(0.6));
    scorer.queue_response(MockResponse::Delayed(
        Duration::from_secs(400),
        Box::new(MockResponse::Constant(0.9)),
    ));
    let ctx = context(scorer.clone(), &cfg);

    let start = Instant::now();
    let outcome = ctx.run_evaluation_with_timeout(&dataset(3).records).await;
    assert_eq!(outcome.source, ResultSource::Fallback);
    assert_eq!(outcome.strategy, "fallback");
    assert_eq!(
        outcome.result.metrics().collect::<Vec<_>>(),
        ctx.fallback().metric_set().iter().copied().collect::<Vec<_>>()
    );
    assert!(!outcome.result.scores.contains_key(&Metric::Faithfulness));
    assert_eq!(outcome.result.scores[&Metric::AnswerRelevancy], vec![Some(0.6); 3]);
    assert!(start.elapsed() >= Duration::from_secs(300));
    assert!(start.elapsed() < Duration::from_secs(301));
    assert_eq!(scorer.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn both_timeouts_synthesize_placeholder() {
    let cfg = config(10);
    let ctx = context(Arc::new(MockScorer::new(MockResponse::Hang)), &cfg);

    let outcome = ctx.run_evaluation_with_timeout(&dataset(4).records).await;
    assert!(outcome.is_synthetic);
    assert_eq!(outcome.source, ResultSource::Synthetic);
    assert_eq!(outcome.result.record_count, 4);
    for values in outcome.result.scores.values() {
        assert_eq!(values, &vec![Some(0.5); 4]);
    }
    assert_eq!(outcome.attempts.len(), 2);
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Success,
    Timeout,
    Error,
}

impl Behaviour {
    fn response(self) -> MockResponse {
        match self {
            Behaviour::Success => MockResponse::Constant(0.9),
            Behaviour::Timeout => MockResponse::Hang,
            Behaviour::Error => MockResponse::Error("judge returned 503".into()),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn orchestrator_always_terminates_with_a_result() {
    let all = [Behaviour::Success, Behaviour::Timeout, Behaviour::Error];
    let cfg = config(10);
    let bound = Duration::from_secs(300 + 150) + Duration::from_millis(100);

    for primary in all {
        for fallback in all {
            let scorer = Arc::new(MockScorer::new(MockResponse::Hang));
            scorer.queue_response(primary.response());
            scorer.queue_response(fallback.response());
            let ctx = context(scorer, &cfg);

            let start = Instant::now();
            let outcome = ctx.run_evaluation_with_timeout(&dataset(3).records).await;
            assert!(
                start.elapsed() <= bound,
                "{primary:?}/{fallback:?} took {:?}",
                start.elapsed()
            );
            assert_eq!(outcome.result.record_count, 3);

            let expected = match (primary, fallback) {
                (Behaviour::Success, _) => ResultSource::Primary,
                (_, Behaviour::Success) => ResultSource::Fallback,
                _ => ResultSource::Synthetic,
            };
            assert_eq!(outcome.source, expected, "{primary:?}/{fallback:?}");
            assert_eq!(outcome.is_synthetic, expected == ResultSource::Synthetic);
        }
    }
}

// --- Batch manager scenarios ---

#[tokio::test(start_paused = true)]
async fn twenty_five_records_in_chunks_of_ten() {
    let cfg = config(10);
    let scorer = Arc::new(MockScorer::constant(0.8));
    let store = Arc::new(MemoryCheckpointStore::new());
    let manager = BatchManager::new(store.clone(), cfg.clone());
    let ctx = context(scorer.clone(), &cfg);

    let report = manager
        .evaluate_with_checkpoints(&dataset(25), &ctx)
        .await
        .unwrap();

    let chunk_writes: Vec<usize> = store
        .write_history()
        .into_iter()
        .filter(|(status, items)| *status == SessionStatus::Started && *items > 0)
        .map(|(_, items)| items)
        .collect();
    assert_eq!(chunk_writes, vec![10, 20, 25]);
    assert_eq!(
        scorer
            .scored_batches()
            .iter()
            .map(Vec::len)
            .collect::<Vec<_>>(),
        vec![10, 10, 5]
    );

    assert_eq!(report.individual_results.len(), 25);
    let indices: Vec<usize> = report.individual_results.iter().map(|r| r.index).collect();
    assert_eq!(indices, (0..25).collect::<Vec<_>>());
    assert_eq!(report.metadata.total_records, 25);
    assert_eq!(report.metadata.strategies, BTreeMap::from([("standard".to_string(), 3)]));

    let state = manager.resume(&report.session_id).unwrap();
    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.completed_items, 25);
    assert_eq!(state.chunks_processed, 3);
}

#[tokio::test(start_paused = true)]
async fn completed_session_resumes_without_scoring() {
    let dir = TempDir::new().unwrap();
    let cfg = config(4);
    let data = dataset(9);

    let first = BatchManager::new(Arc::new(FileCheckpointStore::new(dir.path())), cfg.clone());
    let report = first
        .evaluate_with_checkpoints(&data, &context(Arc::new(MockScorer::constant(0.75)), &cfg))
        .await
        .unwrap();

    let scorer = Arc::new(MockScorer::constant(0.1));
    let second = BatchManager::new(Arc::new(FileCheckpointStore::new(dir.path())), cfg.clone());
    let resumed = second
        .continue_session(&report.session_id, &data, &context(scorer.clone(), &cfg))
        .await
        .unwrap();
    assert_eq!(resumed, report);
    assert_eq!(scorer.call_count(), 0);

    let state = second.resume(&report.session_id).unwrap();
    assert_eq!(state.final_result, Some(report.clone()));

    // Still recoverable when the primary encoding is damaged
    std::fs::write(
        dir.path().join(format!("{}.json", report.session_id)),
        "sha256:deadbeef\n{}",
    )
    .unwrap();
    let recovered = second.resume(&report.session_id).unwrap();
    assert_eq!(recovered.final_result, Some(report));
}

#[tokio::test(start_paused = true)]
async fn crash_before_persist_reprocesses_only_the_lost_chunk() {
    let cfg = config(10);
    let data = dataset(25);
    let inner = Arc::new(MemoryCheckpointStore::new());

    // Write 1 creates the session, write 2 persists chunk 1; chunk 2 is lost.
    let crashing = BatchManager::new(Arc::new(FlakyStore::new(inner.clone(), |n| n > 2)), cfg.clone());
    let first_scorer = Arc::new(MockScorer::constant(0.7));
    let err = crashing
        .evaluate_with_checkpoints(&data, &context(first_scorer.clone(), &cfg))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckpointError::Unavailable { .. }));
    assert_eq!(first_scorer.scored_batches().len(), 2);

    let session_id = only_session(&inner);
    let stored = inner.read(&session_id).unwrap();
    assert_eq!(stored.status, SessionStatus::Started);
    assert_eq!(stored.completed_items, 10);

    let scorer = Arc::new(MockScorer::constant(0.7));
    let manager = BatchManager::new(inner.clone(), cfg.clone());
    let report = manager
        .continue_session(&session_id, &data, &context(scorer.clone(), &cfg))
        .await
        .unwrap();

    let batches = scorer.scored_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].first().map(String::as_str), Some("q10"));
    assert_eq!(batches[1].last().map(String::as_str), Some("q24"));
    let indices: Vec<usize> = report.individual_results.iter().map(|r| r.index).collect();
    assert_eq!(indices, (0..25).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn durability_failure_marks_session_failed_with_partial_result() {
    let cfg = config(10);
    let data = dataset(25);
    let inner = Arc::new(MemoryCheckpointStore::new());

    // Only the write after chunk 2 fails; the failure record itself is stored.
    let manager = BatchManager::new(Arc::new(FlakyStore::new(inner.clone(), |n| n == 3)), cfg.clone());
    let err = manager
        .evaluate_with_checkpoints(&data, &context(Arc::new(MockScorer::constant(0.9)), &cfg))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("disk full"));

    let session_id = only_session(&inner);
    let state = inner.read(&session_id).unwrap();
    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.failure.as_deref().unwrap().contains("disk full"));
    let partial = state.partial_result.as_ref().unwrap();
    assert_eq!(partial.individual_results.len(), 20);
    assert!(state.final_result.is_none());

    // A failed session can be finished explicitly
    let scorer = Arc::new(MockScorer::constant(0.9));
    let healthy = BatchManager::new(inner.clone(), cfg.clone());
    let report = healthy
        .continue_session(&session_id, &data, &context(scorer.clone(), &cfg))
        .await
        .unwrap();
    assert_eq!(scorer.scored_batches(), vec![(20..25).map(|i| format!("q{i}")).collect::<Vec<_>>()]);
    assert_eq!(report.individual_results.len(), 25);
    assert_eq!(
        healthy.resume(&session_id).unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn partial_metrics_follow_configured_window() {
    let mut cfg = config(2);
    cfg.batch.partial_window = Some(2);
    let scorer = Arc::new(MockScorer::constant(0.2));
    scorer.queue_response(MockResponse::Constant(0.2));
    scorer.queue_response(MockResponse::Constant(1.0));
    let store = Arc::new(MemoryCheckpointStore::new());
    let manager = BatchManager::new(store.clone(), cfg.clone());

    let report = manager
        .evaluate_with_checkpoints(&dataset(4), &context(scorer, &cfg))
        .await
        .unwrap();
    let state = store.read(&report.session_id).unwrap();
    // Trailing window sees only the last chunk, the final report sees everything
    assert_eq!(state.partial_metrics["faithfulness"], 1.0);
    assert!((report.metrics["faithfulness"] - 0.6).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn dataset_file_with_invalid_record_fails_only_its_chunk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("golden.json");
    let records: Vec<serde_json::Value> = (0..25)
        .map(|i| {
            serde_json::json!({
                "question": format!("q{i}"),
                "contexts": [format!("context {i}")],
                "answer": if i == 17 { String::new() } else { format!("answer {i}") },
                "ground_truth": format!("reference {i}"),
            })
        })
        .collect();
    std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

    let data = Dataset::load_json(&path).unwrap();
    assert_eq!(data.len(), 25);

    let cfg = config(10);
    let scorer = Arc::new(MockScorer::constant(0.9));
    let manager = BatchManager::new(Arc::new(MemoryCheckpointStore::new()), cfg.clone());
    let report = manager
        .evaluate_with_checkpoints(&data, &context(scorer.clone(), &cfg))
        .await
        .unwrap();

    assert_eq!(report.individual_results.len(), 25);
    assert_eq!(report.metadata.error_count, 10);
    assert!((report.metadata.success_rate - 0.6).abs() < 1e-12);
    assert!(report.individual_results[10..20].iter().all(|r| r.error.is_some()));
    assert!(report.individual_results[10].error.as_deref().unwrap().contains("17"));
    // The chunk holding the bad record never reaches the scorer
    assert_eq!(
        scorer.scored_batches().iter().map(Vec::len).collect::<Vec<_>>(),
        vec![10, 5]
    );
}

#[tokio::test(start_paused = true)]
async fn continued_session_keeps_its_strategy_and_chunking() {
    let data = dataset(9);
    let mut started = config(3);
    started.strategy.domain = Some("legal".into());
    let inner = Arc::new(MemoryCheckpointStore::new());

    // Crash after the first chunk is persisted
    let crashing = BatchManager::new(Arc::new(FlakyStore::new(inner.clone(), |n| n > 2)), started.clone());
    crashing
        .evaluate_with_checkpoints(&data, &context(Arc::new(MockScorer::constant(0.7)), &started))
        .await
        .unwrap_err();
    let session_id = only_session(&inner);
    assert_eq!(inner.read(&session_id).unwrap().completed_items, 3);

    // Continue under a default configuration
    let current = config(10);
    let scorer = Arc::new(MockScorer::constant(0.7));
    let manager = BatchManager::new(inner.clone(), current.clone());
    let report = manager
        .continue_session(&session_id, &data, &context(scorer.clone(), &current))
        .await
        .unwrap();

    assert_eq!(
        scorer.scored_batches().iter().map(Vec::len).collect::<Vec<_>>(),
        vec![3, 3]
    );
    assert_eq!(
        report.metadata.strategies,
        BTreeMap::from([("custom:legal".to_string(), 3)])
    );
}
