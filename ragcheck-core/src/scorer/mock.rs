//! A scripted scorer for testing and dry runs.

use super::{RawResult, ResultTable, ScoreRequest, Scorer};
use crate::error::ScorerError;
use crate::metrics::MetricSet;
use crate::record::EvaluationRecord;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted reaction to a `score` call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A table with this score for every requested metric and record.
    Constant(f64),
    /// Return this exact raw result.
    Raw(RawResult),
    /// Fail with a request error.
    Error(String),
    /// Wait, then behave like the inner response.
    Delayed(Duration, Box<MockResponse>),
    /// Never return and ignore cancellation.
    Hang,
}

/// A mock scorer that replays queued responses, then falls back to a default.
pub struct MockScorer {
    name: String,
    queue: Mutex<VecDeque<MockResponse>>,
    default: MockResponse,
    calls: AtomicUsize,
    requested: Mutex<Vec<MetricSet>>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl MockScorer {
    pub fn new(default: MockResponse) -> Self {
        Self {
            name: "mock-scorer".to_string(),
            queue: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// A scorer that always returns `score` for everything.
    pub fn constant(score: f64) -> Self {
        Self::new(MockResponse::Constant(score))
    }

    /// Queue a response for the next unscripted call.
    pub fn queue_response(&self, response: MockResponse) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    /// Number of `score` calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Metric sets of every call, in call order.
    pub fn requested_metrics(&self) -> Vec<MetricSet> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Questions of every scored batch, in call order.
    pub fn scored_batches(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_response(&self) -> MockResponse {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

async fn respond(
    response: MockResponse,
    batch: &[EvaluationRecord],
    request: &ScoreRequest,
) -> Result<RawResult, ScorerError> {
    let mut response = response;
    loop {
        match response {
            MockResponse::Constant(score) => {
                let columns = request.metric_names();
                return Ok(RawResult::Tabular(ResultTable::constant(
                    &columns,
                    batch.len(),
                    score,
                )));
            }
            MockResponse::Raw(raw) => return Ok(raw),
            MockResponse::Error(message) => return Err(ScorerError::Request { message }),
            MockResponse::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                response = *inner;
            }
            MockResponse::Hang => return std::future::pending().await,
        }
    }
}

#[async_trait]
impl Scorer for MockScorer {
    async fn score(
        &self,
        batch: &[EvaluationRecord],
        request: &ScoreRequest,
    ) -> Result<RawResult, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.metrics.clone());
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(batch.iter().map(|r| r.question.clone()).collect());
        let response = self.next_response();
        respond(response, batch, request).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
