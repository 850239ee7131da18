//! HTTP adapter for an external scoring service.
//!
//! The service receives the batch, metric identifiers, optional instructions
//! and execution parameters as JSON at `POST {endpoint}/score`, and answers with
//! whatever result shape its evaluation library produced. The body is
//! classified by [`RawResult::from_json`].

use super::rate_limiter::{RateLimitConfig, RequestLimiter};
use super::{ExecutionConfig, RawResult, ScoreRequest, Scorer};
use crate::config::ScorerConfig;
use crate::error::ScorerError;
use crate::record::EvaluationRecord;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ScorePayload<'a> {
    records: &'a [EvaluationRecord],
    metrics: Vec<&'static str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    instructions: BTreeMap<&'static str, &'a str>,
    execution: ExecutionConfig,
}

/// A scorer backed by an HTTP scoring service.
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
    limiter: Mutex<RequestLimiter>,
}

impl HttpScorer {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            request_timeout,
            limiter: Mutex::new(RequestLimiter::new(RateLimitConfig::default())),
        }
    }

    pub fn from_config(config: &ScorerConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
        .with_rate_limit(RateLimitConfig::per_minute(config.requests_per_minute))
    }

    #[must_use]
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.limiter = Mutex::new(RequestLimiter::new(config));
        self
    }

    fn score_url(&self) -> String {
        format!("{}/score", self.endpoint)
    }

    /// Wait until the limiter admits a request, then record it.
    async fn throttle(&self) {
        loop {
            let delay = {
                let mut limiter = self.limiter.lock().await;
                match limiter.check() {
                    None => {
                        limiter.record();
                        return;
                    }
                    Some(delay) => delay,
                }
            };
            debug!(delay_ms = delay.as_millis() as u64, "Throttling scorer request");
            tokio::time::sleep(delay).await;
        }
    }

    async fn send(
        &self,
        batch: &[EvaluationRecord],
        request: &ScoreRequest,
    ) -> Result<RawResult, ScorerError> {
        self.throttle().await;

        let payload = ScorePayload {
            records: batch,
            metrics: request.metric_names(),
            instructions: request
                .instructions
                .iter()
                .map(|(m, text)| (m.as_str(), text.as_str()))
                .collect(),
            execution: request.execution,
        };

        let response = self
            .client
            .post(self.score_url())
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ScorerError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScorerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ScorerError::BadResponse {
                    message: e.to_string(),
                })?;
        Ok(RawResult::from_json(value))
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(
        &self,
        batch: &[EvaluationRecord],
        request: &ScoreRequest,
    ) -> Result<RawResult, ScorerError> {
        debug!(
            endpoint = %self.endpoint,
            records = batch.len(),
            metrics = ?request.metric_names(),
            "Sending scoring request"
        );
        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Err(ScorerError::Cancelled),
            result = self.send(batch, request) => result,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
