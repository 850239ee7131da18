//! Evaluation records and datasets.

use crate::error::{RagCheckError, RecordError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// One question/answer unit under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub question: String,
    /// Retrieved contexts, in retrieval order.
    pub contexts: Vec<String>,
    /// Answer produced by the pipeline under test.
    pub answer: String,
    #[serde(alias = "ground_truth", alias = "reference")]
    pub reference_answer: String,
}

impl EvaluationRecord {
    /// Build a record with trimmed fields and blank contexts removed.
    pub fn new(
        question: impl Into<String>,
        contexts: impl IntoIterator<Item = impl Into<String>>,
        answer: impl Into<String>,
        reference_answer: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            contexts: contexts.into_iter().map(Into::into).collect(),
            answer: answer.into(),
            reference_answer: reference_answer.into(),
        }
        .normalized()
    }

    /// Trim every field and drop contexts that are empty after trimming.
    pub fn normalized(mut self) -> Self {
        self.question = self.question.trim().to_string();
        self.answer = self.answer.trim().to_string();
        self.reference_answer = self.reference_answer.trim().to_string();
        self.contexts = self
            .contexts
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    /// Reject records with an empty field. `index` is only used for the message.
    pub fn validate(&self, index: usize) -> Result<(), RecordError> {
        let fields = [
            ("question", &self.question),
            ("answer", &self.answer),
            ("reference_answer", &self.reference_answer),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(RecordError::EmptyField { index, field });
            }
        }
        if self.contexts.iter().all(|c| c.trim().is_empty()) {
            return Err(RecordError::NoContexts { index });
        }
        Ok(())
    }
}

/// Validate a whole batch, reporting the first offending record.
pub fn validate_batch(records: &[EvaluationRecord], offset: usize) -> Result<(), RecordError> {
    records
        .iter()
        .enumerate()
        .try_for_each(|(i, r)| r.validate(offset + i))
}

/// A named, ordered collection of records.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub name: String,
    pub records: Vec<EvaluationRecord>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, records: Vec<EvaluationRecord>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    /// Load a JSON array of records. The dataset is named after the file stem.
    ///
    /// Invalid records are kept and logged; the batch manager records the
    /// chunk that contains them as failed.
    pub fn load_json(path: &Path) -> Result<Self, RagCheckError> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<EvaluationRecord> = serde_json::from_str(&content)?;
        let records: Vec<EvaluationRecord> =
            records.into_iter().map(EvaluationRecord::normalized).collect();
        for (index, record) in records.iter().enumerate() {
            if let Err(err) = record.validate(index) {
                warn!(path = %path.display(), error = %err, "Invalid record in dataset");
            }
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string());
        Ok(Self { name, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The records not yet processed by a session that completed `n` items.
    pub fn slice_from(&self, n: usize) -> &[EvaluationRecord] {
        &self.records[n.min(self.records.len())..]
    }
}
