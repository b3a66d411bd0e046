//! Append-only prediction history.
//!
//! Re-classifying a subject (for example after reviewer feedback) appends a
//! new version. Existing versions are never mutated or removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Prediction;

/// One version of a subject's prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub subject_id: String,

    /// Starts at 1
    pub version: u32,

    pub prediction: Prediction,

    /// Reviewer feedback that prompted this version, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

/// In-memory `(subject_id, version) → Prediction` log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionLog {
    subjects: BTreeMap<String, Vec<PredictionRecord>>,
}

impl PredictionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a prediction and return its version.
    pub fn append(&mut self, subject_id: impl Into<String>, prediction: Prediction) -> u32 {
        self.push(subject_id.into(), prediction, None)
    }

    /// Append a retry prompted by feedback.
    pub fn append_retry(
        &mut self,
        subject_id: impl Into<String>,
        prediction: Prediction,
        feedback: impl Into<String>,
    ) -> u32 {
        self.push(subject_id.into(), prediction, Some(feedback.into()))
    }

    fn push(&mut self, subject_id: String, prediction: Prediction, feedback: Option<String>) -> u32 {
        let history = self.subjects.entry(subject_id.clone()).or_default();
        let version = history.len() as u32 + 1;
        history.push(PredictionRecord {
            subject_id,
            version,
            prediction,
            feedback,
            recorded_at: Utc::now(),
        });
        version
    }

    pub fn latest(&self, subject_id: &str) -> Option<&PredictionRecord> {
        self.subjects.get(subject_id).and_then(|h| h.last())
    }

    pub fn get(&self, subject_id: &str, version: u32) -> Option<&PredictionRecord> {
        let index = version.checked_sub(1)? as usize;
        self.subjects.get(subject_id).and_then(|h| h.get(index))
    }

    /// Every version of a subject, oldest first.
    pub fn history(&self, subject_id: &str) -> &[PredictionRecord] {
        self.subjects
            .get(subject_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    /// Total number of records across subjects.
    pub fn len(&self) -> usize {
        self.subjects.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}
