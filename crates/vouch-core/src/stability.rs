//! Stability scoring: agreement of repeated classifications.
//!
//! A [`StabilityTally`] is fed the outcome of every classifier run in a fixed
//! order (temperature order, then run order). The resulting report stores raw
//! counts only; agreement and banding are derived on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{CategorySet, ConfidenceBand};
use crate::CoreError;

/// Histogram bucket for predictions outside the category set.
pub const INVALID_BUCKET: &str = "<invalid>";

/// Run counts for one sampling temperature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemperatureRuns {
    pub temperature: f64,
    pub attempted: u32,
    pub succeeded: u32,
}

impl TemperatureRuns {
    pub fn failed(&self) -> u32 {
        self.attempted.saturating_sub(self.succeeded)
    }
}

/// One histogram bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: String,
    pub count: u32,
}

impl CategoryCount {
    pub fn is_invalid(&self) -> bool {
        self.category == INVALID_BUCKET
    }
}

/// One classifier run as it happened.
///
/// `run` counts from 1 within its temperature. `predicted_category` is the
/// raw label, before bucketing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StabilityRun {
    pub temperature: f64,
    pub run: u32,
    pub predicted_category: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Accumulates run outcomes in deterministic order.
pub struct StabilityTally<'a> {
    categories: &'a CategorySet,
    per_temperature: Vec<TemperatureRuns>,
    histogram: Vec<CategoryCount>,
    runs: Vec<StabilityRun>,
}

impl<'a> StabilityTally<'a> {
    pub fn new(categories: &'a CategorySet) -> Self {
        Self {
            categories,
            per_temperature: Vec::new(),
            histogram: Vec::new(),
            runs: Vec::new(),
        }
    }

    /// Record one run. `Err` means the call failed and produced no prediction.
    pub fn record<E: fmt::Display>(&mut self, temperature: f64, outcome: Result<&str, E>) {
        self.record_scored(temperature, outcome.map(|category| (category, None)));
    }

    /// Record one run together with the classifier's confidence.
    pub fn record_scored<E: fmt::Display>(
        &mut self,
        temperature: f64,
        outcome: Result<(&str, Option<f64>), E>,
    ) {
        let index = match self
            .per_temperature
            .iter()
            .position(|r| r.temperature == temperature)
        {
            Some(index) => index,
            None => {
                self.per_temperature.push(TemperatureRuns {
                    temperature,
                    attempted: 0,
                    succeeded: 0,
                });
                self.per_temperature.len() - 1
            }
        };
        let runs = &mut self.per_temperature[index];
        runs.attempted += 1;
        let run = runs.attempted;

        let (raw, confidence) = match outcome {
            Ok(prediction) => prediction,
            Err(err) => {
                self.runs.push(StabilityRun {
                    temperature,
                    run,
                    predicted_category: None,
                    confidence: None,
                    error: Some(err.to_string()),
                });
                return;
            }
        };
        runs.succeeded += 1;
        self.runs.push(StabilityRun {
            temperature,
            run,
            predicted_category: Some(raw.to_string()),
            confidence,
            error: None,
        });

        let bucket = self
            .categories
            .resolve(raw)
            .map(|c| c.name.trim())
            .unwrap_or(INVALID_BUCKET);

        match self.histogram.iter_mut().find(|c| c.category == bucket) {
            Some(entry) => entry.count += 1,
            None => self.histogram.push(CategoryCount {
                category: bucket.to_string(),
                count: 1,
            }),
        }
    }

    /// Build the report.
    ///
    /// Zero successful runs is `InsufficientSamples`, never an agreement of 0.
    pub fn finish(self) -> Result<StabilityReport, CoreError> {
        StabilityReport::from_counts(self.per_temperature, self.histogram, self.runs, Utc::now())
    }
}

/// Outcome of a stability probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StabilityReportRecord", try_from = "StabilityReportRecord")]
pub struct StabilityReport {
    per_temperature: Vec<TemperatureRuns>,
    histogram: Vec<CategoryCount>,
    runs: Vec<StabilityRun>,
    evaluated_at: DateTime<Utc>,
}

impl StabilityReport {
    /// `runs` may be empty for reports stored without run records.
    fn from_counts(
        per_temperature: Vec<TemperatureRuns>,
        histogram: Vec<CategoryCount>,
        runs: Vec<StabilityRun>,
        evaluated_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let succeeded: u32 = per_temperature.iter().map(|r| r.succeeded).sum();
        let bucketed: u32 = histogram.iter().map(|c| c.count).sum();

        if succeeded != bucketed {
            return Err(CoreError::InvalidInput(format!(
                "histogram holds {} runs but {} runs succeeded",
                bucketed, succeeded
            )));
        }
        let attempted: u32 = per_temperature.iter().map(|r| r.attempted).sum();
        if !runs.is_empty() && runs.len() != attempted as usize {
            return Err(CoreError::InvalidInput(format!(
                "{} run records for {} attempted runs",
                runs.len(),
                attempted
            )));
        }
        if bucketed == 0 {
            return Err(CoreError::InsufficientSamples(format!(
                "0 of {} classification runs succeeded",
                attempted
            )));
        }

        Ok(Self {
            per_temperature,
            histogram,
            runs,
            evaluated_at,
        })
    }

    pub fn per_temperature(&self) -> &[TemperatureRuns] {
        &self.per_temperature
    }

    /// Every run in record order, failures included.
    pub fn runs(&self) -> &[StabilityRun] {
        &self.runs
    }

    /// Buckets in first-seen order, including the invalid bucket.
    pub fn histogram(&self) -> &[CategoryCount] {
        &self.histogram
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    /// Successful runs; the histogram always sums to this.
    pub fn total_runs(&self) -> u32 {
        self.histogram.iter().map(|c| c.count).sum()
    }

    pub fn failed_runs(&self) -> u32 {
        self.per_temperature.iter().map(|r| r.failed()).sum()
    }

    pub fn invalid_runs(&self) -> u32 {
        self.histogram
            .iter()
            .filter(|c| c.is_invalid())
            .map(|c| c.count)
            .sum()
    }

    pub fn count_for(&self, category: &str) -> u32 {
        self.histogram
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Most frequent valid category; ties go to the first seen.
    pub fn majority(&self) -> Option<&CategoryCount> {
        let mut best: Option<&CategoryCount> = None;
        for entry in self.histogram.iter().filter(|c| !c.is_invalid()) {
            match best {
                Some(current) if current.count >= entry.count => {}
                _ => best = Some(entry),
            }
        }
        best
    }

    pub fn majority_category(&self) -> Option<&str> {
        self.majority().map(|c| c.category.as_str())
    }

    /// count(majority) / total_runs, in [0, 1].
    pub fn agreement_rate(&self) -> f64 {
        let total = self.total_runs();
        if total == 0 {
            return 0.0;
        }
        let majority = self.majority().map(|c| c.count).unwrap_or(0);
        majority as f64 / total as f64
    }

    pub fn confidence_level(&self) -> ConfidenceBand {
        ConfidenceBand::from_score(self.agreement_rate())
    }

    /// Reviewer-facing reading of the band.
    pub fn recommendation(&self) -> &'static str {
        match self.confidence_level() {
            ConfidenceBand::High => "High confidence - likely correct classification",
            ConfidenceBand::Medium => {
                "Medium confidence - some uncertainty, consider human review"
            }
            ConfidenceBand::Low => "Low confidence - high uncertainty, flag for human review",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StabilityReportRecord {
    per_temperature: Vec<TemperatureRuns>,
    histogram: Vec<CategoryCount>,
    #[serde(default)]
    runs: Vec<StabilityRun>,
    evaluated_at: DateTime<Utc>,
    #[serde(default, skip_deserializing)]
    total_runs: u32,
    #[serde(default, skip_deserializing)]
    failed_runs: u32,
    #[serde(default, skip_deserializing)]
    majority_category: Option<String>,
    #[serde(default, skip_deserializing)]
    agreement_rate: f64,
    #[serde(default, skip_deserializing)]
    confidence_level: Option<ConfidenceBand>,
}

impl From<StabilityReport> for StabilityReportRecord {
    fn from(report: StabilityReport) -> Self {
        Self {
            total_runs: report.total_runs(),
            failed_runs: report.failed_runs(),
            majority_category: report.majority_category().map(str::to_string),
            agreement_rate: report.agreement_rate(),
            confidence_level: Some(report.confidence_level()),
            per_temperature: report.per_temperature,
            histogram: report.histogram,
            runs: report.runs,
            evaluated_at: report.evaluated_at,
        }
    }
}

impl TryFrom<StabilityReportRecord> for StabilityReport {
    type Error = CoreError;

    fn try_from(record: StabilityReportRecord) -> Result<Self, Self::Error> {
        Self::from_counts(
            record.per_temperature,
            record.histogram,
            record.runs,
            record.evaluated_at,
        )
    }
}
