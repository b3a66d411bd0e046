//! Synthetic validation scoring.
//!
//! Examples are labeled by construction, so correctness is an exact
//! (trimmed, case-sensitive) string comparison. A semantically close label is
//! still wrong.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::schema::{parse_structured, OutputSchema};
use crate::CoreError;

/// How hard an example is to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(CoreError::InvalidInput(format!("unknown difficulty '{}'", other))),
        }
    }
}

/// Spread `num_examples` over the requested levels.
///
/// Levels are deduplicated and ordered easy to hard. Each level gets
/// `n / k`; the remainder goes to the hardest levels first. Levels that end up
/// with zero examples are omitted.
pub fn difficulty_plan(
    num_examples: usize,
    levels: &[Difficulty],
) -> Result<Vec<(Difficulty, usize)>, CoreError> {
    if num_examples == 0 {
        return Err(CoreError::InvalidInput(
            "num_examples must be at least 1".to_string(),
        ));
    }

    let mut levels: Vec<Difficulty> = levels.to_vec();
    levels.sort();
    levels.dedup();
    if levels.is_empty() {
        return Err(CoreError::InvalidInput(
            "at least one difficulty level is required".to_string(),
        ));
    }

    let k = levels.len();
    let base = num_examples / k;
    let remainder = num_examples % k;

    Ok(levels
        .into_iter()
        .enumerate()
        .map(|(i, level)| {
            let extra = usize::from(i >= k - remainder);
            (level, base + extra)
        })
        .filter(|(_, count)| *count > 0)
        .collect())
}

/// Exact label comparison after trimming.
pub fn labels_match(predicted: &str, truth: &str) -> bool {
    predicted.trim() == truth.trim()
}

/// A generated example whose category is known by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyntheticExample {
    pub text: String,
    pub category: String,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Deserialize)]
struct GeneratedExample {
    text: String,
    difficulty: Difficulty,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct GeneratedExamples {
    examples: Vec<GeneratedExample>,
}

/// Parse a generator response and label every example with `category`.
pub fn parse_synthetic_examples(
    raw: &str,
    category: &str,
) -> Result<Vec<SyntheticExample>, CoreError> {
    let value = parse_structured(raw, OutputSchema::SyntheticExamples)?;
    let generated: GeneratedExamples = serde_json::from_value(value)
        .map_err(|e| CoreError::MalformedOutput(format!("synthetic examples: {}", e)))?;

    Ok(generated
        .examples
        .into_iter()
        .filter(|e| !e.text.trim().is_empty())
        .map(|e| SyntheticExample {
            text: e.text.trim().to_string(),
            category: category.to_string(),
            difficulty: e.difficulty,
            reasoning: e.reasoning,
        })
        .collect())
}

/// Classification outcome for one synthetic example.
///
/// A classifier failure is kept as an incorrect outcome with its error, so
/// accuracy reflects the true failure rate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ExampleOutcomeRecord")]
pub struct ExampleOutcome {
    example: SyntheticExample,
    predicted_category: Option<String>,
    confidence: Option<f64>,
    correct: bool,
    error: Option<String>,
}

impl ExampleOutcome {
    pub fn classified(example: SyntheticExample, predicted: impl Into<String>) -> Self {
        let predicted = predicted.into();
        let correct = labels_match(&predicted, &example.category);
        Self {
            example,
            predicted_category: Some(predicted),
            confidence: None,
            correct,
            error: None,
        }
    }

    /// Attach the classifier's self-reported confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn failed(example: SyntheticExample, error: impl Into<String>) -> Self {
        Self {
            example,
            predicted_category: None,
            confidence: None,
            correct: false,
            error: Some(error.into()),
        }
    }

    pub fn example(&self) -> &SyntheticExample {
        &self.example
    }

    pub fn predicted_category(&self) -> Option<&str> {
        self.predicted_category.as_deref()
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn is_correct(&self) -> bool {
        self.correct
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Deserialize)]
struct ExampleOutcomeRecord {
    example: SyntheticExample,
    predicted_category: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

impl From<ExampleOutcomeRecord> for ExampleOutcome {
    fn from(record: ExampleOutcomeRecord) -> Self {
        match (record.predicted_category, record.error) {
            (Some(predicted), None) => Self {
                confidence: record.confidence,
                ..Self::classified(record.example, predicted)
            },
            (predicted, error) => Self {
                example: record.example,
                predicted_category: predicted,
                confidence: record.confidence,
                correct: false,
                error: Some(error.unwrap_or_else(|| "no prediction".to_string())),
            },
        }
    }
}

/// Quality band for synthetic accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityAssessment {
    Poor,
    Moderate,
    Excellent,
}

impl QualityAssessment {
    /// ≥90% excellent, [70, 90)% moderate, below that poor.
    pub fn from_accuracy(accuracy_percent: f64) -> Self {
        if accuracy_percent >= 90.0 {
            Self::Excellent
        } else if accuracy_percent >= 70.0 {
            Self::Moderate
        } else {
            Self::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Moderate => "moderate",
            Self::Excellent => "excellent",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent - Good classification capability",
            Self::Moderate => "Moderate - Needs refinement",
            Self::Poor => "Poor - Serious issues, review category definitions",
        }
    }
}

impl fmt::Display for QualityAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accuracy for one difficulty level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyAccuracy {
    pub difficulty: Difficulty,
    pub total: u32,
    pub correct: u32,
}

impl DifficultyAccuracy {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 * 100.0 / self.total as f64
        }
    }
}

/// Outcome of a synthetic validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SyntheticReportRecord", try_from = "SyntheticReportRecord")]
pub struct SyntheticReport {
    category: String,
    outcomes: Vec<ExampleOutcome>,
    evaluated_at: DateTime<Utc>,
}

impl SyntheticReport {
    /// Build a report. Zero outcomes is a fatal input error, not 0% accuracy.
    pub fn new(category: impl Into<String>, outcomes: Vec<ExampleOutcome>) -> Result<Self, CoreError> {
        Self::from_parts(category.into(), outcomes, Utc::now())
    }

    fn from_parts(
        category: String,
        outcomes: Vec<ExampleOutcome>,
        evaluated_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        if outcomes.is_empty() {
            return Err(CoreError::InvalidInput(
                "synthetic validation needs at least one example".to_string(),
            ));
        }
        Ok(Self {
            category,
            outcomes,
            evaluated_at,
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn outcomes(&self) -> &[ExampleOutcome] {
        &self.outcomes
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    pub fn total(&self) -> u32 {
        self.outcomes.len() as u32
    }

    pub fn correct(&self) -> u32 {
        self.outcomes.iter().filter(|o| o.is_correct()).count() as u32
    }

    pub fn errored(&self) -> u32 {
        self.outcomes.iter().filter(|o| o.error().is_some()).count() as u32
    }

    /// Percent correct, in [0, 100].
    pub fn accuracy(&self) -> f64 {
        self.correct() as f64 * 100.0 / self.total() as f64
    }

    pub fn quality_assessment(&self) -> QualityAssessment {
        QualityAssessment::from_accuracy(self.accuracy())
    }

    /// Accuracy broken down by difficulty, easy to hard.
    pub fn by_difficulty(&self) -> Vec<DifficultyAccuracy> {
        let mut buckets: BTreeMap<Difficulty, (u32, u32)> = BTreeMap::new();
        for outcome in &self.outcomes {
            let entry = buckets.entry(outcome.example().difficulty).or_default();
            entry.0 += 1;
            if outcome.is_correct() {
                entry.1 += 1;
            }
        }
        buckets
            .into_iter()
            .map(|(difficulty, (total, correct))| DifficultyAccuracy {
                difficulty,
                total,
                correct,
            })
            .collect()
    }

    /// Examples the classifier got wrong, with what it said instead.
    pub fn misclassified(&self) -> impl Iterator<Item = &ExampleOutcome> {
        self.outcomes.iter().filter(|o| !o.is_correct())
    }
}

#[derive(Serialize, Deserialize)]
struct SyntheticReportRecord {
    category: String,
    outcomes: Vec<ExampleOutcome>,
    evaluated_at: DateTime<Utc>,
    #[serde(default, skip_deserializing)]
    total_examples: u32,
    #[serde(default, skip_deserializing)]
    correct: u32,
    #[serde(default, skip_deserializing)]
    accuracy: f64,
    #[serde(default, skip_deserializing)]
    quality_assessment: Option<QualityAssessment>,
    #[serde(default, skip_deserializing)]
    by_difficulty: Vec<DifficultyAccuracy>,
}

impl From<SyntheticReport> for SyntheticReportRecord {
    fn from(report: SyntheticReport) -> Self {
        Self {
            total_examples: report.total(),
            correct: report.correct(),
            accuracy: report.accuracy(),
            quality_assessment: Some(report.quality_assessment()),
            by_difficulty: report.by_difficulty(),
            category: report.category,
            outcomes: report.outcomes,
            evaluated_at: report.evaluated_at,
        }
    }
}

impl TryFrom<SyntheticReportRecord> for SyntheticReport {
    type Error = CoreError;

    fn try_from(record: SyntheticReportRecord) -> Result<Self, Self::Error> {
        Self::from_parts(record.category, record.outcomes, record.evaluated_at)
    }
}

impl Serialize for ExampleOutcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ExampleOutcome", 5)?;
        state.serialize_field("example", &self.example)?;
        state.serialize_field("predicted_category", &self.predicted_category)?;
        state.serialize_field("confidence", &self.confidence)?;
        state.serialize_field("correct", &self.correct)?;
        state.serialize_field("error", &self.error)?;
        state.end()
    }
}
