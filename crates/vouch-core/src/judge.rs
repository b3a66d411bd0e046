//! Judge panel scoring.
//!
//! Each judge re-classifies the text on its own and states whether it agrees
//! with the prediction under review. Consensus over the usable verdicts is a
//! pure function of the AGREE and DISAGREE counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::{parse_structured, OutputSchema};
use crate::types::CategorySet;
use crate::CoreError;

/// A judge's stance on the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Agreement {
    Agree,
    PartiallyAgree,
    Disagree,
}

impl Agreement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agree => "AGREE",
            Self::PartiallyAgree => "PARTIALLY_AGREE",
            Self::Disagree => "DISAGREE",
        }
    }
}

impl fmt::Display for Agreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One judge's validated verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub judge_id: String,

    /// The judge's own classification; `None` when it abstained
    pub independent_category: Option<String>,

    pub agreement: Agreement,

    /// 1-5
    pub reasoning_quality: u8,

    /// 0-1
    pub judge_confidence: f64,

    pub explanation: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_category: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues_identified: Vec<String>,
}

impl JudgeVerdict {
    /// True when the judge says AGREE but classified into another category.
    pub fn contradicts(&self, predicted: &str) -> bool {
        self.agreement == Agreement::Agree
            && self
                .independent_category
                .as_deref()
                .is_some_and(|c| c.trim() != predicted.trim())
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    independent_category: Option<String>,
    #[serde(default)]
    independent_classification: Option<String>,
    agreement: Agreement,
    reasoning_quality: u8,
    judge_confidence: f64,
    explanation: String,
    #[serde(default)]
    correct_category: Option<String>,
    #[serde(default)]
    issues_identified: Vec<String>,
}

fn resolve_optional(
    field: &str,
    value: Option<String>,
    categories: &CategorySet,
) -> Result<Option<String>, CoreError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    categories
        .resolve(trimmed)
        .map(|c| Some(c.name.trim().to_string()))
        .ok_or_else(|| {
            CoreError::MalformedOutput(format!(
                "{} '{}' is not in the category set",
                field, trimmed
            ))
        })
}

/// Parse and validate one judge response.
///
/// Fails with `MalformedOutput` when the response is not JSON, violates the
/// verdict schema, or names a category outside `categories`.
pub fn parse_judge_verdict(
    judge_id: &str,
    raw: &str,
    categories: &CategorySet,
) -> Result<JudgeVerdict, CoreError> {
    let value = parse_structured(raw, OutputSchema::JudgeVerdict)?;
    let parsed: RawVerdict = serde_json::from_value(value)
        .map_err(|e| CoreError::MalformedOutput(format!("judge verdict: {}", e)))?;

    let independent = parsed
        .independent_category
        .or(parsed.independent_classification);

    Ok(JudgeVerdict {
        judge_id: judge_id.to_string(),
        independent_category: resolve_optional("independent category", independent, categories)?,
        agreement: parsed.agreement,
        reasoning_quality: parsed.reasoning_quality,
        judge_confidence: parsed.judge_confidence,
        explanation: parsed.explanation,
        correct_category: resolve_optional("correct category", parsed.correct_category, categories)?,
        issues_identified: parsed.issues_identified,
    })
}

/// Why a judge produced no usable verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeFailureKind {
    /// The judge answered but the answer was unusable
    Malformed,
    /// The call failed after retries
    Unavailable,
}

/// Audit record for a judge excluded from the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeFailure {
    pub judge_id: String,
    pub model_id: String,
    pub kind: JudgeFailureKind,
    pub reason: String,
}

/// Agreement pattern across the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consensus {
    StrongConsensus,
    ModerateConsensus,
    SplitDecision,
    StrongDisagreement,
}

impl Consensus {
    /// Map counts over `n` usable verdicts to a consensus level.
    pub fn from_counts(n: u32, agree: u32, disagree: u32) -> Self {
        if agree == n {
            Self::StrongConsensus
        } else if 2 * disagree > n {
            Self::StrongDisagreement
        } else if 2 * disagree == n {
            Self::SplitDecision
        } else {
            Self::ModerateConsensus
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongConsensus => "strong_consensus",
            Self::ModerateConsensus => "moderate_consensus",
            Self::SplitDecision => "split_decision",
            Self::StrongDisagreement => "strong_disagreement",
        }
    }
}

impl fmt::Display for Consensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Panel-level verdict on the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalVerdict {
    Confirmed,
    LikelyCorrect,
    Questionable,
}

impl FinalVerdict {
    pub fn from_counts(n: u32, agree: u32) -> Self {
        if agree == n {
            Self::Confirmed
        } else if 2 * agree >= n {
            Self::LikelyCorrect
        } else {
            Self::Questionable
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed correct",
            Self::LikelyCorrect => "likely correct",
            Self::Questionable => "questionable - review needed",
        }
    }
}

impl fmt::Display for FinalVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Outcome of a judge panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "JudgePanelReportRecord", try_from = "JudgePanelReportRecord")]
pub struct JudgePanelReport {
    verdicts: Vec<JudgeVerdict>,
    failures: Vec<JudgeFailure>,
    evaluated_at: DateTime<Utc>,
}

impl JudgePanelReport {
    /// Build a report from usable verdicts and audit-only failures.
    ///
    /// At least one usable verdict is required.
    pub fn new(verdicts: Vec<JudgeVerdict>, failures: Vec<JudgeFailure>) -> Result<Self, CoreError> {
        Self::from_parts(verdicts, failures, Utc::now())
    }

    fn from_parts(
        verdicts: Vec<JudgeVerdict>,
        failures: Vec<JudgeFailure>,
        evaluated_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        if verdicts.is_empty() {
            return Err(CoreError::InsufficientSamples(format!(
                "no usable judge verdicts ({} failed)",
                failures.len()
            )));
        }
        Ok(Self {
            verdicts,
            failures,
            evaluated_at,
        })
    }

    pub fn verdicts(&self) -> &[JudgeVerdict] {
        &self.verdicts
    }

    pub fn failures(&self) -> &[JudgeFailure] {
        &self.failures
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    pub fn usable_judges(&self) -> u32 {
        self.verdicts.len() as u32
    }

    fn count(&self, agreement: Agreement) -> u32 {
        self.verdicts
            .iter()
            .filter(|v| v.agreement == agreement)
            .count() as u32
    }

    pub fn agree_count(&self) -> u32 {
        self.count(Agreement::Agree)
    }

    pub fn disagree_count(&self) -> u32 {
        self.count(Agreement::Disagree)
    }

    /// AGREE verdicts over usable verdicts.
    pub fn agreement_rate(&self) -> f64 {
        self.agree_count() as f64 / self.usable_judges() as f64
    }

    pub fn consensus(&self) -> Consensus {
        Consensus::from_counts(self.usable_judges(), self.agree_count(), self.disagree_count())
    }

    pub fn final_verdict(&self) -> FinalVerdict {
        FinalVerdict::from_counts(self.usable_judges(), self.agree_count())
    }

    pub fn mean_judge_confidence(&self) -> f64 {
        self.verdicts.iter().map(|v| v.judge_confidence).sum::<f64>() / self.usable_judges() as f64
    }

    pub fn mean_reasoning_quality(&self) -> f64 {
        self.verdicts
            .iter()
            .map(|v| v.reasoning_quality as f64)
            .sum::<f64>()
            / self.usable_judges() as f64
    }

    /// Categories the dissenting judges proposed instead, in judge order.
    pub fn alternative_categories(&self, predicted: &str) -> Vec<&str> {
        let mut alternatives: Vec<&str> = Vec::new();
        for verdict in &self.verdicts {
            let proposed = verdict
                .correct_category
                .as_deref()
                .or(verdict.independent_category.as_deref());
            if let Some(category) = proposed {
                if category != predicted.trim() && !alternatives.contains(&category) {
                    alternatives.push(category);
                }
            }
        }
        alternatives
    }
}

#[derive(Serialize, Deserialize)]
struct JudgePanelReportRecord {
    verdicts: Vec<JudgeVerdict>,
    #[serde(default)]
    failures: Vec<JudgeFailure>,
    evaluated_at: DateTime<Utc>,
    #[serde(default, skip_deserializing)]
    usable_judges: u32,
    #[serde(default, skip_deserializing)]
    agreement_rate: f64,
    #[serde(default, skip_deserializing)]
    consensus: Option<Consensus>,
    #[serde(default, skip_deserializing)]
    final_verdict: Option<FinalVerdict>,
}

impl From<JudgePanelReport> for JudgePanelReportRecord {
    fn from(report: JudgePanelReport) -> Self {
        Self {
            usable_judges: report.usable_judges(),
            agreement_rate: report.agreement_rate(),
            consensus: Some(report.consensus()),
            final_verdict: Some(report.final_verdict()),
            verdicts: report.verdicts,
            failures: report.failures,
            evaluated_at: report.evaluated_at,
        }
    }
}

impl TryFrom<JudgePanelReportRecord> for JudgePanelReport {
    type Error = CoreError;

    fn try_from(record: JudgePanelReportRecord) -> Result<Self, Self::Error> {
        Self::from_parts(record.verdicts, record.failures, record.evaluated_at)
    }
}
