//! Aggregator: folds probe reports into one action.
//!
//! The decision table is fixed:
//! 1. Stability confidence low, or judges in strong disagreement → FLAG_FOR_REFINEMENT
//! 2. Else synthetic quality poor → FLAG_FOR_REFINEMENT
//! 3. Else any mixed signal → HUMAN_REVIEW
//! 4. Else, with at least one report and all of them strong → ACCEPT
//! 5. No reports at all → HUMAN_REVIEW
//!
//! A missing report has no opinion. No opinion is never a pass.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::judge::{Consensus, JudgePanelReport};
use crate::stability::StabilityReport;
use crate::synthetic::{QualityAssessment, SyntheticReport};
use crate::types::{ConfidenceBand, ProbeKind};

/// Recommended action, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Accept,
    HumanReview,
    FlagForRefinement,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::HumanReview => "human_review",
            Self::FlagForRefinement => "flag_for_refinement",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    /// Rule 1
    UnstableOrRejected,
    /// Rule 2
    PoorSyntheticQuality,
    /// Rule 3
    MixedSignal,
    /// Rule 4
    AllStrong,
    /// Rule 5
    NoReports,
}

impl DecisionRule {
    pub fn action(&self) -> Action {
        match self {
            Self::UnstableOrRejected | Self::PoorSyntheticQuality => Action::FlagForRefinement,
            Self::MixedSignal | Self::NoReports => Action::HumanReview,
            Self::AllStrong => Action::Accept,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    Strong,
    Mixed,
    Weak,
}

/// What one report said and which rule it triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub probe: ProbeKind,
    pub strength: SignalStrength,
    pub rule: DecisionRule,
    pub detail: String,
}

impl Signal {
    fn from_stability(report: &StabilityReport) -> Self {
        let band = report.confidence_level();
        let (strength, rule) = match band {
            ConfidenceBand::High => (SignalStrength::Strong, DecisionRule::AllStrong),
            ConfidenceBand::Medium => (SignalStrength::Mixed, DecisionRule::MixedSignal),
            ConfidenceBand::Low => (SignalStrength::Weak, DecisionRule::UnstableOrRejected),
        };
        Self {
            probe: ProbeKind::Stability,
            strength,
            rule,
            detail: format!(
                "agreement {:.3} over {} runs ({} confidence)",
                report.agreement_rate(),
                report.total_runs(),
                band
            ),
        }
    }

    fn from_synthetic(report: &SyntheticReport) -> Self {
        let quality = report.quality_assessment();
        let (strength, rule) = match quality {
            QualityAssessment::Excellent => (SignalStrength::Strong, DecisionRule::AllStrong),
            QualityAssessment::Moderate => (SignalStrength::Mixed, DecisionRule::MixedSignal),
            QualityAssessment::Poor => (SignalStrength::Weak, DecisionRule::PoorSyntheticQuality),
        };
        Self {
            probe: ProbeKind::Synthetic,
            strength,
            rule,
            detail: format!(
                "accuracy {:.1}% on {} examples ({})",
                report.accuracy(),
                report.total(),
                quality
            ),
        }
    }

    fn from_judges(report: &JudgePanelReport) -> Self {
        let consensus = report.consensus();
        let (strength, rule) = match consensus {
            Consensus::StrongConsensus => (SignalStrength::Strong, DecisionRule::AllStrong),
            Consensus::ModerateConsensus | Consensus::SplitDecision => {
                (SignalStrength::Mixed, DecisionRule::MixedSignal)
            }
            Consensus::StrongDisagreement => {
                (SignalStrength::Weak, DecisionRule::UnstableOrRejected)
            }
        };
        Self {
            probe: ProbeKind::Judge,
            strength,
            rule,
            detail: format!(
                "{} of {} judges agree ({})",
                report.agree_count(),
                report.usable_judges(),
                consensus
            ),
        }
    }
}

/// A probe that was requested but could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableProbe {
    pub probe: ProbeKind,
    pub reason: String,
}

/// Reports produced for one prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<StabilityReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic: Option<SyntheticReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judges: Option<JudgePanelReport>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<UnavailableProbe>,
}

impl EvaluationBundle {
    pub fn with_stability(mut self, report: StabilityReport) -> Self {
        self.stability = Some(report);
        self
    }

    pub fn with_synthetic(mut self, report: SyntheticReport) -> Self {
        self.synthetic = Some(report);
        self
    }

    pub fn with_judges(mut self, report: JudgePanelReport) -> Self {
        self.judges = Some(report);
        self
    }

    pub fn with_unavailable(mut self, probe: ProbeKind, reason: impl Into<String>) -> Self {
        self.unavailable.push(UnavailableProbe {
            probe,
            reason: reason.into(),
        });
        self
    }

    pub fn report_count(&self) -> usize {
        usize::from(self.stability.is_some())
            + usize::from(self.synthetic.is_some())
            + usize::from(self.judges.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.report_count() == 0
    }
}

/// The aggregator's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,

    /// The rule that produced `action`
    pub rule: DecisionRule,

    /// One entry per present report, in stability, synthetic, judge order
    pub signals: Vec<Signal>,

    pub unavailable: Vec<UnavailableProbe>,
}

/// Stateless decision table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    /// Apply the decision table to a bundle.
    pub fn decide(&self, bundle: &EvaluationBundle) -> Decision {
        let signals: Vec<Signal> = [
            bundle.stability.as_ref().map(Signal::from_stability),
            bundle.synthetic.as_ref().map(Signal::from_synthetic),
            bundle.judges.as_ref().map(Signal::from_judges),
        ]
        .into_iter()
        .flatten()
        .collect();

        // The most severe action wins; among rules yielding it, the lowest row.
        let rule = signals
            .iter()
            .map(|s| s.rule)
            .max_by(|a, b| a.action().cmp(&b.action()).then(b.cmp(a)))
            .unwrap_or(DecisionRule::NoReports);

        tracing::debug!(
            rule = ?rule,
            reports = signals.len(),
            unavailable = bundle.unavailable.len(),
            "Aggregated evaluation bundle"
        );

        Decision {
            action: rule.action(),
            rule,
            signals,
            unavailable: bundle.unavailable.clone(),
        }
    }
}
