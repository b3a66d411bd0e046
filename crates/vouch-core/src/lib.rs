//! # vouch-core
//!
//! Deterministic scoring for label-free classification evaluation.
//!
//! This crate turns the raw outcomes of repeated or independent oracle calls
//! into reports and a final action:
//! - How stable is a prediction under resampling?
//! - How accurate is the classifier on examples labeled by construction?
//! - Do independent judges agree with the prediction?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same outcomes always produce the same report and action
//! 2. **No model calls**: Everything here is arithmetic over recorded outcomes
//! 3. **Derived, never cached**: Rates are recomputed from raw counts
//! 4. **Auditable**: Every decision names the report and rule that produced it
//!
//! ## Example
//!
//! ```rust,ignore
//! use vouch_core::{Aggregator, EvaluationBundle, Action};
//!
//! let bundle = EvaluationBundle::default().with_judges(panel_report);
//! let decision = Aggregator::new().decide(&bundle);
//!
//! match decision.action {
//!     Action::Accept => println!("accept"),
//!     Action::HumanReview => println!("route to a reviewer"),
//!     Action::FlagForRefinement => println!("refine the category definitions"),
//! }
//! ```

pub mod aggregate;
pub mod judge;
pub mod ledger;
pub mod schema;
pub mod stability;
pub mod synthetic;
pub mod types;

// Re-export main types at crate root
pub use aggregate::{
    Action, Aggregator, Decision, DecisionRule, EvaluationBundle, Signal, SignalStrength,
    UnavailableProbe,
};
pub use judge::{
    parse_judge_verdict, Agreement, Consensus, FinalVerdict, JudgeFailure, JudgeFailureKind,
    JudgePanelReport, JudgeVerdict,
};
pub use ledger::{PredictionLog, PredictionRecord};
pub use schema::{extract_json, parse_structured, OutputSchema};
pub use stability::{
    CategoryCount, StabilityReport, StabilityRun, StabilityTally, TemperatureRuns, INVALID_BUCKET,
};
pub use synthetic::{
    difficulty_plan, labels_match, parse_synthetic_examples, Difficulty, DifficultyAccuracy,
    ExampleOutcome, QualityAssessment, SyntheticExample, SyntheticReport,
};
pub use types::{Category, CategorySet, Confidence, ConfidenceBand, Prediction, ProbeKind};

use thiserror::Error;

/// Errors raised while building reports from oracle outcomes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient samples: {0}")]
    InsufficientSamples(String),

    #[error("Malformed output: {0}")]
    MalformedOutput(String),
}
