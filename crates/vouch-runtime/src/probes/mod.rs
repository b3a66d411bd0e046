//! The three evaluation probes.
//!
//! Each probe fans its model calls out with bounded concurrency, joins every
//! call, and only then computes a report. A cancelled evaluation returns
//! [`EvalError::Cancelled`] and discards whatever was gathered.

use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use vouch_core::{CoreError, JudgeFailure};

use crate::context::EvaluationContext;
use crate::providers::ProviderError;

mod judge;
mod stability;
mod synthetic;

pub use judge::JudgePanel;
pub use stability::StabilityProbe;
pub use synthetic::{select_by_plan, SyntheticValidator};

/// Probe-level errors.
#[derive(Error, Debug, Clone)]
pub enum EvalError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient samples: {0}")]
    InsufficientSamples(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    /// Surfaced after retries were exhausted
    #[error("Provider failure: {0}")]
    Provider(ProviderError),

    #[error("Request rejected: {0}")]
    Rejected(String),

    /// A call was refused locally before reaching the provider
    #[error("Token budget exhausted for {0}")]
    BudgetExhausted(String),

    #[error("Judge '{judge_id}' returned an unusable verdict: {reason}")]
    MalformedJudgeOutput { judge_id: String, reason: String },

    #[error("No judge returned a usable verdict ({} failed)", failures.len())]
    AllJudgesFailed { failures: Vec<JudgeFailure> },

    #[error("Generator returned {received} usable examples, {requested} requested")]
    GenerationShortfall { requested: usize, received: usize },

    #[error("Evaluation cancelled")]
    Cancelled,
}

impl From<ProviderError> for EvalError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected(reason) => Self::Rejected(reason),
            ProviderError::BudgetExceeded(scope) => Self::BudgetExhausted(scope),
            other => Self::Provider(other),
        }
    }
}

impl From<CoreError> for EvalError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg) => Self::InvalidInput(msg),
            CoreError::InsufficientSamples(msg) => Self::InsufficientSamples(msg),
            CoreError::MalformedOutput(msg) => Self::MalformedOutput(msg),
        }
    }
}

impl EvalError {
    /// Errors that stop a whole evaluation instead of marking one probe
    /// unavailable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Cancelled)
    }
}

/// What happened to one probe in an evaluation.
///
/// `Unavailable` means the probe could not evaluate. It is never the same as
/// a completed probe reporting low confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    Completed,
    Unavailable { reason: String },
    NotRequested,
}

impl ProbeStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Run `work` unless the context is cancelled first.
pub(crate) async fn cancellable<T, F>(ctx: &EvaluationContext, work: F) -> Result<T, EvalError>
where
    F: Future<Output = Result<T, EvalError>>,
{
    if ctx.is_cancelled() {
        return Err(EvalError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => Err(EvalError::Cancelled),
        result = work => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_provider_rejection_maps_to_rejected() {
        let err: EvalError = ProviderError::Rejected("content policy".into()).into();
        assert!(matches!(err, EvalError::Rejected(_)));

        let err: EvalError = ProviderError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(err, EvalError::Provider(ProviderError::Timeout(_))));
    }

    #[test]
    fn test_budget_refusal_keeps_its_own_kind() {
        let err: EvalError = ProviderError::BudgetExceeded("judge".into()).into();
        assert!(matches!(err, EvalError::BudgetExhausted(ref scope) if scope == "judge"));
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Token budget exhausted for judge");
    }

    #[test]
    fn test_core_errors_keep_kind() {
        let err: EvalError = CoreError::InsufficientSamples("no runs".into()).into();
        assert!(matches!(err, EvalError::InsufficientSamples(_)));
        assert!(!err.is_fatal());
        assert!(EvalError::from(CoreError::InvalidInput("x".into())).is_fatal());
    }

    #[test]
    fn test_probe_status_serialization() {
        let status = ProbeStatus::Unavailable {
            reason: "all judges failed".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "all judges failed");
        assert_eq!(serde_json::to_value(ProbeStatus::NotRequested).unwrap()["status"], "not_requested");
    }

    #[tokio::test]
    async fn test_cancellable_stops_pending_work() {
        let ctx = EvaluationContext::new();
        let token = ctx.cancellation().clone();
        let handle = tokio::spawn(async move {
            cancellable(&ctx, async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, EvalError>(())
            })
            .await
        });
        token.cancel();
        assert!(matches!(handle.await.unwrap(), Err(EvalError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_context_never_starts_work() {
        let ctx = EvaluationContext::new();
        ctx.cancel();
        let result = cancellable(&ctx, async {
            if true {
                panic!("work must not run");
            }
            Ok::<(), EvalError>(())
        })
        .await;
        assert!(matches!(result, Err(EvalError::Cancelled)));
    }
}
