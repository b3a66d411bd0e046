//! Stability probe: re-classify the same text at several temperatures.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use vouch_core::{CategorySet, ProbeKind, StabilityReport, StabilityTally};

use super::{cancellable, EvalError};
use crate::classifier::Classifier;
use crate::context::EvaluationContext;
use crate::providers::ProviderError;
use crate::resilience::CallGuard;

/// Measures how often the classifier repeats its own answer.
pub struct StabilityProbe {
    classifier: Arc<dyn Classifier>,
    guard: Arc<CallGuard>,
    max_concurrency: usize,
}

impl StabilityProbe {
    pub fn new(classifier: Arc<dyn Classifier>, guard: Arc<CallGuard>) -> Self {
        Self {
            classifier,
            guard,
            max_concurrency: 4,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Run `runs_per_temperature` classifications at each temperature.
    ///
    /// Input problems are reported before any call is made. If every run
    /// fails the probe fails with `InsufficientSamples`. A run refused by the
    /// token budget fails the probe with `BudgetExhausted`.
    #[tracing::instrument(skip_all, fields(probe = "stability", runs = runs_per_temperature))]
    pub async fn evaluate(
        &self,
        text: &str,
        categories: &CategorySet,
        ctx: &EvaluationContext,
        temperatures: &[f64],
        runs_per_temperature: u32,
    ) -> Result<StabilityReport, EvalError> {
        if temperatures.is_empty() {
            return Err(EvalError::InvalidInput("no temperatures given".into()));
        }
        if runs_per_temperature == 0 {
            return Err(EvalError::InvalidInput("runs_per_temperature must be at least 1".into()));
        }
        if let Some(t) = temperatures.iter().find(|t| !(0.0..=2.0).contains(*t)) {
            return Err(EvalError::InvalidInput(format!(
                "temperature {} outside [0, 2]",
                t
            )));
        }

        let jobs: Vec<f64> = temperatures
            .iter()
            .flat_map(|t| std::iter::repeat(*t).take(runs_per_temperature as usize))
            .collect();

        let work = async {
            let mut results: Vec<_> = stream::iter(jobs.into_iter().enumerate().map(|(index, temperature)| {
                let request = ctx.classify_request(text, categories).temperature(temperature);
                async move {
                    let result = self
                        .guard
                        .classify(ProbeKind::Stability, self.classifier.as_ref(), request)
                        .await;
                    (index, temperature, result)
                }
            }))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

            // Tally in issue order so ties never depend on completion order.
            results.sort_by_key(|(index, _, _)| *index);

            if let Some(scope) = results.iter().find_map(|(_, _, result)| match result {
                Err(ProviderError::BudgetExceeded(scope)) => Some(scope.clone()),
                _ => None,
            }) {
                return Err(EvalError::BudgetExhausted(scope));
            }

            let mut tally = StabilityTally::new(categories);
            for (_, temperature, result) in &results {
                if let Err(err) = result {
                    tracing::warn!(temperature, error = %err, "Stability run failed");
                }
                tally.record_scored(
                    *temperature,
                    result
                        .as_ref()
                        .map(|p| (p.predicted_category.as_str(), Some(p.confidence.value()))),
                );
            }
            Ok::<_, EvalError>(tally.finish()?)
        };

        let report = cancellable(ctx, work).await?;
        tracing::info!(
            agreement_rate = report.agreement_rate(),
            confidence = %report.confidence_level(),
            majority = report.majority_category().unwrap_or("-"),
            "Stability probe finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::testing::{quick_guard, support_categories, ScriptedClassifier};
    use std::sync::atomic::Ordering;
    use vouch_core::{ConfidenceBand, INVALID_BUCKET};

    fn probe(classifier: Arc<ScriptedClassifier>) -> StabilityProbe {
        StabilityProbe::new(classifier, Arc::new(quick_guard())).with_max_concurrency(3)
    }

    fn answers(counts: &[(&str, usize)]) -> Vec<Result<String, ProviderError>> {
        counts.iter()
            .flat_map(|(category, n)| std::iter::repeat(Ok(category.to_string())).take(*n))
            .collect()
    }

    #[tokio::test]
    async fn test_seven_of_nine_is_medium() {
        let classifier = Arc::new(ScriptedClassifier::sequence(answers(&[
            ("Billing", 7),
            ("Technical Support", 2),
        ])));
        let report = probe(classifier.clone())
            .evaluate("Refund please", &support_categories(), &EvaluationContext::new(), &[0.1, 0.5, 0.9], 3)
            .await
            .unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 9);
        assert_eq!(report.total_runs(), 9);
        assert_eq!(report.majority_category(), Some("Billing"));
        assert!((report.agreement_rate() - 7.0 / 9.0).abs() < 1e-9);
        assert_eq!(report.confidence_level(), ConfidenceBand::Medium);
        assert_eq!(report.per_temperature().len(), 3);

        let runs = report.runs();
        assert_eq!(runs.len(), 9);
        assert!(runs.iter().all(|r| r.confidence == Some(0.8)));
        assert_eq!((runs[3].temperature, runs[3].run), (0.5, 1));
    }

    #[tokio::test]
    async fn test_budget_refusal_is_not_a_failed_run() {
        let classifier = Arc::new(ScriptedClassifier::sequence(answers(&[("Billing", 9)])));
        let guard = CallGuard::new(
            crate::resilience::CircuitBreaker::default(),
            crate::resilience::BudgetTracker::new(1_000_000, 1),
            crate::resilience::RetryConfig::default(),
            std::time::Duration::from_secs(5),
        );
        let probe = StabilityProbe::new(classifier.clone(), Arc::new(guard));

        let result = probe
            .evaluate("Refund please", &support_categories(), &EvaluationContext::new(), &[0.1, 0.9], 2)
            .await;
        match result {
            Err(EvalError::BudgetExhausted(scope)) => assert_eq!(scope, "stability"),
            other => panic!("expected BudgetExhausted, got {:?}", other),
        }
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_outputs_lower_agreement() {
        let mut script = answers(&[("Billing", 2)]);
        script.push(Ok("Refunds".to_string()));
        script.push(Err(ProviderError::HttpError("reset".into())));
        let classifier = Arc::new(ScriptedClassifier::sequence(script));

        let report = probe(classifier)
            .evaluate("Refund please", &support_categories(), &EvaluationContext::new(), &[0.1, 0.9], 2)
            .await
            .unwrap();

        assert_eq!(report.total_runs(), 3);
        assert_eq!(report.failed_runs(), 1);
        assert_eq!(report.count_for(INVALID_BUCKET), 1);
        assert!((report.agreement_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_runs_failing_is_insufficient_samples() {
        let classifier = Arc::new(ScriptedClassifier::sequence(vec![]));
        let result = probe(classifier)
            .evaluate("text", &support_categories(), &EvaluationContext::new(), &[0.1, 0.5, 0.9], 3)
            .await;
        assert!(matches!(result, Err(EvalError::InsufficientSamples(_))));
    }

    #[tokio::test]
    async fn test_input_rejected_before_any_call() {
        let classifier = Arc::new(ScriptedClassifier::sequence(answers(&[("Billing", 9)])));
        let probe = probe(classifier.clone());
        let ctx = EvaluationContext::new();
        let cats = support_categories();

        assert!(matches!(
            probe.evaluate("t", &cats, &ctx, &[], 3).await,
            Err(EvalError::InvalidInput(_))
        ));
        assert!(matches!(
            probe.evaluate("t", &cats, &ctx, &[0.1], 0).await,
            Err(EvalError::InvalidInput(_))
        ));
        assert!(matches!(
            probe.evaluate("t", &cats, &ctx, &[0.1, 3.0], 1).await,
            Err(EvalError::InvalidInput(_))
        ));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_context_yields_no_report() {
        let classifier = Arc::new(ScriptedClassifier::sequence(answers(&[("Billing", 3)])));
        let ctx = EvaluationContext::new();
        ctx.cancel();
        let result = probe(classifier)
            .evaluate("t", &support_categories(), &ctx, &[0.1], 3)
            .await;
        assert!(matches!(result, Err(EvalError::Cancelled)));
    }
}
