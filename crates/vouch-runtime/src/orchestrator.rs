//! Evaluator: run any subset of probes for one prediction and decide.
//!
//! - Parallel fan-out to the selected probes via `tokio::join!`
//! - A probe that cannot evaluate is recorded as unavailable, not as a
//!   low-confidence result
//! - Deterministic fan-in through the [`Aggregator`]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use vouch_core::{
    Aggregator, CategorySet, Decision, EvaluationBundle, Prediction, ProbeKind, UnavailableProbe,
};

use crate::cache::VerdictCache;
use crate::classifier::Classifier;
use crate::config::RuntimeConfig;
use crate::context::EvaluationContext;
use crate::probes::{EvalError, JudgePanel, ProbeStatus, StabilityProbe, SyntheticValidator};
use crate::providers::{ModelGateway, ProviderError, ProviderRegistry};
use crate::resilience::{BudgetTracker, CallGuard, CircuitBreaker, UsageReport};

/// Which probes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSelection {
    pub stability: bool,
    pub synthetic: bool,
    pub judges: bool,
}

impl ProbeSelection {
    pub fn all() -> Self {
        Self {
            stability: true,
            synthetic: true,
            judges: true,
        }
    }

    pub fn only(kinds: &[ProbeKind]) -> Self {
        Self {
            stability: kinds.contains(&ProbeKind::Stability),
            synthetic: kinds.contains(&ProbeKind::Synthetic),
            judges: kinds.contains(&ProbeKind::Judge),
        }
    }

    pub fn includes(&self, kind: ProbeKind) -> bool {
        match kind {
            ProbeKind::Stability => self.stability,
            ProbeKind::Synthetic => self.synthetic,
            ProbeKind::Judge => self.judges,
        }
    }
}

impl Default for ProbeSelection {
    fn default() -> Self {
        Self::all()
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub decision: Decision,

    pub bundle: EvaluationBundle,

    /// One entry per probe, requested or not
    pub statuses: BTreeMap<ProbeKind, ProbeStatus>,
}

/// Runs probes against one configuration.
pub struct Evaluator {
    config: RuntimeConfig,
    guard: Arc<CallGuard>,
    stability: StabilityProbe,
    synthetic: SyntheticValidator,
    judges: JudgePanel,
    aggregator: Aggregator,
}

impl Evaluator {
    pub fn builder() -> EvaluatorBuilder {
        EvaluatorBuilder::new()
    }

    fn new(
        gateway: Arc<dyn ModelGateway>,
        classifier: Arc<dyn Classifier>,
        config: RuntimeConfig,
    ) -> Self {
        let guard = Arc::new(CallGuard::new(
            CircuitBreaker::new(config.circuit_breaker.clone()),
            BudgetTracker::with_probe_budgets(config.budgets.global_max_tokens, &config.budgets.per_probe),
            config.retry.clone(),
            config.call_timeout,
        ));

        let stability = StabilityProbe::new(classifier.clone(), guard.clone())
            .with_max_concurrency(config.max_concurrency);
        let synthetic = SyntheticValidator::new(
            gateway.clone(),
            classifier,
            guard.clone(),
            config.generator.clone(),
        )
        .with_max_concurrency(config.max_concurrency);
        let mut judges =
            JudgePanel::new(gateway, guard.clone()).with_max_concurrency(config.max_concurrency);
        if let Some(cache) = VerdictCache::from_config(&config.cache) {
            judges = judges.with_cache(Arc::new(cache));
        }

        Self {
            config,
            guard,
            stability,
            synthetic,
            judges,
            aggregator: Aggregator::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stability_probe(&self) -> &StabilityProbe {
        &self.stability
    }

    pub fn synthetic_validator(&self) -> &SyntheticValidator {
        &self.synthetic
    }

    pub fn judge_panel(&self) -> &JudgePanel {
        &self.judges
    }

    /// Token usage accumulated by this evaluator so far.
    pub fn usage(&self) -> UsageReport {
        self.guard.budget().usage()
    }

    /// Zero the usage counters and every token budget.
    ///
    /// Budgets span all evaluations until reset; call this to start a new
    /// accounting window on a long-lived evaluator.
    pub fn reset_usage(&self) {
        self.guard.budget().reset();
        tracing::debug!("Token usage reset");
    }

    /// Evaluate `prediction` for `text` with the selected probes.
    ///
    /// Synthetic validation targets the predicted category. Invalid input
    /// and cancellation abort the whole evaluation; any other probe failure
    /// marks that probe unavailable.
    #[tracing::instrument(skip_all, fields(predicted = %prediction.predicted_category))]
    pub async fn evaluate(
        &self,
        text: &str,
        categories: &CategorySet,
        prediction: &Prediction,
        ctx: &EvaluationContext,
        selection: ProbeSelection,
    ) -> Result<EvaluationOutcome, EvalError> {
        if ctx.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let config = &self.config;

        let stability = async {
            if !selection.stability {
                return None;
            }
            Some(
                self.stability
                    .evaluate(
                        text,
                        categories,
                        ctx,
                        &config.stability.temperatures,
                        config.stability.runs_per_temperature,
                    )
                    .await,
            )
        };

        let synthetic = async {
            if !selection.synthetic {
                return None;
            }
            if !categories.contains(&prediction.predicted_category) {
                return Some(Err(EvalError::MalformedOutput(format!(
                    "predicted category '{}' is not in the category set",
                    prediction.predicted_category.trim()
                ))));
            }
            Some(
                self.synthetic
                    .run(
                        &prediction.predicted_category,
                        categories,
                        ctx,
                        config.synthetic.num_examples,
                        &config.synthetic.difficulty_levels,
                    )
                    .await,
            )
        };

        let judges = async {
            if !selection.judges {
                return None;
            }
            Some(
                self.judges
                    .evaluate(text, prediction, categories, ctx, &config.judges)
                    .await,
            )
        };

        let (stability, synthetic, judges) = tokio::join!(stability, synthetic, judges);

        let mut statuses = BTreeMap::new();
        let mut unavailable = Vec::new();
        let stability = settle(ProbeKind::Stability, stability, &mut statuses, &mut unavailable)?;
        let synthetic = settle(ProbeKind::Synthetic, synthetic, &mut statuses, &mut unavailable)?;
        let judges = settle(ProbeKind::Judge, judges, &mut statuses, &mut unavailable)?;
        let bundle = EvaluationBundle {
            stability,
            synthetic,
            judges,
            unavailable,
        };

        let decision = self.aggregator.decide(&bundle);
        tracing::info!(
            action = %decision.action,
            rule = ?decision.rule,
            reports = bundle.report_count(),
            unavailable = bundle.unavailable.len(),
            "Evaluation decided"
        );

        Ok(EvaluationOutcome {
            decision,
            bundle,
            statuses,
        })
    }
}

/// Record one probe's outcome and keep its report if it produced one.
fn settle<T>(
    kind: ProbeKind,
    outcome: Option<Result<T, EvalError>>,
    statuses: &mut BTreeMap<ProbeKind, ProbeStatus>,
    unavailable: &mut Vec<UnavailableProbe>,
) -> Result<Option<T>, EvalError> {
    match outcome {
        None => {
            statuses.insert(kind, ProbeStatus::NotRequested);
            Ok(None)
        }
        Some(Ok(report)) => {
            statuses.insert(kind, ProbeStatus::Completed);
            Ok(Some(report))
        }
        Some(Err(err)) if err.is_fatal() => Err(err),
        Some(Err(err)) => {
            tracing::warn!(probe = %kind, error = %err, "Probe could not evaluate");
            let reason = err.to_string();
            unavailable.push(UnavailableProbe {
                probe: kind,
                reason: reason.clone(),
            });
            statuses.insert(kind, ProbeStatus::Unavailable { reason });
            Ok(None)
        }
    }
}

/// Where the gateway comes from.
enum GatewaySource {
    Given(Arc<dyn ModelGateway>),
    /// Resolved against the final config in `build`.
    Registry(ProviderRegistry),
}

/// Builder for [`Evaluator`].
///
/// Setters may be called in any order; the last gateway setter wins.
pub struct EvaluatorBuilder {
    gateway: Option<GatewaySource>,
    classifier: Option<Arc<dyn Classifier>>,
    config: RuntimeConfig,
}

impl EvaluatorBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            classifier: None,
            config: RuntimeConfig::default(),
        }
    }

    pub fn gateway(mut self, gateway: Arc<dyn ModelGateway>) -> Self {
        self.gateway = Some(GatewaySource::Given(gateway));
        self
    }

    /// Create the gateway named by `config.provider` from `registry` when
    /// the evaluator is built.
    pub fn gateway_from_registry(mut self, registry: &ProviderRegistry) -> Self {
        self.gateway = Some(GatewaySource::Registry(registry.clone()));
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Evaluator, EvalError> {
        self.config
            .validate()
            .map_err(|e| EvalError::InvalidInput(e.to_string()))?;
        let gateway = match self.gateway {
            Some(GatewaySource::Given(gateway)) => gateway,
            Some(GatewaySource::Registry(registry)) => {
                let provider = &self.config.provider;
                registry.create(&provider.provider_type, &provider.options)?
            }
            None => {
                return Err(ProviderError::NotConfigured("no model gateway set".to_string()).into())
            }
        };
        let classifier = self
            .classifier
            .ok_or_else(|| ProviderError::NotConfigured("no classifier set".to_string()))?;

        Ok(Evaluator::new(gateway, classifier, self.config))
    }
}

impl Default for EvaluatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgeSpec;
    use crate::providers::ProviderFactory;
    use crate::resilience::RetryConfig;
    use crate::testing::{support_categories, verdict_json, ScriptedClassifier, ScriptedGateway};
    use vouch_core::{Action, Confidence, DecisionRule};

    const FIVE_BILLING: &str = r#"[
  {"text": "I was charged twice", "difficulty": "easy"},
  {"text": "Refund for last month", "difficulty": "medium"},
  {"text": "Invoice shows wrong VAT", "difficulty": "medium"},
  {"text": "Card declined but order placed", "difficulty": "hard"},
  {"text": "Plan downgrade proration", "difficulty": "hard"}
]"#;

    fn config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.generator.model = "gen".to_string();
        config.judges = vec![JudgeSpec::new("j1", "judge-a"), JudgeSpec::new("j2", "judge-b")];
        config.retry = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };
        config
    }

    fn all_billing_classifier() -> Arc<ScriptedClassifier> {
        let synthetic = [
            "I was charged twice",
            "Refund for last month",
            "Invoice shows wrong VAT",
            "Card declined but order placed",
            "Plan downgrade proration",
        ]
        .into_iter()
        .map(|text| (text, Ok("Billing".to_string())))
        .collect();
        Arc::new(
            ScriptedClassifier::by_text(synthetic)
                .with_sequence((0..9).map(|_| Ok("Billing".to_string())).collect()),
        )
    }

    fn evaluator(gateway: ScriptedGateway, classifier: Arc<ScriptedClassifier>) -> Evaluator {
        Evaluator::builder()
            .config(config())
            .gateway(Arc::new(gateway))
            .classifier(classifier)
            .build()
            .unwrap()
    }

    fn billing() -> Prediction {
        Prediction::new("Billing", Confidence::new(0.9))
    }

    #[tokio::test]
    async fn test_all_strong_reports_accept() {
        let gateway = ScriptedGateway::new(vec![
            ("gen", vec![Ok(FIVE_BILLING.to_string())]),
            ("judge-a", vec![Ok(verdict_json("AGREE", "Billing"))]),
            ("judge-b", vec![Ok(verdict_json("AGREE", "Billing"))]),
        ]);
        let evaluator = evaluator(gateway, all_billing_classifier());

        let outcome = evaluator
            .evaluate("Refund please", &support_categories(), &billing(), &EvaluationContext::new(), ProbeSelection::all())
            .await
            .unwrap();

        assert_eq!(outcome.decision.action, Action::Accept);
        assert_eq!(outcome.bundle.report_count(), 3);
        assert!(outcome.statuses.values().all(ProbeStatus::is_completed));
        assert_eq!(evaluator.usage().per_probe[&ProbeKind::Judge].calls, 2);
    }

    #[tokio::test]
    async fn test_unavailable_probe_is_recorded_not_scored() {
        let gateway = ScriptedGateway::new(vec![
            ("judge-a", vec![Ok(verdict_json("AGREE", "Billing"))]),
            ("judge-b", vec![Ok(verdict_json("AGREE", "Billing"))]),
        ]);
        let evaluator = evaluator(gateway, all_billing_classifier());

        let outcome = evaluator
            .evaluate("Refund please", &support_categories(), &billing(), &EvaluationContext::new(), ProbeSelection::all())
            .await
            .unwrap();

        assert!(outcome.bundle.synthetic.is_none());
        assert!(matches!(
            outcome.statuses[&ProbeKind::Synthetic],
            ProbeStatus::Unavailable { .. }
        ));
        assert_eq!(outcome.decision.unavailable.len(), 1);
        assert_eq!(outcome.decision.action, Action::Accept);
    }

    #[tokio::test]
    async fn test_selection_limits_probes() {
        let gateway = ScriptedGateway::new(vec![
            ("judge-a", vec![Ok(verdict_json("AGREE", "Billing"))]),
            ("judge-b", vec![Ok(verdict_json("DISAGREE", "Sales"))]),
        ]);
        let classifier = Arc::new(ScriptedClassifier::sequence(vec![]));
        let evaluator = evaluator(gateway, classifier.clone());

        let outcome = evaluator
            .evaluate(
                "Refund please",
                &support_categories(),
                &billing(),
                &EvaluationContext::new(),
                ProbeSelection::only(&[ProbeKind::Judge]),
            )
            .await
            .unwrap();

        assert_eq!(outcome.statuses[&ProbeKind::Stability], ProbeStatus::NotRequested);
        assert_eq!(outcome.decision.action, Action::HumanReview);
        assert_eq!(outcome.decision.rule, DecisionRule::MixedSignal);
        assert_eq!(classifier.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nothing_usable_means_review() {
        let evaluator = evaluator(ScriptedGateway::new(vec![]), Arc::new(ScriptedClassifier::sequence(vec![])));

        let outcome = evaluator
            .evaluate("t", &support_categories(), &billing(), &EvaluationContext::new(), ProbeSelection::all())
            .await
            .unwrap();

        assert!(outcome.bundle.is_empty());
        assert_eq!(outcome.bundle.unavailable.len(), 3);
        assert_eq!(outcome.decision.action, Action::HumanReview);
        assert_eq!(outcome.decision.rule, DecisionRule::NoReports);
    }

    #[tokio::test]
    async fn test_cancelled_evaluation_returns_nothing() {
        let evaluator = evaluator(ScriptedGateway::new(vec![]), Arc::new(ScriptedClassifier::sequence(vec![])));
        let ctx = EvaluationContext::new();
        ctx.cancel();

        let result = evaluator
            .evaluate("t", &support_categories(), &billing(), &ctx, ProbeSelection::all())
            .await;
        assert!(matches!(result, Err(EvalError::Cancelled)));
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = Evaluator::builder().config(config()).build();
        assert!(matches!(
            result,
            Err(EvalError::Provider(ProviderError::NotConfigured(_)))
        ));

        let mut bad = config();
        bad.max_concurrency = 0;
        let result = Evaluator::builder()
            .config(bad)
            .gateway(Arc::new(ScriptedGateway::new(vec![])))
            .classifier(Arc::new(ScriptedClassifier::sequence(vec![])))
            .build();
        assert!(matches!(result, Err(EvalError::InvalidInput(_))));
    }

    struct ScriptedFactory;

    impl ProviderFactory for ScriptedFactory {
        fn provider_type(&self) -> &'static str {
            "scripted"
        }

        fn create(&self, _options: &serde_json::Value) -> Result<Arc<dyn ModelGateway>, ProviderError> {
            Ok(Arc::new(ScriptedGateway::new(vec![
                ("judge-a", vec![Ok(verdict_json("AGREE", "Billing"))]),
                ("judge-b", vec![Ok(verdict_json("AGREE", "Billing"))]),
            ])))
        }

        fn validate_config(&self, _options: &serde_json::Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registry_resolves_against_final_config() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedFactory));
        let mut scripted = config();
        scripted.provider.provider_type = "scripted".to_string();

        let evaluator = Evaluator::builder()
            .gateway_from_registry(&registry)
            .config(scripted)
            .classifier(Arc::new(ScriptedClassifier::sequence(vec![])))
            .build()
            .unwrap();

        let outcome = evaluator
            .evaluate(
                "Refund please",
                &support_categories(),
                &billing(),
                &EvaluationContext::new(),
                ProbeSelection::only(&[ProbeKind::Judge]),
            )
            .await
            .unwrap();
        assert_eq!(outcome.decision.action, Action::Accept);

        // The default provider type is not registered.
        let result = Evaluator::builder()
            .gateway_from_registry(&registry)
            .config(config())
            .classifier(Arc::new(ScriptedClassifier::sequence(vec![])))
            .build();
        assert!(matches!(
            result,
            Err(EvalError::Provider(ProviderError::NotConfigured(_)))
        ));

        let explicit = Evaluator::builder()
            .config(config())
            .gateway_from_registry(&registry)
            .gateway(Arc::new(ScriptedGateway::new(vec![])))
            .classifier(Arc::new(ScriptedClassifier::sequence(vec![])))
            .build();
        assert!(explicit.is_ok());
    }

    #[tokio::test]
    async fn test_reset_usage_clears_counters() {
        let gateway = ScriptedGateway::new(vec![
            ("judge-a", vec![Ok(verdict_json("AGREE", "Billing"))]),
            ("judge-b", vec![Ok(verdict_json("AGREE", "Billing"))]),
        ]);
        let evaluator = evaluator(gateway, all_billing_classifier());
        evaluator
            .evaluate(
                "Refund please",
                &support_categories(),
                &billing(),
                &EvaluationContext::new(),
                ProbeSelection::only(&[ProbeKind::Judge]),
            )
            .await
            .unwrap();
        assert_eq!(evaluator.usage().total_calls(), 2);

        evaluator.reset_usage();
        assert_eq!(evaluator.usage(), UsageReport::default());
    }
}
