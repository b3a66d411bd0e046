//! Judge panel: independent models review one prediction.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use vouch_core::{
    parse_judge_verdict, CategorySet, JudgeFailure, JudgeFailureKind, JudgePanelReport,
    JudgeVerdict, OutputSchema, Prediction, ProbeKind,
};

use super::{cancellable, EvalError};
use crate::cache::{VerdictCache, VerdictKey};
use crate::config::JudgeSpec;
use crate::context::EvaluationContext;
use crate::prompts::judge_messages;
use crate::providers::{ChatMessage, InvokeOptions, ModelGateway, ProviderError};
use crate::resilience::CallGuard;

/// Why one judge produced no verdict.
enum Miss {
    Failed(JudgeFailure),
    /// Refused locally; the judge was never asked.
    OverBudget(String),
}

/// Queries every judge in parallel. Judges never see each other's output.
pub struct JudgePanel {
    gateway: Arc<dyn ModelGateway>,
    guard: Arc<CallGuard>,
    cache: Option<Arc<VerdictCache>>,
    max_concurrency: usize,
}

impl JudgePanel {
    pub fn new(gateway: Arc<dyn ModelGateway>, guard: Arc<CallGuard>) -> Self {
        Self {
            gateway,
            guard,
            cache: None,
            max_concurrency: 4,
        }
    }

    pub fn with_cache(mut self, cache: Arc<VerdictCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Collect verdicts on `prediction` from `judges`.
    ///
    /// Unusable judges are excluded from the rates and listed as failures.
    /// Fails with `AllJudgesFailed` only when no verdict is usable, and with
    /// `BudgetExhausted` when the token budget refused any judge call.
    #[tracing::instrument(skip_all, fields(probe = "judge", judges = judges.len()))]
    pub async fn evaluate(
        &self,
        text: &str,
        prediction: &Prediction,
        categories: &CategorySet,
        ctx: &EvaluationContext,
        judges: &[JudgeSpec],
    ) -> Result<JudgePanelReport, EvalError> {
        if judges.is_empty() {
            return Err(EvalError::InvalidInput("judge panel is empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = judges.iter().find(|j| !seen.insert(j.judge_id.as_str())) {
            return Err(EvalError::InvalidInput(format!(
                "duplicate judge_id '{}'",
                dup.judge_id
            )));
        }

        let messages = judge_messages(text, prediction, categories, ctx.field_name.as_deref());

        let work = async {
            let mut results: Vec<_> = stream::iter(judges.iter().enumerate().map(|(index, judge)| {
                let messages = &messages;
                async move {
                    let result = self.ask(judge, categories, messages).await;
                    (index, result)
                }
            }))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
            results.sort_by_key(|(index, _)| *index);

            let mut verdicts = Vec::new();
            let mut failures = Vec::new();
            let mut over_budget = None;
            for (_, result) in results {
                match result {
                    Ok(verdict) => {
                        if verdict.contradicts(&prediction.predicted_category) {
                            tracing::warn!(
                                judge_id = %verdict.judge_id,
                                "Judge agreed but classified into another category"
                            );
                        }
                        verdicts.push(verdict);
                    }
                    Err(Miss::Failed(failure)) => failures.push(failure),
                    Err(Miss::OverBudget(scope)) => over_budget = Some(scope),
                }
            }

            if let Some(scope) = over_budget {
                return Err(EvalError::BudgetExhausted(scope));
            }
            if verdicts.is_empty() {
                return Err(EvalError::AllJudgesFailed { failures });
            }
            Ok(JudgePanelReport::new(verdicts, failures)?)
        };

        let report = cancellable(ctx, work).await?;
        tracing::info!(
            consensus = %report.consensus(),
            agreement_rate = report.agreement_rate(),
            failed = report.failures().len(),
            "Judge panel finished"
        );
        Ok(report)
    }

    async fn ask(
        &self,
        judge: &JudgeSpec,
        categories: &CategorySet,
        messages: &[ChatMessage],
    ) -> Result<JudgeVerdict, Miss> {
        let options = InvokeOptions::new(&judge.model_id)
            .temperature(judge.temperature)
            .max_output_tokens(judge.max_output_tokens)
            .timeout(self.guard.call_timeout())
            .output_schema(OutputSchema::JudgeVerdict);

        let key = VerdictKey::new(&options, messages, categories);
        if let Some(cache) = &self.cache {
            if let Some(verdict) = cache.get(&key, &judge.judge_id).await {
                tracing::debug!(judge_id = %judge.judge_id, "Verdict cache hit");
                return Ok(verdict);
            }
        }

        let response = self
            .guard
            .invoke(ProbeKind::Judge, self.gateway.as_ref(), messages, &options)
            .await
            .map_err(|err| match err {
                ProviderError::BudgetExceeded(scope) => Miss::OverBudget(scope),
                err => {
                    tracing::warn!(judge_id = %judge.judge_id, model = %judge.model_id, error = %err, "Judge unavailable");
                    Miss::Failed(JudgeFailure {
                        judge_id: judge.judge_id.clone(),
                        model_id: judge.model_id.clone(),
                        kind: JudgeFailureKind::Unavailable,
                        reason: err.to_string(),
                    })
                }
            })?;

        let verdict = parse_judge_verdict(&judge.judge_id, &response.content, categories).map_err(|err| {
            let err = EvalError::MalformedJudgeOutput {
                judge_id: judge.judge_id.clone(),
                reason: err.to_string(),
            };
            tracing::warn!(model = %judge.model_id, error = %err, "Discarding judge verdict");
            Miss::Failed(JudgeFailure {
                judge_id: judge.judge_id.clone(),
                model_id: judge.model_id.clone(),
                kind: JudgeFailureKind::Malformed,
                reason: err.to_string(),
            })
        })?;

        if let Some(cache) = &self.cache {
            cache.insert(key, verdict.clone()).await;
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::testing::{quick_guard, support_categories, verdict_json, ScriptedGateway};
    use std::sync::atomic::Ordering;
    use vouch_core::{Confidence, Consensus, FinalVerdict};

    fn panel(gateway: Arc<ScriptedGateway>) -> JudgePanel {
        JudgePanel::new(gateway, Arc::new(quick_guard()))
    }

    fn billing() -> Prediction {
        Prediction::new("Billing", Confidence::new(0.8))
    }

    fn two_judges() -> Vec<JudgeSpec> {
        vec![JudgeSpec::new("j1", "model-a"), JudgeSpec::new("j2", "model-b")]
    }

    #[tokio::test]
    async fn test_agree_and_disagree_is_split() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            ("model-a", vec![Ok(verdict_json("AGREE", "Billing"))]),
            ("model-b", vec![Ok(verdict_json("DISAGREE", "Sales"))]),
        ]));

        let report = panel(gateway)
            .evaluate("Refund please", &billing(), &support_categories(), &EvaluationContext::new(), &two_judges())
            .await
            .unwrap();

        assert_eq!(report.usable_judges(), 2);
        assert!((report.agreement_rate() - 0.5).abs() < 1e-9);
        assert_eq!(report.consensus(), Consensus::SplitDecision);
        assert_eq!(report.verdicts()[0].judge_id, "j1");
    }

    #[tokio::test]
    async fn test_failed_judges_are_excluded_and_recorded() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            ("model-a", vec![Ok(verdict_json("AGREE", "Billing"))]),
            ("model-b", vec![Ok("I think it is fine".to_string())]),
            ("model-c", vec![Err(ProviderError::AuthError)]),
            ("model-d", vec![Ok(verdict_json("DISAGREE", "Shipping"))]),
        ]));
        let judges = vec![
            JudgeSpec::new("j1", "model-a"),
            JudgeSpec::new("j2", "model-b"),
            JudgeSpec::new("j3", "model-c"),
            JudgeSpec::new("j4", "model-d"),
        ];

        let report = panel(gateway)
            .evaluate("Refund please", &billing(), &support_categories(), &EvaluationContext::new(), &judges)
            .await
            .unwrap();

        assert_eq!(report.usable_judges(), 1);
        assert_eq!(report.consensus(), Consensus::StrongConsensus);
        assert_eq!(report.final_verdict(), FinalVerdict::Confirmed);

        let failures = report.failures();
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0].kind, JudgeFailureKind::Malformed);
        assert_eq!(failures[1].kind, JudgeFailureKind::Unavailable);
        // Out-of-set category makes the verdict malformed.
        assert_eq!(failures[2].judge_id, "j4");
        assert_eq!(failures[2].kind, JudgeFailureKind::Malformed);
    }

    #[tokio::test]
    async fn test_all_judges_failing() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let result = panel(gateway)
            .evaluate("t", &billing(), &support_categories(), &EvaluationContext::new(), &two_judges())
            .await;
        match result {
            Err(EvalError::AllJudgesFailed { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("expected AllJudgesFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_or_duplicate_panel_rejected() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let panel = panel(gateway.clone());
        let ctx = EvaluationContext::new();
        let cats = support_categories();

        assert!(matches!(
            panel.evaluate("t", &billing(), &cats, &ctx, &[]).await,
            Err(EvalError::InvalidInput(_))
        ));
        let dup = vec![JudgeSpec::new("j1", "a"), JudgeSpec::new("j1", "b")];
        assert!(matches!(
            panel.evaluate("t", &billing(), &cats, &ctx, &dup).await,
            Err(EvalError::InvalidInput(_))
        ));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_verdicts() {
        let gateway = Arc::new(ScriptedGateway::new(vec![(
            "model-a",
            vec![Ok(verdict_json("AGREE", "Billing"))],
        )]));
        let panel = panel(gateway.clone()).with_cache(Arc::new(VerdictCache::default()));
        let judges = vec![JudgeSpec::new("j1", "model-a")];
        let ctx = EvaluationContext::new();
        let cats = support_categories();

        let first = panel.evaluate("Refund", &billing(), &cats, &ctx, &judges).await.unwrap();
        let second = panel.evaluate("Refund", &billing(), &cats, &ctx, &judges).await.unwrap();

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.verdicts(), second.verdicts());
    }

    #[tokio::test]
    async fn test_cache_misses_when_the_prompt_changes() {
        let gateway = Arc::new(ScriptedGateway::new(vec![(
            "model-a",
            vec![Ok(verdict_json("AGREE", "Billing")), Ok(verdict_json("DISAGREE", "Sales"))],
        )]));
        let panel = panel(gateway.clone()).with_cache(Arc::new(VerdictCache::default()));
        let judges = vec![JudgeSpec::new("j1", "model-a")];
        let cats = support_categories();

        let subject = EvaluationContext::new().with_field_name("subject");
        let body = EvaluationContext::new().with_field_name("body");

        let first = panel.evaluate("Refund", &billing(), &cats, &subject, &judges).await.unwrap();
        let second = panel.evaluate("Refund", &billing(), &cats, &body, &judges).await.unwrap();

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.verdicts()[0].agreement, vouch_core::Agreement::Agree);
        assert_eq!(second.verdicts()[0].agreement, vouch_core::Agreement::Disagree);

        let mut hotter = judges.clone();
        hotter[0].temperature = 0.7;
        let third = panel.evaluate("Refund", &billing(), &cats, &subject, &hotter).await;
        assert!(third.is_err());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_refusal_is_not_an_unavailable_judge() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            ("model-a", vec![Ok(verdict_json("AGREE", "Billing"))]),
            ("model-b", vec![Ok(verdict_json("AGREE", "Billing"))]),
        ]));
        let guard = CallGuard::new(
            crate::resilience::CircuitBreaker::default(),
            crate::resilience::BudgetTracker::new(1_000_000, 10),
            crate::resilience::RetryConfig::default(),
            std::time::Duration::from_secs(5),
        );
        let panel = JudgePanel::new(gateway.clone(), Arc::new(guard));

        let result = panel
            .evaluate("Refund please", &billing(), &support_categories(), &EvaluationContext::new(), &two_judges())
            .await;
        match result {
            Err(EvalError::BudgetExhausted(scope)) => assert_eq!(scope, "judge"),
            other => panic!("expected BudgetExhausted, got {:?}", other),
        }
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }
}
