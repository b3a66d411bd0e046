//! Synthetic validator: generate labeled examples, then classify them.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use vouch_core::{
    difficulty_plan, parse_synthetic_examples, Category, CategorySet, Difficulty, ExampleOutcome,
    OutputSchema, ProbeKind, SyntheticExample, SyntheticReport,
};

use super::{cancellable, EvalError};
use crate::classifier::Classifier;
use crate::config::ModelConfig;
use crate::context::EvaluationContext;
use crate::prompts::generation_messages;
use crate::providers::{InvokeOptions, ModelGateway, ProviderError};
use crate::resilience::CallGuard;

/// Pick exactly `requested` examples following `plan`.
///
/// Each level takes its quota in response order; unused examples then top up
/// any level that came back short. Surplus is dropped.
pub fn select_by_plan(
    examples: Vec<SyntheticExample>,
    plan: &[(Difficulty, usize)],
    requested: usize,
) -> Result<Vec<SyntheticExample>, EvalError> {
    let received = examples.len();
    let mut pool: Vec<Option<SyntheticExample>> = examples.into_iter().map(Some).collect();
    let mut selected = Vec::with_capacity(requested);

    for (level, quota) in plan {
        let mut taken = 0;
        for slot in pool.iter_mut() {
            if taken == *quota {
                break;
            }
            if slot.as_ref().is_some_and(|e| e.difficulty == *level) {
                if let Some(example) = slot.take() {
                    selected.push(example);
                    taken += 1;
                }
            }
        }
    }

    let leftovers = pool.into_iter().flatten();
    let missing = requested.saturating_sub(selected.len());
    selected.extend(leftovers.take(missing));

    if selected.len() < requested {
        return Err(EvalError::GenerationShortfall {
            requested,
            received,
        });
    }
    Ok(selected)
}

/// Checks the classifier against examples whose label is known by
/// construction.
pub struct SyntheticValidator {
    gateway: Arc<dyn ModelGateway>,
    classifier: Arc<dyn Classifier>,
    guard: Arc<CallGuard>,
    generator: ModelConfig,
    max_concurrency: usize,
}

impl SyntheticValidator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        classifier: Arc<dyn Classifier>,
        guard: Arc<CallGuard>,
        generator: ModelConfig,
    ) -> Self {
        Self {
            gateway,
            classifier,
            guard,
            generator,
            max_concurrency: 4,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Ask the generator for exactly `num_examples` examples of `category`.
    #[tracing::instrument(skip_all, fields(probe = "synthetic", category = %category.name, num_examples = num_examples))]
    pub async fn generate(
        &self,
        category: &Category,
        num_examples: usize,
        difficulty_levels: &[Difficulty],
        ctx: &EvaluationContext,
    ) -> Result<Vec<SyntheticExample>, EvalError> {
        let plan = difficulty_plan(num_examples, difficulty_levels)?;
        let messages = generation_messages(category, &plan);
        let options = InvokeOptions::new(&self.generator.model)
            .temperature(self.generator.temperature)
            .max_output_tokens(self.generator.max_output_tokens)
            .timeout(self.guard.call_timeout())
            .output_schema(OutputSchema::SyntheticExamples);

        let work = async {
            let response = self
                .guard
                .invoke(ProbeKind::Synthetic, self.gateway.as_ref(), &messages, &options)
                .await?;
            let parsed = parse_synthetic_examples(&response.content, &category.name)?;
            if parsed.len() != num_examples {
                tracing::debug!(received = parsed.len(), "Generator count differs from request");
            }
            select_by_plan(parsed, &plan, num_examples)
        };

        cancellable(ctx, work).await
    }

    /// Classify every example and score against its label.
    ///
    /// All examples must share one category that belongs to `categories`.
    /// A classification refused by the token budget fails the whole
    /// validation rather than counting as a wrong answer.
    #[tracing::instrument(skip_all, fields(probe = "synthetic", examples = examples.len()))]
    pub async fn validate(
        &self,
        examples: &[SyntheticExample],
        categories: &CategorySet,
        ctx: &EvaluationContext,
    ) -> Result<SyntheticReport, EvalError> {
        let Some(first) = examples.first() else {
            return Err(EvalError::InvalidInput("no examples to validate".into()));
        };
        let category = first.category.trim();
        if examples.iter().any(|e| e.category.trim() != category) {
            return Err(EvalError::InvalidInput(
                "examples span more than one category".into(),
            ));
        }
        if !categories.contains(category) {
            return Err(EvalError::InvalidInput(format!(
                "category '{}' is not in the category set",
                category
            )));
        }

        let work = async {
            let mut results: Vec<_> = stream::iter(examples.iter().enumerate().map(|(index, example)| {
                let request = ctx.classify_request(&example.text, categories);
                async move {
                    let result = self
                        .guard
                        .classify(ProbeKind::Synthetic, self.classifier.as_ref(), request)
                        .await;
                    (index, result)
                }
            }))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
            results.sort_by_key(|(index, _)| *index);

            if let Some(scope) = results.iter().find_map(|(_, result)| match result {
                Err(ProviderError::BudgetExceeded(scope)) => Some(scope.clone()),
                _ => None,
            }) {
                return Err(EvalError::BudgetExhausted(scope));
            }

            let outcomes = results
                .into_iter()
                .zip(examples)
                .map(|((_, result), example)| match result {
                    Ok(prediction) => {
                        ExampleOutcome::classified(example.clone(), prediction.predicted_category)
                            .with_confidence(prediction.confidence.value())
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Classifier failed on synthetic example");
                        ExampleOutcome::failed(example.clone(), err.to_string())
                    }
                })
                .collect();

            Ok::<_, EvalError>(SyntheticReport::new(category, outcomes)?)
        };

        let report = cancellable(ctx, work).await?;
        tracing::info!(
            accuracy = report.accuracy(),
            quality = report.quality_assessment().as_str(),
            "Synthetic validation finished"
        );
        Ok(report)
    }

    /// Generate for `category` and validate in one go.
    pub async fn run(
        &self,
        category: &str,
        categories: &CategorySet,
        ctx: &EvaluationContext,
        num_examples: usize,
        difficulty_levels: &[Difficulty],
    ) -> Result<SyntheticReport, EvalError> {
        let target = categories.resolve(category).ok_or_else(|| {
            EvalError::InvalidInput(format!("category '{}' is not in the category set", category.trim()))
        })?;
        let examples = self
            .generate(target, num_examples, difficulty_levels, ctx)
            .await?;
        self.validate(&examples, categories, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::testing::{quick_guard, support_categories, ScriptedClassifier, ScriptedGateway};
    use std::sync::atomic::Ordering;
    use vouch_core::QualityAssessment;

    const GENERATOR: &str = "generator-model";

    fn example(text: &str, difficulty: Difficulty) -> SyntheticExample {
        SyntheticExample {
            text: text.to_string(),
            category: "Billing".to_string(),
            difficulty,
            reasoning: None,
        }
    }

    fn generator_config() -> ModelConfig {
        ModelConfig {
            model: GENERATOR.to_string(),
            temperature: 0.7,
            max_output_tokens: 2000,
        }
    }

    fn validator(gateway: Arc<ScriptedGateway>, classifier: Arc<ScriptedClassifier>) -> SyntheticValidator {
        SyntheticValidator::new(gateway, classifier, Arc::new(quick_guard()), generator_config())
    }

    const FIVE_EXAMPLES: &str = r#"```json
[
  {"text": "I was charged twice", "difficulty": "easy"},
  {"text": "Refund for last month", "difficulty": "medium"},
  {"text": "Invoice shows wrong VAT", "difficulty": "medium"},
  {"text": "Card declined but order placed", "difficulty": "hard"},
  {"text": "Plan downgrade proration", "difficulty": "hard"}
]
```"#;

    #[test]
    fn test_select_fills_quotas_in_order() {
        let examples = vec![
            example("h1", Difficulty::Hard),
            example("e1", Difficulty::Easy),
            example("e2", Difficulty::Easy),
            example("h2", Difficulty::Hard),
        ];
        let plan = vec![(Difficulty::Easy, 1), (Difficulty::Hard, 2)];
        let selected = select_by_plan(examples, &plan, 3).unwrap();
        let texts: Vec<_> = selected.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["e1", "h1", "h2"]);
    }

    #[test]
    fn test_select_tops_up_short_levels() {
        let examples = vec![
            example("e1", Difficulty::Easy),
            example("e2", Difficulty::Easy),
            example("e3", Difficulty::Easy),
        ];
        let plan = vec![(Difficulty::Easy, 1), (Difficulty::Hard, 2)];
        let selected = select_by_plan(examples, &plan, 3).unwrap();
        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].text, "e1");
    }

    #[test]
    fn test_select_reports_shortfall() {
        let examples = vec![example("e1", Difficulty::Easy)];
        let plan = vec![(Difficulty::Easy, 2)];
        assert!(matches!(
            select_by_plan(examples, &plan, 2),
            Err(EvalError::GenerationShortfall {
                requested: 2,
                received: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_generate_labels_by_construction() {
        let gateway = Arc::new(ScriptedGateway::new(vec![(GENERATOR, vec![Ok(FIVE_EXAMPLES.to_string())])]));
        let classifier = Arc::new(ScriptedClassifier::sequence(vec![]));
        let categories = support_categories();
        let billing = categories.get("Billing").unwrap();

        let examples = validator(gateway, classifier)
            .generate(billing, 5, &Difficulty::ALL, &EvaluationContext::new())
            .await
            .unwrap();

        assert_eq!(examples.len(), 5);
        assert!(examples.iter().all(|e| e.category == "Billing"));
        assert_eq!(examples[0].difficulty, Difficulty::Easy);
    }

    #[tokio::test]
    async fn test_generation_failure_aborts_before_classification() {
        let gateway = Arc::new(ScriptedGateway::new(vec![(
            GENERATOR,
            vec![Err(ProviderError::ApiError {
                status: 500,
                message: "boom".into(),
            })],
        )]));
        let classifier = Arc::new(ScriptedClassifier::sequence(vec![Ok("Billing".into())]));

        let result = validator(gateway, classifier.clone())
            .run("Billing", &support_categories(), &EvaluationContext::new(), 5, &Difficulty::ALL)
            .await;

        assert!(matches!(result, Err(EvalError::Provider(_))));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_four_of_five_is_moderate() {
        let gateway = Arc::new(ScriptedGateway::new(vec![(GENERATOR, vec![Ok(FIVE_EXAMPLES.to_string())])]));
        let classifier = Arc::new(ScriptedClassifier::by_text(vec![
            ("I was charged twice", Ok("Billing".into())),
            ("Refund for last month", Ok("Billing".into())),
            ("Invoice shows wrong VAT", Ok(" Billing ".into())),
            ("Card declined but order placed", Ok("Technical Support".into())),
            ("Plan downgrade proration", Ok("Billing".into())),
        ]));

        let report = validator(gateway, classifier)
            .run("Billing", &support_categories(), &EvaluationContext::new(), 5, &Difficulty::ALL)
            .await
            .unwrap();

        assert_eq!(report.total(), 5);
        assert_eq!(report.correct(), 4);
        assert!((report.accuracy() - 80.0).abs() < 1e-9);
        assert_eq!(report.quality_assessment(), QualityAssessment::Moderate);
        assert!(report.outcomes().iter().all(|o| o.confidence() == Some(0.8)));
    }

    #[tokio::test]
    async fn test_budget_refusal_does_not_lower_accuracy() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let classifier = Arc::new(ScriptedClassifier::sequence(vec![Ok("Billing".into()); 2]));
        let guard = CallGuard::new(
            crate::resilience::CircuitBreaker::default(),
            crate::resilience::BudgetTracker::new(1_000_000, 1),
            crate::resilience::RetryConfig::default(),
            std::time::Duration::from_secs(5),
        );
        let validator = SyntheticValidator::new(gateway, classifier.clone(), Arc::new(guard), generator_config());
        let examples = vec![example("a", Difficulty::Easy), example("b", Difficulty::Hard)];

        let result = validator
            .validate(&examples, &support_categories(), &EvaluationContext::new())
            .await;
        assert!(matches!(result, Err(EvalError::BudgetExhausted(_))));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_classifier_failure_is_incorrect_with_error() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let classifier = Arc::new(ScriptedClassifier::by_text(vec![
            ("a", Ok("Billing".into())),
            ("b", Err(ProviderError::Rejected("policy".into()))),
        ]));
        let examples = vec![example("a", Difficulty::Easy), example("b", Difficulty::Hard)];

        let report = validator(gateway, classifier)
            .validate(&examples, &support_categories(), &EvaluationContext::new())
            .await
            .unwrap();

        assert_eq!(report.correct(), 1);
        assert_eq!(report.errored(), 1);
        assert!(report.outcomes()[1].error().is_some());
        assert_eq!(report.outcomes()[1].confidence(), None);
        assert_eq!(report.outcomes()[0].example().text, "a");
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_input() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let classifier = Arc::new(ScriptedClassifier::sequence(vec![]));
        let validator = validator(gateway, classifier);
        let ctx = EvaluationContext::new();
        let cats = support_categories();

        assert!(matches!(
            validator.validate(&[], &cats, &ctx).await,
            Err(EvalError::InvalidInput(_))
        ));

        let mut stray = example("x", Difficulty::Easy);
        stray.category = "Shipping".into();
        assert!(matches!(
            validator.validate(&[stray], &cats, &ctx).await,
            Err(EvalError::InvalidInput(_))
        ));

        assert!(matches!(
            validator.run("Shipping", &cats, &ctx, 5, &Difficulty::ALL).await,
            Err(EvalError::InvalidInput(_))
        ));
    }
}
