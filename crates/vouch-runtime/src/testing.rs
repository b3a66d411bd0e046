//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use vouch_core::{Category, CategorySet, Confidence, Prediction};

use crate::classifier::{ClassifyRequest, Classifier};
use crate::providers::{ChatMessage, GatewayResponse, InvokeOptions, ModelGateway, ProviderError, TokenUsage};
use crate::resilience::{BudgetTracker, CallGuard, CircuitBreaker, RetryConfig};

pub(crate) fn support_categories() -> CategorySet {
    CategorySet::new(vec![
        Category::new("Technical Support", "Problems using the product"),
        Category::new("Billing", "Invoices, refunds and charges"),
        Category::new("Sales", "Questions before buying"),
    ])
    .unwrap()
}

/// Guard without retries or delays.
pub(crate) fn quick_guard() -> CallGuard {
    CallGuard::new(
        CircuitBreaker::default(),
        BudgetTracker::default(),
        RetryConfig {
            max_retries: 0,
            ..Default::default()
        },
        Duration::from_secs(5),
    )
}

type Answer = Result<String, ProviderError>;

/// Classifier that answers from a queue, or per text.
pub(crate) struct ScriptedClassifier {
    queue: Mutex<VecDeque<Answer>>,
    by_text: HashMap<String, Answer>,
    pub calls: AtomicU32,
}

impl ScriptedClassifier {
    pub fn sequence(answers: Vec<Answer>) -> Self {
        Self {
            queue: Mutex::new(answers.into()),
            by_text: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn by_text(answers: Vec<(&str, Answer)>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            by_text: answers
                .into_iter()
                .map(|(text, answer)| (text.to_string(), answer))
                .collect(),
            calls: AtomicU32::new(0),
        }
    }

    /// Queue answers for texts without a fixed answer.
    pub fn with_sequence(mut self, answers: Vec<Answer>) -> Self {
        self.queue = Mutex::new(answers.into());
        self
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<Prediction, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = match self.by_text.get(request.text) {
            Some(answer) => answer.clone(),
            None => self
                .queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::HttpError("script exhausted".into()))),
        };
        answer.map(|category| Prediction::new(category, Confidence::new(0.8)))
    }

    fn name(&self) -> &str {
        "scripted-classifier"
    }
}

/// Gateway that answers per model id from queues.
pub(crate) struct ScriptedGateway {
    per_model: Mutex<HashMap<String, VecDeque<Answer>>>,
    pub calls: AtomicU32,
}

impl ScriptedGateway {
    pub fn new(script: Vec<(&str, Vec<Answer>)>) -> Self {
        Self {
            per_model: Mutex::new(
                script
                    .into_iter()
                    .map(|(model, answers)| (model.to_string(), answers.into()))
                    .collect(),
            ),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn invoke(
        &self,
        _messages: Vec<ChatMessage>,
        options: &InvokeOptions,
    ) -> Result<GatewayResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .per_model
            .lock()
            .get_mut(&options.model)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ProviderError::HttpError("script exhausted".into())));

        answer.map(|content| GatewayResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            },
            model: options.model.clone(),
            stop_reason: Some("end_turn".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// JSON verdict as a judge model would write it.
pub(crate) fn verdict_json(agreement: &str, category: &str) -> String {
    format!(
        r#"{{"independent_classification": "{}", "agreement": "{}", "reasoning_quality": 4, "judge_confidence": 0.85, "explanation": "scripted"}}"#,
        category, agreement
    )
}
