#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use vouch_core::{Category, CategorySet, Confidence, Prediction};
use vouch_runtime::{
    ChatMessage, ClassifyRequest, Classifier, GatewayResponse, InvokeOptions, JudgeSpec,
    ModelGateway, ProviderError, RetryConfig, RuntimeConfig, TokenUsage,
};

pub const GENERATOR: &str = "generator-model";

pub fn categories() -> CategorySet {
    CategorySet::new(vec![
        Category::new("Technical Support", "Problems using the product"),
        Category::new("Billing", "Invoices, refunds and charges"),
        Category::new("Sales", "Questions before buying"),
    ])
    .unwrap()
}

/// Two judges on separate models, no retries.
pub fn config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.generator.model = GENERATOR.to_string();
    config.judges = vec![
        JudgeSpec::new("judge-1", "judge-model-a"),
        JudgeSpec::new("judge-2", "judge-model-b"),
    ];
    config.retry = RetryConfig {
        max_retries: 0,
        ..Default::default()
    };
    config
}

pub fn prediction(category: &str) -> Prediction {
    Prediction::new(category, Confidence::new(0.9))
}

pub fn verdict(agreement: &str, category: &str) -> String {
    serde_json::json!({
        "independent_classification": category,
        "agreement": agreement,
        "reasoning_quality": 4,
        "judge_confidence": 0.9,
        "explanation": "fixture"
    })
    .to_string()
}

/// Generator output for five examples: one easy, two medium, two hard.
pub fn five_examples(texts: [&str; 5]) -> String {
    let difficulties = ["easy", "medium", "medium", "hard", "hard"];
    let examples: Vec<_> = texts
        .iter()
        .zip(difficulties)
        .map(|(text, difficulty)| serde_json::json!({ "text": text, "difficulty": difficulty }))
        .collect();
    serde_json::json!({ "examples": examples }).to_string()
}

type Answer = Result<String, ProviderError>;

/// Answers per model id, in order.
pub struct FixtureGateway {
    answers: Mutex<HashMap<String, VecDeque<Answer>>>,
    usage: TokenUsage,
    pub calls: AtomicU32,
}

impl FixtureGateway {
    pub fn new(answers: Vec<(&str, Vec<Answer>)>) -> Self {
        Self {
            answers: Mutex::new(
                answers
                    .into_iter()
                    .map(|(model, queue)| (model.to_string(), queue.into()))
                    .collect(),
            ),
            usage: TokenUsage {
                prompt_tokens: 200,
                completion_tokens: 40,
            },
            calls: AtomicU32::new(0),
        }
    }

    /// Report this usage for every answered call.
    pub fn reporting(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
        };
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for FixtureGateway {
    async fn invoke(
        &self,
        _messages: Vec<ChatMessage>,
        options: &InvokeOptions,
    ) -> Result<GatewayResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answers
            .lock()
            .get_mut(&options.model)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ProviderError::HttpError("connection refused".into())));
        answer.map(|content| GatewayResponse {
            content,
            usage: self.usage,
            model: options.model.clone(),
            stop_reason: Some("end_turn".into()),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "fixture"
    }
}

/// Fixed answers per text; other texts take answers from a queue.
pub struct FixtureClassifier {
    by_text: HashMap<String, Answer>,
    queue: Mutex<VecDeque<Answer>>,
    delay: Option<Duration>,
    pub calls: AtomicU32,
}

impl FixtureClassifier {
    pub fn new() -> Self {
        Self {
            by_text: HashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn answer(mut self, text: &str, category: &str) -> Self {
        self.by_text.insert(text.to_string(), Ok(category.to_string()));
        self
    }

    pub fn then(self, category: &str, times: usize) -> Self {
        self.queue
            .lock()
            .extend(std::iter::repeat(Ok(category.to_string())).take(times));
        self
    }

    pub fn failing(self, times: usize) -> Self {
        self.queue.lock().extend(
            std::iter::repeat(Err(ProviderError::ApiError {
                status: 503,
                message: "outage".into(),
            })).take(times),
        );
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for FixtureClassifier {
    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<Prediction, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = match self.by_text.get(request.text) {
            Some(answer) => answer.clone(),
            None => self
                .queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::HttpError("connection refused".into()))),
        };
        answer.map(|category| Prediction::new(category, Confidence::new(0.8)))
    }

    fn name(&self) -> &str {
        "fixture-classifier"
    }
}
