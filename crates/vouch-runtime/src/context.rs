//! Per-evaluation context passed into every probe call.

use tokio_util::sync::CancellationToken;

use crate::classifier::{ClassifyRequest, FewShotExample};
use vouch_core::CategorySet;

/// Settings for the classifier under test plus the cancellation handle.
///
/// Nothing here is global: two evaluations with different contexts can run
/// side by side.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Model override for the classifier
    pub classifier_model: Option<String>,

    /// Temperature for non-stability classifier calls
    pub classifier_temperature: f64,

    pub field_name: Option<String>,

    pub few_shot_examples: Vec<FewShotExample>,

    pub feedback: Option<String>,

    cancellation: CancellationToken,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self {
            classifier_model: None,
            classifier_temperature: 0.1,
            field_name: None,
            few_shot_examples: Vec::new(),
            feedback: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifier_model(mut self, model: impl Into<String>) -> Self {
        self.classifier_model = Some(model.into());
        self
    }

    pub fn with_classifier_temperature(mut self, temperature: f64) -> Self {
        self.classifier_temperature = temperature;
        self
    }

    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn with_few_shot_examples(mut self, examples: Vec<FewShotExample>) -> Self {
        self.few_shot_examples = examples;
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    /// Tie this evaluation to an external token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Request for `text` at the context's default temperature.
    pub fn classify_request<'a>(
        &'a self,
        text: &'a str,
        categories: &'a CategorySet,
    ) -> ClassifyRequest<'a> {
        ClassifyRequest {
            text,
            categories,
            temperature: self.classifier_temperature,
            few_shot_examples: &self.few_shot_examples,
            feedback: self.feedback.as_deref(),
            field_name: self.field_name.as_deref(),
            model: self.classifier_model.as_deref(),
        }
    }
}
