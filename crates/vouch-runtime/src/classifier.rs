//! The classifier under evaluation.
//!
//! Vouch never classifies on its own behalf; probes call back into whatever
//! classifier the caller supplies through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vouch_core::{CategorySet, Prediction};

use crate::providers::ProviderError;

/// A labeled example shown to the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub text: String,
    pub category: String,
}

impl FewShotExample {
    pub fn new(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
        }
    }
}

/// One classification call.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    pub text: &'a str,
    pub categories: &'a CategorySet,
    pub temperature: f64,
    pub few_shot_examples: &'a [FewShotExample],
    /// Reviewer feedback from an earlier attempt
    pub feedback: Option<&'a str>,
    /// Name of the field being classified, e.g. "ticket_category"
    pub field_name: Option<&'a str>,
    /// Model override; the classifier's default when `None`
    pub model: Option<&'a str>,
}

impl<'a> ClassifyRequest<'a> {
    pub fn new(text: &'a str, categories: &'a CategorySet) -> Self {
        Self {
            text,
            categories,
            temperature: 0.1,
            few_shot_examples: &[],
            feedback: None,
            field_name: None,
            model: None,
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Rough prompt size, ~4 chars per token.
    pub fn estimated_tokens(&self) -> u32 {
        let categories: usize = self
            .categories
            .iter()
            .map(|c| {
                c.name.len() + c.description.len() + c.boundary_notes.as_deref().map_or(0, str::len)
            })
            .sum();
        let examples: usize = self
            .few_shot_examples
            .iter()
            .map(|e| e.text.len() + e.category.len())
            .sum();
        let feedback = self.feedback.map_or(0, str::len);
        ((self.text.len() + categories + examples + feedback) / 4) as u32
    }
}

/// A classifier that can be probed.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<Prediction, ProviderError>;

    /// Identifies the classifier in logs and circuit state.
    fn name(&self) -> &str;
}
