//! Model gateway abstractions for vouch-runtime.
//!
//! Every remote model call made by the probes goes through a
//! [`ModelGateway`]. Implementations exist for the Anthropic Messages API
//! and OpenAI-compatible Chat Completions endpoints; both are selected by
//! explicit configuration through the [`ProviderRegistry`].
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use vouch_core::OutputSchema;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicGateway, AnthropicGatewayFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiGateway, OpenAiGatewayFactory};

/// Errors from model gateways.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// The request was refused and repeating it will not help.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Circuit open for model '{0}'")]
    CircuitOpen(String),

    #[error("Token budget exceeded for {0}")]
    BudgetExceeded(String),
}

impl ProviderError {
    /// Transport failures, rate limiting, 5xx and timeouts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 408,
            Self::Rejected(_)
            | Self::ParseError(_)
            | Self::AuthError
            | Self::NotConfigured(_)
            | Self::CircuitOpen(_)
            | Self::BudgetExceeded(_) => false,
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::AuthError,
            408 => Self::ApiError { status, message },
            400..=499 => Self::Rejected(format!("{}: {}", status, message)),
            _ => Self::ApiError { status, message },
        }
    }
}

/// Options for a single gateway call.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub model: String,

    pub temperature: f64,

    pub max_output_tokens: u32,

    /// Request timeout
    pub timeout: Duration,

    /// Ask the provider for output matching this schema
    pub output_schema: Option<OutputSchema>,
}

impl InvokeOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            temperature: 0.1,
            max_output_tokens: 2000,
            timeout: Duration::from_secs(30),
            output_schema: None,
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Response from a gateway call.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub content: String,

    pub usage: TokenUsage,

    /// Model that actually served the request
    pub model: String,

    pub stop_reason: Option<String>,
}

/// Token usage from a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,

    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Abstraction over model vendors.
///
/// The probes never talk to a vendor directly; swapping a backend means
/// registering another factory.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        options: &InvokeOptions,
    ) -> Result<GatewayResponse, ProviderError>;

    async fn health_check(&self) -> bool;

    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Rough token estimate, ~4 chars per token.
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.len() / 4) as u32
    }
}

/// Instruction appended to the system prompt for providers without native
/// schema enforcement.
pub fn schema_instruction(schema: OutputSchema) -> String {
    format!(
        "Respond with a single JSON value and nothing else. It must validate against this JSON Schema ({}):\n{}",
        schema.name(),
        schema.schema()
    )
}
