//! OpenAI-compatible Chat Completions gateway.
//!
//! Works against OpenAI and any server exposing `/chat/completions`
//! (OpenRouter, vLLM, LiteLLM proxies). Structured output is requested with
//! `response_format: json_schema` unless the server only understands
//! `json_object`.

use super::{
    factory::ProviderFactory,
    schema_instruction,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, GatewayResponse, InvokeOptions, ModelGateway, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiGateway {
    credential: ApiCredential,
    base_url: String,
    /// Send `json_schema` response formats; otherwise `json_object`
    structured_outputs: bool,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGateway")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("structured_outputs", &self.structured_outputs)
            .finish()
    }
}

impl OpenAiGateway {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(api_key, CredentialSource::Programmatic, "OpenAI API key"),
            base_url: DEFAULT_BASE_URL.to_string(),
            structured_outputs: true,
            client: reqwest::Client::new(),
        }
    }

    /// Build from provider options (`api_key`, `api_key_env`, `base_url`,
    /// `structured_outputs`), falling back to `OPENAI_API_KEY`.
    pub fn from_config(options: &JsonValue) -> Result<Self, ProviderError> {
        let credential =
            ApiCredential::from_config_or_env(options, "api_key", OPENAI_API_KEY_ENV, "OpenAI API key")?;

        Ok(Self {
            credential,
            base_url: options["base_url"]
                .as_str()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            structured_outputs: options["structured_outputs"].as_bool().unwrap_or(true),
            client: reqwest::Client::new(),
        })
    }

    fn build_request(&self, mut messages: Vec<ChatMessage>, options: &InvokeOptions) -> ChatRequest {
        let response_format = options.output_schema.map(|schema| {
            if self.structured_outputs {
                ResponseFormat::JsonSchema {
                    json_schema: JsonSchemaFormat {
                        name: schema.name(),
                        schema: schema.schema().clone(),
                        strict: false,
                    },
                }
            } else {
                // json_object mode only guarantees JSON, so spell out the shape.
                messages.insert(0, ChatMessage::system(schema_instruction(schema)));
                ResponseFormat::JsonObject
            }
        });

        ChatRequest {
            model: options.model.clone(),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_output_tokens,
            response_format,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonObject,
    JsonSchema { json_schema: JsonSchemaFormat },
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    schema: JsonValue,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        options: &InvokeOptions,
    ) -> Result<GatewayResponse, ProviderError> {
        let request = self.build_request(messages, options);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(options.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(ProviderError::from_status(status.as_u16(), message, retry_after));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        if let Some(refusal) = choice.message.refusal {
            return Err(ProviderError::Rejected(refusal));
        }
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::Rejected("content filtered".to_string()));
        }

        let usage = body.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });

        Ok(GatewayResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: body.model.unwrap_or_else(|| options.model.clone()),
            stop_reason: choice.finish_reason,
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Factory for [`OpenAiGateway`].
pub struct OpenAiGatewayFactory;

impl ProviderFactory for OpenAiGatewayFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, options: &JsonValue) -> Result<Arc<dyn ModelGateway>, ProviderError> {
        Ok(Arc::new(OpenAiGateway::from_config(options)?))
    }

    fn validate_config(&self, options: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(options, "api_key", OPENAI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenAI API key required: set 'api_key' in config or {} env",
                OPENAI_API_KEY_ENV
            )));
        }
        if let Some(url) = options["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "structured_outputs": true })
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible Chat Completions"
    }
}
