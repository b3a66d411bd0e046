//! Prompt adapter that classifies through the configured gateway.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use vouch_core::{parse_structured, OutputSchema, Prediction};
use vouch_runtime::prompts::classification_messages;
use vouch_runtime::{
    ClassifyRequest, Classifier, InvokeOptions, ModelConfig, ModelGateway, ProviderError,
};

/// Classifier backed by a plain model call.
pub struct GatewayClassifier {
    gateway: Arc<dyn ModelGateway>,
    model: ModelConfig,
    call_timeout: Duration,
}

impl GatewayClassifier {
    pub fn new(gateway: Arc<dyn ModelGateway>, model: ModelConfig, call_timeout: Duration) -> Self {
        Self {
            gateway,
            model,
            call_timeout,
        }
    }
}

#[async_trait]
impl Classifier for GatewayClassifier {
    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<Prediction, ProviderError> {
        let model = request.model.unwrap_or(&self.model.model);
        let options = InvokeOptions::new(model)
            .temperature(request.temperature)
            .max_output_tokens(self.model.max_output_tokens)
            .timeout(self.call_timeout)
            .output_schema(OutputSchema::Prediction);

        let response = self
            .gateway
            .invoke(classification_messages(&request), &options)
            .await?;

        let value = parse_structured(&response.content, OutputSchema::Prediction)
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| ProviderError::ParseError(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.model.model
    }
}
