//! Guarded model calls: budget, circuit breaker, timeout and retry.

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use vouch_core::{Prediction, ProbeKind};

use super::{BudgetTracker, CircuitBreaker};
use crate::classifier::{ClassifyRequest, Classifier};
use crate::config::humantime_duration;
use crate::providers::{ChatMessage, GatewayResponse, InvokeOptions, ModelGateway, ProviderError, TokenUsage};

/// Exponential backoff for transient provider errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,

    #[serde(with = "humantime_duration")]
    pub min_delay: Duration,

    #[serde(with = "humantime_duration")]
    pub max_delay: Duration,

    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Wraps every remote call a probe makes.
///
/// Order per call: budget check, then per attempt a circuit check and a
/// timeout, with retries only for [`ProviderError::is_retryable`] errors.
/// A rate limit's `retry_after` is a lower bound on the wait before the next
/// attempt.
pub struct CallGuard {
    breaker: CircuitBreaker,
    budget: BudgetTracker,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl CallGuard {
    pub fn new(
        breaker: CircuitBreaker,
        budget: BudgetTracker,
        retry: RetryConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            breaker,
            budget,
            retry,
            call_timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Invoke a gateway and account the reported usage.
    pub async fn invoke(
        &self,
        probe: ProbeKind,
        gateway: &dyn ModelGateway,
        messages: &[ChatMessage],
        options: &InvokeOptions,
    ) -> Result<GatewayResponse, ProviderError> {
        let estimated = messages
            .iter()
            .map(|m| gateway.estimate_tokens(&m.content))
            .sum::<u32>()
            .saturating_add(options.max_output_tokens);

        let response = self
            .guarded(probe, &options.model, estimated, || {
                gateway.invoke(messages.to_vec(), options)
            })
            .await?;

        self.budget.record_usage(probe, &response.usage);
        Ok(response)
    }

    /// Run the classifier under test.
    ///
    /// Classifiers do not report usage, so the prompt estimate is accounted.
    pub async fn classify(
        &self,
        probe: ProbeKind,
        classifier: &dyn Classifier,
        request: ClassifyRequest<'_>,
    ) -> Result<Prediction, ProviderError> {
        let model = request.model.unwrap_or_else(|| classifier.name());
        let estimated = request.estimated_tokens();

        let prediction = self
            .guarded(probe, model, estimated, || classifier.classify(request))
            .await?;

        self.budget.record_usage(
            probe,
            &TokenUsage {
                prompt_tokens: estimated,
                completion_tokens: 0,
            },
        );
        Ok(prediction)
    }

    async fn guarded<T, F, Fut>(
        &self,
        probe: ProbeKind,
        model: &str,
        estimated_tokens: u32,
        op: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if !self.budget.can_afford(probe, estimated_tokens) {
            tracing::warn!(%probe, model, estimated_tokens, "Call refused by token budget");
            return Err(ProviderError::BudgetExceeded(probe.to_string()));
        }

        let attempts = AtomicU32::new(0);
        let call_timeout = self.call_timeout;
        let breaker = &self.breaker;
        let max_attempts = u32::try_from(self.retry.max_retries)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        // Backoff always waits at least `min_delay` after this.
        let min_delay = self.retry.min_delay;

        let attempt_once = || {
            let call = op();
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                if breaker.is_open(model) {
                    return Err(ProviderError::CircuitOpen(model.to_string()));
                }
                tracing::debug!(%probe, model, attempt, "Model call");

                let result = match tokio::time::timeout(call_timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(call_timeout)),
                };

                match &result {
                    Ok(_) => breaker.record_success(model),
                    Err(e) if e.is_retryable() => breaker.record_failure(model),
                    Err(_) => {}
                }

                if let Err(ProviderError::RateLimited {
                    retry_after: Some(hint),
                }) = &result
                {
                    if attempt < max_attempts {
                        let wait = hint.saturating_sub(min_delay);
                        tracing::debug!(%probe, model, ?hint, "Honoring provider retry-after");
                        tokio::time::sleep(wait).await;
                    }
                }
                result
            }
        };

        attempt_once
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(ProviderError::is_retryable)
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::warn!(
                    %probe,
                    model,
                    attempt = attempts.load(Ordering::Relaxed),
                    error = %err,
                    ?delay,
                    "Retrying model call"
                );
            })
            .await
    }
}

impl Default for CallGuard {
    fn default() -> Self {
        Self::new(
            CircuitBreaker::default(),
            BudgetTracker::default(),
            RetryConfig::default(),
            Duration::from_secs(30),
        )
    }
}
