//! # vouch-runtime
//!
//! Model-backed probes for label-free classification evaluation.
//!
//! `vouch-core` scores recorded outcomes. This crate produces those outcomes
//! by calling models:
//! - [`StabilityProbe`] re-classifies one text across temperatures
//! - [`SyntheticValidator`] generates labeled examples and checks the classifier on them
//! - [`JudgePanel`] asks independent judge models to review a prediction
//! - [`Evaluator`] runs any subset of the three concurrently and decides
//!
//! Every model call goes through a [`CallGuard`]: token budget, per-model
//! circuit breaker, timeout and retry with backoff.
//!
//! ## Example
//!
//! ```rust,ignore
//! use vouch_runtime::{Evaluator, EvaluationContext, ProbeSelection, ProviderRegistry, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_file("vouch.yaml")?;
//! let evaluator = Evaluator::builder()
//!     .config(config)
//!     .gateway_from_registry(&ProviderRegistry::with_defaults())
//!     .classifier(my_classifier)
//!     .build()?;
//!
//! let outcome = evaluator
//!     .evaluate(text, &categories, &prediction, &EvaluationContext::new(), ProbeSelection::all())
//!     .await?;
//! println!("{}", outcome.decision.action);
//! ```

pub mod cache;
pub mod classifier;
pub mod config;
pub mod context;
pub mod orchestrator;
pub mod probes;
pub mod prompts;
pub mod providers;
pub mod resilience;

#[cfg(test)]
mod testing;

pub use cache::{VerdictCache, VerdictKey};
pub use classifier::{Classifier, ClassifyRequest, FewShotExample};
pub use config::{
    BudgetConfig, CacheConfig, ConfigError, JudgeSpec, ModelConfig, ProviderConfig, RuntimeConfig,
    StabilityConfig, SyntheticConfig,
};
pub use context::EvaluationContext;
pub use orchestrator::{EvaluationOutcome, Evaluator, EvaluatorBuilder, ProbeSelection};
pub use probes::{EvalError, JudgePanel, ProbeStatus, StabilityProbe, SyntheticValidator};
pub use providers::{
    ChatMessage, GatewayResponse, InvokeOptions, ModelGateway, ProviderError, ProviderFactory,
    ProviderRegistry, TokenUsage,
};
pub use resilience::{
    BudgetTracker, CallGuard, CircuitBreaker, CircuitBreakerConfig, RetryConfig, UsageReport,
};
