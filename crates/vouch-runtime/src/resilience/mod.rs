//! Resilience patterns for vouch-runtime.
//!
//! This module provides:
//! - Per-model circuit breaker
//! - Token budgets per probe and globally
//! - Timeout and retry with backoff, combined in [`CallGuard`]

mod budget;
mod circuit_breaker;
mod retry;

pub use budget::{BudgetTracker, ProbeUsage, TokenBudget, UsageReport};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{CallGuard, RetryConfig};
