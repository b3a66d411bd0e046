//! Token budgets for model calls.
//!
//! Usage is accounted per probe and globally. A call whose estimate would
//! exceed either budget is refused before it is sent.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use vouch_core::ProbeKind;

use crate::providers::TokenUsage;

/// Token budget for one scope.
pub struct TokenBudget {
    pub max_tokens: u32,

    used: AtomicU32,
}

impl TokenBudget {
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            used: AtomicU32::new(0),
        }
    }

    pub fn can_afford(&self, tokens: u32) -> bool {
        self.remaining() >= tokens
    }

    /// Saturates at `u32::MAX` instead of wrapping.
    pub fn record(&self, tokens: u32) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_add(tokens))
            });
    }

    pub fn remaining(&self) -> u32 {
        self.max_tokens.saturating_sub(self.used.load(Ordering::SeqCst))
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
    }
}

/// Accumulated usage for one probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub calls: u32,
}

impl ProbeUsage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    fn add(&mut self, usage: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(usage.completion_tokens);
        self.calls = self.calls.saturating_add(1);
    }
}

/// Usage snapshot across probes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub per_probe: BTreeMap<ProbeKind, ProbeUsage>,
}

impl UsageReport {
    pub fn total_tokens(&self) -> u32 {
        self.per_probe
            .values()
            .fold(0u32, |total, u| total.saturating_add(u.total_tokens()))
    }

    pub fn total_calls(&self) -> u32 {
        self.per_probe
            .values()
            .fold(0u32, |total, u| total.saturating_add(u.calls))
    }
}

/// Budget tracker shared by every probe of an evaluator.
pub struct BudgetTracker {
    probe_budgets: HashMap<ProbeKind, TokenBudget>,

    /// `None` means unlimited.
    global_budget: Option<TokenBudget>,

    usage: RwLock<UsageReport>,
}

impl BudgetTracker {
    /// Same limit for every probe.
    pub fn new(global_max: u32, per_probe_max: u32) -> Self {
        let probe_budgets = ProbeKind::ALL
            .into_iter()
            .map(|probe| (probe, TokenBudget::new(per_probe_max)))
            .collect();

        Self {
            probe_budgets,
            global_budget: Some(TokenBudget::new(global_max)),
            usage: RwLock::new(UsageReport::default()),
        }
    }

    /// Only the listed probes are limited; others draw on the global budget
    /// alone. Without a global maximum only the listed probes are capped.
    pub fn with_probe_budgets(global_max: Option<u32>, budgets: &BTreeMap<ProbeKind, u32>) -> Self {
        let probe_budgets = budgets
            .iter()
            .map(|(probe, max)| (*probe, TokenBudget::new(*max)))
            .collect();

        Self {
            probe_budgets,
            global_budget: global_max.map(TokenBudget::new),
            usage: RwLock::new(UsageReport::default()),
        }
    }

    pub fn can_afford(&self, probe: ProbeKind, estimated_tokens: u32) -> bool {
        let probe_ok = self
            .probe_budgets
            .get(&probe)
            .map(|b| b.can_afford(estimated_tokens))
            .unwrap_or(true);

        let global_ok = self
            .global_budget
            .as_ref()
            .map(|b| b.can_afford(estimated_tokens))
            .unwrap_or(true);

        probe_ok && global_ok
    }

    pub fn record_usage(&self, probe: ProbeKind, usage: &TokenUsage) {
        let total = usage.total();
        if let Some(budget) = self.probe_budgets.get(&probe) {
            budget.record(total);
        }
        if let Some(budget) = &self.global_budget {
            budget.record(total);
        }

        self.usage
            .write()
            .per_probe
            .entry(probe)
            .or_default()
            .add(usage);
    }

    pub fn usage(&self) -> UsageReport {
        self.usage.read().clone()
    }

    /// Remaining global budget, or `None` when unlimited.
    pub fn remaining_global(&self) -> Option<u32> {
        self.global_budget.as_ref().map(TokenBudget::remaining)
    }

    /// Remaining budget for a probe, or `None` when it has no own limit.
    pub fn remaining_for(&self, probe: ProbeKind) -> Option<u32> {
        self.probe_budgets.get(&probe).map(TokenBudget::remaining)
    }

    pub fn reset(&self) {
        for budget in self.probe_budgets.values() {
            budget.reset();
        }
        if let Some(budget) = &self.global_budget {
            budget.reset();
        }
        *self.usage.write() = UsageReport::default();
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::with_probe_budgets(None, &BTreeMap::new())
    }
}
