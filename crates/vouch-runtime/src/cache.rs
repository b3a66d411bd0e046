//! Judge verdict cache.
//!
//! Verdicts are kept in memory keyed by everything the judge saw: the
//! rendered messages, the sampling options and the category set the reply is
//! checked against.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use vouch_core::{CategorySet, JudgeVerdict};

use crate::config::CacheConfig;
use crate::providers::{ChatMessage, InvokeOptions};

/// Cache key for one judge call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VerdictKey {
    model_id: String,
    temperature_bits: u64,
    max_output_tokens: u32,
    schema: Option<&'static str>,
    messages_hash: u64,
    categories_hash: u64,
}

impl VerdictKey {
    /// Timeouts do not change the reply and are left out.
    pub fn new(options: &InvokeOptions, messages: &[ChatMessage], categories: &CategorySet) -> Self {
        Self {
            model_id: options.model.clone(),
            temperature_bits: options.temperature.to_bits(),
            max_output_tokens: options.max_output_tokens,
            schema: options.output_schema.map(|s| s.name()),
            messages_hash: hash_messages(messages),
            categories_hash: hash_categories(categories),
        }
    }
}

/// Verdict cache using moka.
pub struct VerdictCache {
    cache: Cache<VerdictKey, JudgeVerdict>,
}

impl VerdictCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_entries, config.ttl))
    }

    /// Cached verdict, re-labelled for the judge asking.
    ///
    /// Two panel seats backed by the same model share entries.
    pub async fn get(&self, key: &VerdictKey, judge_id: &str) -> Option<JudgeVerdict> {
        self.cache.get(key).await.map(|mut verdict| {
            verdict.judge_id = judge_id.to_string();
            verdict
        })
    }

    pub async fn insert(&self, key: VerdictKey, verdict: JudgeVerdict) {
        self.cache.insert(key, verdict).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

fn hash_messages(messages: &[ChatMessage]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for message in messages {
        message.role.hash(&mut hasher);
        message.content.hash(&mut hasher);
    }
    hasher.finish()
}

fn hash_categories(categories: &CategorySet) -> u64 {
    let mut hasher = DefaultHasher::new();
    for category in categories.iter() {
        category.name.hash(&mut hasher);
        category.description.hash(&mut hasher);
        category.boundary_notes.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch_core::{Agreement, Category, OutputSchema};

    fn categories() -> CategorySet {
        CategorySet::new(vec![Category::new("Billing", "Payments"), Category::new("Other", "")]).unwrap()
    }

    fn verdict(judge_id: &str) -> JudgeVerdict {
        JudgeVerdict {
            judge_id: judge_id.to_string(),
            independent_category: Some("Billing".to_string()),
            agreement: Agreement::Agree,
            reasoning_quality: 4,
            judge_confidence: 0.9,
            explanation: "Mentions a refund".to_string(),
            correct_category: None,
            issues_identified: Vec::new(),
        }
    }

    fn options() -> InvokeOptions {
        InvokeOptions::new("m")
            .temperature(0.1)
            .max_output_tokens(1000)
            .output_schema(OutputSchema::JudgeVerdict)
    }

    fn messages(user: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::system("You review classifications."), ChatMessage::user(user)]
    }

    #[test]
    fn test_key_depends_on_every_input() {
        let cats = categories();
        let base = VerdictKey::new(&options(), &messages("refund"), &cats);

        assert_eq!(base, VerdictKey::new(&options(), &messages("refund"), &cats));
        assert_eq!(
            base,
            VerdictKey::new(&options().timeout(Duration::from_secs(1)), &messages("refund"), &cats)
        );

        let mut other_model = options();
        other_model.model = "other".to_string();
        assert_ne!(base, VerdictKey::new(&other_model, &messages("refund"), &cats));
        assert_ne!(base, VerdictKey::new(&options().temperature(0.0), &messages("refund"), &cats));
        assert_ne!(base, VerdictKey::new(&options().max_output_tokens(500), &messages("refund"), &cats));
        let mut free_form = options();
        free_form.output_schema = None;
        assert_ne!(base, VerdictKey::new(&free_form, &messages("refund"), &cats));
        assert_ne!(base, VerdictKey::new(&options(), &messages("refund!"), &cats));

        let mut swapped = messages("refund");
        swapped[0].role = "user".to_string();
        assert_ne!(base, VerdictKey::new(&options(), &swapped, &cats));

        let narrower = CategorySet::new(vec![Category::new("Billing", "Payments")]).unwrap();
        assert_ne!(base, VerdictKey::new(&options(), &messages("refund"), &narrower));
    }

    #[tokio::test]
    async fn test_hit_is_relabelled() {
        let cache = VerdictCache::default();
        let key = VerdictKey::new(&options(), &messages("refund"), &categories());

        assert!(cache.get(&key, "judge-a").await.is_none());
        cache.insert(key.clone(), verdict("judge-a")).await;

        let hit = cache.get(&key, "judge-b").await.unwrap();
        assert_eq!(hit.judge_id, "judge-b");
        assert_eq!(hit.agreement, Agreement::Agree);
    }

    #[test]
    fn test_disabled_config_builds_nothing() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(VerdictCache::from_config(&config).is_none());
        assert!(VerdictCache::from_config(&CacheConfig::default()).is_some());
    }
}
