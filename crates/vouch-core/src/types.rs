//! Core types shared by every probe.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::CoreError;

/// A category a classifier may assign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    /// Unique name within a set
    pub name: String,

    /// What belongs in this category
    #[serde(default)]
    pub description: String,

    /// Inclusion/exclusion criteria
    #[serde(default, alias = "boundary", skip_serializing_if = "Option::is_none")]
    pub boundary_notes: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            boundary_notes: None,
        }
    }

    pub fn with_boundary(mut self, notes: impl Into<String>) -> Self {
        self.boundary_notes = Some(notes.into());
        self
    }
}

/// A validated, ordered set of categories.
///
/// Names are unique after trimming and the set is never empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<Category>", into = "Vec<Category>")]
pub struct CategorySet {
    categories: Vec<Category>,
}

impl CategorySet {
    /// Build a set, rejecting empty sets, blank names and duplicates.
    pub fn new(categories: Vec<Category>) -> Result<Self, CoreError> {
        if categories.is_empty() {
            return Err(CoreError::InvalidInput("category set is empty".to_string()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for category in &categories {
            let name = category.name.trim();
            if name.is_empty() {
                return Err(CoreError::InvalidInput(
                    "category name must not be blank".to_string(),
                ));
            }
            if !seen.insert(name.to_string()) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate category name '{}'",
                    name
                )));
            }
        }

        Ok(Self { categories })
    }

    /// Resolve a raw label to a member of this set.
    ///
    /// Matching is exact after trimming both sides; case is significant.
    pub fn resolve(&self, raw: &str) -> Option<&Category> {
        let wanted = raw.trim();
        self.categories.iter().find(|c| c.name.trim() == wanted)
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.resolve(raw).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.resolve(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.trim())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl TryFrom<Vec<Category>> for CategorySet {
    type Error = CoreError;

    fn try_from(categories: Vec<Category>) -> Result<Self, Self::Error> {
        Self::new(categories)
    }
}

impl From<CategorySet> for Vec<Category> {
    fn from(set: CategorySet) -> Self {
        set.categories
    }
}

/// Band derived from a 0-1 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub const HIGH_THRESHOLD: f64 = 0.80;
    pub const MEDIUM_THRESHOLD: f64 = 0.60;

    /// ≥0.80 high, [0.60, 0.80) medium, below that low.
    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            Self::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence on a 0-1 scale.
///
/// Classifiers that report ordinal labels are mapped onto the scale so that
/// aggregation arithmetic stays well-defined; the band is only a view.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    /// Clamp into [0, 1]; NaN becomes 0.
    pub fn new(score: f64) -> Self {
        if score.is_nan() {
            Self(0.0)
        } else {
            Self(score.clamp(0.0, 1.0))
        }
    }

    /// Map an ordinal label ("low", "medium", "high") onto the scale.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self(0.3)),
            "medium" => Some(Self(0.6)),
            "high" => Some(Self(0.9)),
            _ => None,
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_score(self.0)
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self(0.6)
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Score(f64),
            Label(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Score(score) => Ok(Confidence::new(score)),
            Repr::Label(label) => Confidence::from_label(&label)
                .ok_or_else(|| D::Error::custom(format!("unknown confidence label '{}'", label))),
        }
    }
}

/// A single classifier decision. Evaluation never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    #[serde(alias = "category")]
    pub predicted_category: String,

    #[serde(default)]
    pub confidence: Confidence,

    #[serde(default, alias = "reasoning", skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Prediction {
    pub fn new(category: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            predicted_category: category.into(),
            confidence,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// The three evaluation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Stability,
    Synthetic,
    Judge,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 3] = [ProbeKind::Stability, ProbeKind::Synthetic, ProbeKind::Judge];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stability => "stability",
            Self::Synthetic => "synthetic",
            Self::Judge => "judge",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
