//! Strict output schemas for oracle responses.
//!
//! Model output is accepted only after it parses as JSON and validates
//! against the schema for its purpose. There is no "best-effort" parse:
//! anything that fails here is malformed and handled by the caller.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use crate::CoreError;

lazy_static! {
    /// A fenced block: ```json ... ``` or ``` ... ```
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap();

    static ref PREDICTION_SCHEMA: Value = json!({
        "type": "object",
        "required": ["category"],
        "properties": {
            "category": { "type": "string", "minLength": 1 },
            "confidence": {
                "anyOf": [
                    { "type": "number", "minimum": 0, "maximum": 1 },
                    { "type": "string", "enum": ["low", "medium", "high", "LOW", "MEDIUM", "HIGH"] }
                ]
            },
            "rationale": { "type": "string" }
        }
    });

    static ref JUDGE_VERDICT_SCHEMA: Value = json!({
        "type": "object",
        "required": ["agreement", "reasoning_quality", "judge_confidence", "explanation"],
        "properties": {
            "independent_category": { "type": ["string", "null"] },
            "independent_classification": { "type": ["string", "null"] },
            "agreement": { "type": "string", "enum": ["AGREE", "PARTIALLY_AGREE", "DISAGREE"] },
            "correct_category": { "type": ["string", "null"] },
            "reasoning_quality": { "type": "integer", "minimum": 1, "maximum": 5 },
            "issues_identified": { "type": "array", "items": { "type": "string" } },
            "judge_confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "explanation": { "type": "string" }
        }
    });

    static ref SYNTHETIC_EXAMPLES_SCHEMA: Value = json!({
        "type": "object",
        "required": ["examples"],
        "properties": {
            "examples": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["text", "difficulty"],
                    "properties": {
                        "text": { "type": "string", "minLength": 1 },
                        "difficulty": { "type": "string", "enum": ["easy", "medium", "hard"] },
                        "reasoning": { "type": "string" }
                    }
                }
            }
        }
    });

    static ref PREDICTION_VALIDATOR: jsonschema::Validator =
        jsonschema::options().build(&PREDICTION_SCHEMA).unwrap();
    static ref JUDGE_VERDICT_VALIDATOR: jsonschema::Validator =
        jsonschema::options().build(&JUDGE_VERDICT_SCHEMA).unwrap();
    static ref SYNTHETIC_EXAMPLES_VALIDATOR: jsonschema::Validator =
        jsonschema::options().build(&SYNTHETIC_EXAMPLES_SCHEMA).unwrap();
}

/// Which structured response is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSchema {
    Prediction,
    JudgeVerdict,
    SyntheticExamples,
}

impl OutputSchema {
    /// Schema name, usable as a provider-side schema identifier.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prediction => "classification",
            Self::JudgeVerdict => "judge_verdict",
            Self::SyntheticExamples => "synthetic_examples",
        }
    }

    /// The JSON Schema document.
    pub fn schema(&self) -> &'static Value {
        match self {
            Self::Prediction => &PREDICTION_SCHEMA,
            Self::JudgeVerdict => &JUDGE_VERDICT_SCHEMA,
            Self::SyntheticExamples => &SYNTHETIC_EXAMPLES_SCHEMA,
        }
    }

    fn validator(&self) -> &'static jsonschema::Validator {
        match self {
            Self::Prediction => &PREDICTION_VALIDATOR,
            Self::JudgeVerdict => &JUDGE_VERDICT_VALIDATOR,
            Self::SyntheticExamples => &SYNTHETIC_EXAMPLES_VALIDATOR,
        }
    }

    /// Validate a value, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator()
            .iter_errors(value)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Locate the JSON payload inside a model response.
///
/// Handles fenced code blocks and leading/trailing prose. Returns the trimmed
/// input when no JSON delimiters are found.
pub fn extract_json(raw: &str) -> &str {
    if let Some(caps) = FENCED_BLOCK.captures(raw) {
        if let Some(body) = caps.get(1) {
            return body.as_str();
        }
    }

    let trimmed = raw.trim();
    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Extract, parse and validate a structured response.
pub fn parse_structured(raw: &str, schema: OutputSchema) -> Result<Value, CoreError> {
    let body = extract_json(raw);
    let mut value: Value = serde_json::from_str(body).map_err(|e| {
        CoreError::MalformedOutput(format!("{} response is not JSON: {}", schema.name(), e))
    })?;

    // Generators often return the bare array.
    if schema == OutputSchema::SyntheticExamples && value.is_array() {
        value = json!({ "examples": value });
    }

    schema.validate(&value).map_err(|errors| {
        CoreError::MalformedOutput(format!(
            "{} response failed schema validation: {}",
            schema.name(),
            errors.join("; ")
        ))
    })?;

    Ok(value)
}
