//! Prompts for the three model roles: classifier, example generator, judge.
//!
//! System prompts are fixed strings. User prompts are built from the
//! evaluation inputs and always end with the expected JSON shape, so a
//! provider without native schema support still gets a usable contract.

use vouch_core::{Category, CategorySet, Difficulty, Prediction};

use crate::classifier::ClassifyRequest;
use crate::providers::ChatMessage;

/// System prompt for the classifier adapter.
pub const CLASSIFIER_SYSTEM_PROMPT: &str = r#"
You are a data classifier. You assign exactly one category from a fixed list.

## Rules
1. Use only the category names you are given, spelled exactly as listed
2. Boundary notes decide borderline cases
3. Report how confident you are as a number between 0 and 1

## Output Format (JSON)
{
  "category": "one of the listed names",
  "confidence": 0.0-1.0,
  "rationale": "one or two sentences"
}
"#;

/// System prompt for synthetic example generation.
pub const GENERATOR_SYSTEM_PROMPT: &str =
    "You are an expert at generating test examples for classification.";

/// System prompt for every judge.
///
/// Judges are framed as independent reviewers. They see the prediction
/// under review but never another judge's verdict.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"
You are an expert classification evaluator.

Classify the text yourself before looking at the classifier's answer, then
compare. Do not defer to the classifier. If no listed category fits, set
independent_classification to null.

## Agreement
- AGREE: the classifier picked the category you would pick
- PARTIALLY_AGREE: defensible, but another category fits at least as well
- DISAGREE: the classifier's category is wrong

## Reasoning Quality (1-5)
1 = no reasoning or contradicts the text, 3 = plausible but shallow,
5 = cites the deciding detail and the boundary it falls on
"#;

/// Numbered category list with boundary notes.
pub fn format_categories(categories: &CategorySet) -> String {
    categories
        .iter()
        .enumerate()
        .map(|(i, cat)| format_category(i + 1, cat))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_category(index: usize, category: &Category) -> String {
    match &category.boundary_notes {
        Some(boundary) => format!(
            "{}. {}: {}\n   Boundary: {}",
            index, category.name, category.description, boundary
        ),
        None => format!("{}. {}: {}", index, category.name, category.description),
    }
}

/// Messages for one classification call.
pub fn classification_messages(request: &ClassifyRequest<'_>) -> Vec<ChatMessage> {
    let mut prompt = String::new();
    if let Some(field) = request.field_name {
        prompt.push_str(&format!("Column: {}\n", field));
    }
    prompt.push_str(&format!("Text to classify: \"{}\"\n\n", request.text));
    prompt.push_str("Available Categories:\n");
    prompt.push_str(&format_categories(request.categories));

    if !request.few_shot_examples.is_empty() {
        prompt.push_str("\n\nLabeled examples:\n");
        for example in request.few_shot_examples {
            prompt.push_str(&format!("- \"{}\" -> {}\n", example.text, example.category));
        }
    }

    if let Some(feedback) = request.feedback {
        prompt.push_str(&format!(
            "\n\nA reviewer rejected an earlier answer with this feedback:\n{}\n",
            feedback
        ));
    }

    prompt.push_str("\n\nRespond with the JSON object only.");

    vec![
        ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT.trim()),
        ChatMessage::user(prompt),
    ]
}

/// Messages asking for examples of one category, split by difficulty.
pub fn generation_messages(category: &Category, plan: &[(Difficulty, usize)]) -> Vec<ChatMessage> {
    let total: usize = plan.iter().map(|(_, n)| n).sum();
    let breakdown = plan
        .iter()
        .map(|(difficulty, n)| format!("- {}: {}", difficulty, n))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        r#"Generate {total} realistic examples that belong to this category:

Category: {name}
Description: {description}
Boundary: {boundary}

Requirements:
- Generate diverse, realistic examples
- Produce exactly this many examples per difficulty level:
{breakdown}
- Each example should clearly belong to this category
- Vary the phrasing and context

Return a JSON array of objects with:
- text: The example text
- difficulty: easy/medium/hard
- reasoning: Why this belongs to the category

Example format:
[
  {{
    "text": "Example text here",
    "difficulty": "medium",
    "reasoning": "This belongs to {name} because..."
  }}
]"#,
        total = total,
        name = category.name,
        description = category.description,
        boundary = category.boundary_notes.as_deref().unwrap_or("Not specified"),
        breakdown = breakdown,
    );

    vec![
        ChatMessage::system(GENERATOR_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

/// Messages for one judge reviewing a prediction.
pub fn judge_messages(
    text: &str,
    prediction: &Prediction,
    categories: &CategorySet,
    field_name: Option<&str>,
) -> Vec<ChatMessage> {
    let mut prompt = format!("Text to classify: \"{}\"\n", text);
    if let Some(field) = field_name {
        prompt.push_str(&format!("Column: {}\n", field));
    }
    prompt.push_str(&format!(
        "\nAvailable categories:\n{}\n\nClassifier's prediction: {}\nClassifier's confidence: {:.2}\n",
        format_categories(categories),
        prediction.predicted_category,
        prediction.confidence.value(),
    ));
    if let Some(rationale) = &prediction.rationale {
        prompt.push_str(&format!("Classifier's reasoning: {}\n", rationale));
    }

    prompt.push_str(
        r#"
Your task:
1. Independently classify this text (without bias from the classifier's choice)
2. Evaluate if you agree with the classifier
3. Rate the quality of classification

Respond in JSON format:
{
  "independent_classification": "your category choice or null",
  "agreement": "AGREE" | "DISAGREE" | "PARTIALLY_AGREE",
  "correct_category": "category name if you disagree, null otherwise",
  "reasoning_quality": 1-5,
  "issues_identified": ["issue1", "issue2"],
  "judge_confidence": 0.0-1.0,
  "explanation": "your reasoning"
}"#,
    );

    vec![
        ChatMessage::system(JUDGE_SYSTEM_PROMPT.trim()),
        ChatMessage::user(prompt),
    ]
}
