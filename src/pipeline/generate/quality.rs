//! Content Quality Check
//!
//! Scores generated sections on seven dimensions in [1..10] via the LLM,
//! normalized to [0, 1] with an equal-weight overall mean. When the
//! evaluation call fails or cannot be parsed, a structural heuristic keeps
//! the gate functioning instead of silently passing everything.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::{GenerateRequest, LlmClient, TaskType, extract_json_payload};
use crate::mermaid::extract_blocks;

/// The seven scoring dimensions
pub const DIMENSIONS: &[&str] = &[
    "completeness",
    "accuracy",
    "readability",
    "formatting",
    "visualization",
    "educational_value",
    "practicality",
];

/// Scores for one piece of content, all in [0, 1]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QualityScores {
    pub dimensions: BTreeMap<String, f32>,
    pub overall: f32,
    /// Reviewer commentary fed back into regeneration prompts
    pub critique: String,
}

impl QualityScores {
    fn from_dimensions(dimensions: BTreeMap<String, f32>, critique: String) -> Self {
        let overall = if dimensions.is_empty() {
            0.0
        } else {
            dimensions.values().sum::<f32>() / dimensions.len() as f32
        };
        Self {
            dimensions,
            overall,
            critique,
        }
    }
}

/// LLM-backed quality gate with a structural fallback.
pub struct QualityEvaluator {
    client: Arc<LlmClient>,
}

impl QualityEvaluator {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }

    /// Score one section against its diagram requirement. Never fails; the
    /// heuristic covers evaluation outages.
    pub async fn evaluate(&self, section: &str, content: &str, min_diagrams: usize) -> QualityScores {
        let diagram_clause = if min_diagrams > 0 {
            format!(
                " The section is required to contain at least {} Mermaid diagrams; \
                 score visualization accordingly.",
                min_diagrams
            )
        } else {
            String::new()
        };
        let prompt = format!(
            "Score the following '{}' documentation section on each dimension from 1 to 10 \
             and give one short improvement comment per dimension.{}\n\
             Respond with JSON: {{{}}}\n\n{}",
            section,
            diagram_clause,
            DIMENSIONS
                .iter()
                .map(|d| format!("\"{}\": {{\"score\": n, \"comment\": \"...\"}}", d))
                .collect::<Vec<_>>()
                .join(", "),
            content
        );

        let response = self
            .client
            .generate(
                GenerateRequest::new(prompt)
                    .task(TaskType::EvaluateQuality)
                    .for_node("quality_check")
                    .expect_json(),
            )
            .await;

        let mut scores = match response {
            Ok(generation) => match parse_scores(&generation.text) {
                Some(scores) => scores,
                None => {
                    warn!(section, "unparseable evaluation, using structural heuristic");
                    heuristic_scores(content, min_diagrams)
                }
            },
            Err(e) => {
                warn!(section, error = %e, "evaluation call failed, using structural heuristic");
                heuristic_scores(content, min_diagrams)
            }
        };

        // The diagram minimum is checked against the document itself, not
        // the reviewer's impression of it.
        let found = extract_blocks(content).len();
        if found < min_diagrams {
            if !scores.critique.is_empty() {
                scores.critique.push('\n');
            }
            scores.critique.push_str(&format!(
                "visualization: the document contains {} Mermaid diagrams but requires at least {}",
                found, min_diagrams
            ));
        }
        scores
    }
}

fn parse_scores(text: &str) -> Option<QualityScores> {
    let payload = extract_json_payload(text)?;
    let value: Value = serde_json::from_str(&payload).ok()?;
    let object = value.as_object()?;

    let mut dimensions = BTreeMap::new();
    let mut comments = Vec::new();
    for dimension in DIMENSIONS {
        let Some(entry) = object.get(*dimension) else {
            continue;
        };
        let score = match entry {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::Object(inner) => inner
                .get("score")
                .and_then(|s| s.as_f64())
                .unwrap_or(0.0),
            _ => continue,
        };
        dimensions.insert(
            dimension.to_string(),
            (score as f32 / 10.0).clamp(0.0, 1.0),
        );
        if let Some(comment) = entry.get("comment").and_then(|c| c.as_str())
            && !comment.is_empty()
        {
            comments.push(format!("{}: {}", dimension, comment));
        }
    }

    if dimensions.is_empty() {
        return None;
    }
    debug!(scored = dimensions.len(), "evaluation parsed");
    Some(QualityScores::from_dimensions(dimensions, comments.join("\n")))
}

/// Structure-based scoring used when the LLM evaluation is unavailable.
/// Deliberately conservative; it mostly rewards shape, not substance.
/// Visualization is scored against the section's diagram requirement.
pub fn heuristic_scores(content: &str, min_diagrams: usize) -> QualityScores {
    let length = content.len();
    let headings = content.lines().filter(|l| l.starts_with('#')).count();
    let code_fences = content.matches("```").count() / 2;
    let mermaid_blocks = extract_blocks(content).len();
    let has_lists = content.lines().any(|l| l.trim_start().starts_with("- "));

    let completeness = match length {
        0..=200 => 0.2,
        201..=800 => 0.5,
        801..=2000 => 0.7,
        _ => 0.8,
    };
    let formatting = match headings {
        0 => 0.3,
        1..=2 => 0.6,
        _ => 0.8,
    };
    let visualization = if min_diagrams > 0 {
        // Fraction of the requirement met, capped at the usual ceiling
        (mermaid_blocks as f32 / min_diagrams as f32).min(1.0) * 0.8
    } else {
        match mermaid_blocks {
            0 => 0.3,
            1 => 0.7,
            _ => 0.8,
        }
    };
    let readability = if has_lists { 0.7 } else { 0.5 };
    let practicality = if code_fences > mermaid_blocks { 0.7 } else { 0.5 };

    let mut dimensions = BTreeMap::new();
    dimensions.insert("completeness".to_string(), completeness);
    dimensions.insert("accuracy".to_string(), 0.5);
    dimensions.insert("readability".to_string(), readability);
    dimensions.insert("formatting".to_string(), formatting);
    dimensions.insert("visualization".to_string(), visualization);
    dimensions.insert("educational_value".to_string(), 0.5);
    dimensions.insert("practicality".to_string(), practicality);

    QualityScores::from_dimensions(
        dimensions,
        "Heuristic structural review; the LLM evaluation was unavailable.".to_string(),
    )
}
