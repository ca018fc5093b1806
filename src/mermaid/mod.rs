//! Mermaid Validation
//!
//! Extraction of fenced Mermaid blocks from generated Markdown, rule-based
//! syntax validation, and LLM-assisted regeneration of invalid charts.

mod engine;
mod extract;
mod validate;

pub use engine::{DocumentOutcome, MermaidEngine};
pub use extract::{MermaidBlock, body_from_response, extract_blocks, replace_block};
pub use validate::{ChartValidation, ChartValidator};
