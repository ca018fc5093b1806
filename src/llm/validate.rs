//! Response Validation
//!
//! Structural checks applied to every completion before it is cached or
//! returned. A response that fails validation is treated as an `Invalid`
//! error, which the call layer answers by re-prompting.

use crate::constants;
use crate::types::{ErrorCategory, LlmError};

/// What shape the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedShape {
    /// Free-form Markdown/prose
    #[default]
    Text,
    /// A JSON document, either bare or inside a ```json fence
    Json,
}

/// Validate a completion against the requested shape.
pub fn validate_response(text: &str, shape: ExpectedShape) -> Result<(), LlmError> {
    let trimmed = text.trim();

    if trimmed.len() < constants::llm::MIN_RESPONSE_LENGTH {
        return Err(LlmError::new(
            ErrorCategory::Invalid,
            format!(
                "response too short: {} chars (minimum {})",
                trimmed.len(),
                constants::llm::MIN_RESPONSE_LENGTH
            ),
        ));
    }

    if shape == ExpectedShape::Json && extract_json_payload(trimmed).is_none() {
        return Err(LlmError::new(
            ErrorCategory::Invalid,
            "response is missing the requested JSON payload",
        ));
    }

    Ok(())
}

/// Pull a JSON payload out of a completion: a ```json fence, a bare fence,
/// or a raw object/array. Returns the payload text without fences.
pub fn extract_json_payload(text: &str) -> Option<String> {
    let trimmed = text.trim();

    for fence in ["```json", "```JSON", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                let candidate = after[..end].trim();
                if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                    return Some(candidate.to_string());
                }
            }
        }
    }

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some(trimmed.to_string());
    }

    // Last resort: the widest braced span that parses
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        let candidate = &trimmed[start..=end];
        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_response_invalid() {
        let err = validate_response("ok", ExpectedShape::Text).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Invalid);
    }

    #[test]
    fn test_plain_text_valid() {
        assert!(
            validate_response(
                "This document describes the architecture in detail.",
                ExpectedShape::Text
            )
            .is_ok()
        );
    }

    #[test]
    fn test_json_shape_requires_payload() {
        let err = validate_response(
            "Sorry, I cannot produce structured output right now.",
            ExpectedShape::Json,
        )
        .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Invalid);
    }

    #[test]
    fn test_json_in_fence_accepted() {
        let text = "Here you go:\n```json\n{\"modules\": []}\n```\nDone.";
        assert!(validate_response(text, ExpectedShape::Json).is_ok());
        assert_eq!(
            extract_json_payload(text).unwrap(),
            "{\"modules\": []}"
        );
    }

    #[test]
    fn test_bare_json_accepted() {
        let text = "{\"name\": \"parser\", \"importance\": 8, \"padding\": true}";
        assert!(validate_response(text, ExpectedShape::Json).is_ok());
    }

    #[test]
    fn test_embedded_object_extracted() {
        let text = "The result is {\"count\": 3} as computed above, which should help.";
        assert_eq!(extract_json_payload(text).unwrap(), "{\"count\": 3}");
    }
}
