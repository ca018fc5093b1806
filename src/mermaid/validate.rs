//! Rule-Based Mermaid Validation
//!
//! Syntactic checks applied to a chart body without rendering it:
//!
//! 1. The first non-empty line declares a supported chart type
//! 2. Node identifiers match `[A-Za-z_][A-Za-z0-9_]*`
//! 3. Labels in `[...]` / `(...)` / `{...}` contain no unescaped parens and
//!    no unbalanced quotes
//! 4. Arrow syntax belongs to the declared chart family's allowed set
//!
//! An external renderer, when configured, takes precedence; these rules are
//! the fallback and the default.

use regex::Regex;
use std::sync::OnceLock;

/// Chart families with distinct arrow grammars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartFamily {
    Flow,
    Sequence,
    Class,
    State,
    Er,
    /// pie, timeline, gitGraph, mindmap - line-oriented, no arrows
    Linear,
}

/// Validation outcome for one chart
#[derive(Debug, Clone)]
pub struct ChartValidation {
    pub is_valid: bool,
    /// Declared chart type, or "unknown"
    pub chart_type: String,
    pub errors: Vec<String>,
}

impl ChartValidation {
    fn valid(chart_type: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            chart_type: chart_type.into(),
            errors: Vec::new(),
        }
    }

    fn invalid(chart_type: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            chart_type: chart_type.into(),
            errors,
        }
    }

    /// Errors joined for prompts and findings
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// Rule-based validator configured with the accepted chart types.
pub struct ChartValidator {
    supported_types: Vec<String>,
}

impl ChartValidator {
    pub fn new(supported_types: Vec<String>) -> Self {
        Self { supported_types }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            crate::constants::mermaid::SUPPORTED_CHART_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    /// Validate one chart body (no fences).
    pub fn validate(&self, body: &str) -> ChartValidation {
        let body = body.trim();
        if body.is_empty() {
            return ChartValidation::invalid("empty", vec!["empty chart".to_string()]);
        }

        let first_line = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let declared = first_line.trim().split_whitespace().next().unwrap_or("");
        // stateDiagram-v2 declares the stateDiagram type
        let normalized = declared.split('-').next().unwrap_or(declared);

        let Some(chart_type) = self
            .supported_types
            .iter()
            .find(|t| t.eq_ignore_ascii_case(normalized))
            .cloned()
        else {
            return ChartValidation::invalid(
                "unknown",
                vec![format!(
                    "first line must declare a supported chart type, found '{}'",
                    declared
                )],
            );
        };

        let family = family_of(&chart_type);
        let mut errors = Vec::new();

        for (idx, raw_line) in body.lines().enumerate().skip(1) {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with("%%") {
                continue;
            }
            let line_num = idx + 1;

            check_quotes(line, line_num, &mut errors);

            match family {
                ChartFamily::Flow => {
                    check_labels(line, line_num, &mut errors);
                    check_arrows(line, line_num, FLOW_ARROWS, &["->", "=>"], &mut errors);
                    check_flow_identifiers(line, line_num, &mut errors);
                }
                ChartFamily::Sequence => {
                    check_arrows(line, line_num, SEQUENCE_ARROWS, &[], &mut errors);
                }
                ChartFamily::State => {
                    check_arrows(line, line_num, STATE_ARROWS, &["->"], &mut errors);
                }
                ChartFamily::Class | ChartFamily::Er | ChartFamily::Linear => {
                    // Free-form grammars; quote balance already checked
                }
            }
        }

        if errors.is_empty() {
            ChartValidation::valid(chart_type)
        } else {
            ChartValidation::invalid(chart_type, errors)
        }
    }
}

fn family_of(chart_type: &str) -> ChartFamily {
    match chart_type {
        "graph" | "flowchart" => ChartFamily::Flow,
        "sequenceDiagram" => ChartFamily::Sequence,
        "classDiagram" => ChartFamily::Class,
        "stateDiagram" => ChartFamily::State,
        "erDiagram" => ChartFamily::Er,
        _ => ChartFamily::Linear,
    }
}

const FLOW_ARROWS: &[&str] = &["-->", "---", "-.-", "-.->", "==>", "===", "--x", "--o"];
const SEQUENCE_ARROWS: &[&str] = &["->>", "-->>", "->", "-->", "-x", "--x", "-)", "--)"];
const STATE_ARROWS: &[&str] = &["-->"];

/// Unbalanced double quotes anywhere in the line
fn check_quotes(line: &str, line_num: usize, errors: &mut Vec<String>) {
    if line.matches('"').count() % 2 != 0 {
        errors.push(format!("line {}: unbalanced quotes", line_num));
    }
}

/// Labels inside `[...]` / `(...)` / `{...}` must not contain unescaped
/// parens; unquoted `(` or `)` inside a bracket label breaks rendering.
fn check_labels(line: &str, line_num: usize, errors: &mut Vec<String>) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]|\{([^}]*)\}").expect("static regex"));

    for captures in re.captures_iter(line) {
        let label = captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        let quoted = label.starts_with('"') && label.ends_with('"') && label.len() >= 2;
        if !quoted && (label.contains('(') || label.contains(')')) {
            errors.push(format!(
                "line {}: label '{}' contains unescaped parentheses; quote the label",
                line_num, label
            ));
        }
    }
}

/// Dash/equals runs must form an arrow from the family's allowed set.
/// `forbidden` lists near-miss arrows from other families worth naming.
fn check_arrows(
    line: &str,
    line_num: usize,
    allowed: &[&str],
    forbidden: &[&str],
    errors: &mut Vec<String>,
) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?:<?[-=.]{2,}[>xo)]?)|(?:->>?)|(?:-[xo)])").expect("static regex")
    });

    // Arrow-ish runs inside quoted labels don't count
    let unquoted = strip_quoted(line);
    for m in re.find_iter(&unquoted) {
        let arrow = m.as_str().trim_start_matches('<');
        if allowed.contains(&arrow) {
            continue;
        }
        // Edge labels like -->|yes| reuse the base arrow
        if allowed.iter().any(|a| arrow.starts_with(a)) {
            continue;
        }
        if forbidden.contains(&arrow) || !allowed.iter().any(|a| a.starts_with(&arrow[..1])) {
            errors.push(format!(
                "line {}: arrow '{}' is not valid for this chart type",
                line_num, arrow
            ));
        } else {
            errors.push(format!(
                "line {}: malformed arrow '{}'",
                line_num, arrow
            ));
        }
    }
}

/// Node identifiers around flow arrows must be word-shaped.
fn check_flow_identifiers(line: &str, line_num: usize, errors: &mut Vec<String>) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?:^|\s)([^\s\[\](){}|]+?)\s*(?:-->|---|-\.-|==>)").expect("static regex")
    });
    static ID: OnceLock<Regex> = OnceLock::new();
    let id_re = ID.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

    for captures in re.captures_iter(line) {
        let id = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        // The source end may carry a label: A[Label] --> B
        let bare = id.split(['[', '(', '{']).next().unwrap_or("");
        if !bare.is_empty() && !id_re.is_match(bare) {
            errors.push(format!(
                "line {}: node identifier '{}' is not [A-Za-z_][A-Za-z0-9_]*",
                line_num, bare
            ));
        }
    }
}

/// Remove quoted spans so their contents don't trip arrow/label checks.
fn strip_quoted(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_quotes = false;
    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if !in_quotes {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ChartValidator {
        ChartValidator::with_defaults()
    }

    #[test]
    fn test_valid_flowchart() {
        let chart = "graph TD\n    A[Start] --> B{Decision}\n    B -->|yes| C[Done]";
        let result = validator().validate(chart);
        assert!(result.is_valid, "errors: {:?}", result.errors);
        assert_eq!(result.chart_type, "graph");
    }

    #[test]
    fn test_unknown_chart_type_rejected() {
        let result = validator().validate("spiralDiagram\n    A --> B");
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("supported chart type"));
    }

    #[test]
    fn test_unescaped_parens_in_label_flagged() {
        let result = validator().validate("graph TD\n    A[foo(bar)] --> B");
        assert!(!result.is_valid);
        assert!(result.error_summary().contains("unescaped parentheses"));
    }

    #[test]
    fn test_quoted_label_with_parens_accepted() {
        let result = validator().validate("graph TD\n    A[\"foo(bar)\"] --> B");
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_unbalanced_quotes_flagged() {
        let result = validator().validate("graph TD\n    A[\"unclosed] --> B");
        assert!(!result.is_valid);
        assert!(result.error_summary().contains("unbalanced quotes"));
    }

    #[test]
    fn test_sequence_arrows() {
        let ok = validator().validate("sequenceDiagram\n    A->>B: hello\n    B-->>A: hi");
        assert!(ok.is_valid, "errors: {:?}", ok.errors);
    }

    #[test]
    fn test_state_diagram_v2() {
        let result = validator().validate("stateDiagram-v2\n    [*] --> Active\n    Active --> [*]");
        assert!(result.is_valid, "errors: {:?}", result.errors);
        assert_eq!(result.chart_type, "stateDiagram");
    }

    #[test]
    fn test_pie_chart_linear_family() {
        let result = validator().validate("pie\n    title Languages\n    \"rust\" : 60\n    \"python\" : 40");
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_empty_chart_invalid() {
        assert!(!validator().validate("   \n  ").is_valid);
    }

    #[test]
    fn test_bad_identifier_flagged() {
        let result = validator().validate("graph TD\n    1node --> B");
        assert!(!result.is_valid);
        assert!(result.error_summary().contains("identifier"));
    }
}
