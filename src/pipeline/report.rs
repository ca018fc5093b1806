//! Run Report
//!
//! `report.json` written next to the documentation tree: per-section
//! quality scores, Mermaid findings, per-stage error records, and token
//! usage with an estimated cost.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::flow::{SharedState, keys};
use crate::llm::UsageTotals;
use crate::types::{ErrorKind, ErrorRecord, Result, ValidationFinding};

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub repo_name: String,
    /// Section key -> overall quality in [0, 1]
    pub quality_scores: BTreeMap<String, f32>,
    pub mermaid_findings: Vec<ValidationFinding>,
    pub errors: Vec<ErrorRecord>,
    pub token_usage: UsageTotals,
    pub estimated_cost_usd: f64,
}

impl RunReport {
    /// Assemble the report from the finished blackboard.
    pub fn from_state(state: &SharedState, usage: UsageTotals) -> Self {
        let repo_name = state
            .get_str("repo_name")
            .unwrap_or_else(|| "repository".to_string());

        let mut quality_scores = BTreeMap::new();
        if let Some(Value::Object(scores)) = state.get_value(keys::QUALITY_SCORES) {
            for (section, value) in scores {
                if let Some(overall) = value.get("overall").and_then(|o| o.as_f64()) {
                    quality_scores.insert(section, overall as f32);
                }
            }
        }

        let estimated_cost_usd = usage.estimated_cost_usd();
        Self {
            repo_name,
            quality_scores,
            mermaid_findings: state.get(keys::MERMAID_REPORT).unwrap_or_default(),
            errors: state.errors(),
            token_usage: usage,
            estimated_cost_usd,
        }
    }

    /// Whether any fatal error was recorded.
    pub fn has_fatal_errors(&self) -> bool {
        self.errors.iter().any(|e| e.kind == ErrorKind::Fatal)
    }

    /// Write `report.json` under the given directory.
    pub async fn write(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join("report.json");
        let mut body = serde_json::to_vec_pretty(self)?;
        body.push(b'\n');
        tokio::fs::write(&path, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FindingSeverity;

    #[tokio::test]
    async fn test_report_assembly_and_write() {
        let state = SharedState::new();
        state.set("repo_name", "widget");
        state.set(
            &format!("{}.glossary", keys::QUALITY_SCORES),
            serde_json::json!({ "overall": 0.82, "dimensions": {}, "critique": "" }),
        );
        state.push(
            keys::MERMAID_REPORT,
            ValidationFinding {
                document_path: "widget/overview.md".into(),
                chart_index: 0,
                chart_text: "graph TD".into(),
                error_message: "kept original".into(),
                severity: FindingSeverity::Warning,
            },
        );
        state.record_error(ErrorRecord::new(
            "parse_code",
            ErrorKind::Warning,
            "2 binary files skipped",
        ));

        let report = RunReport::from_state(
            &state,
            UsageTotals {
                calls: 10,
                cache_hits: 2,
                input_tokens: 1000,
                output_tokens: 500,
            },
        );
        assert_eq!(report.repo_name, "widget");
        assert!((report.quality_scores["glossary"] - 0.82).abs() < 1e-6);
        assert_eq!(report.mermaid_findings.len(), 1);
        assert!(!report.has_fatal_errors());
        assert!(report.estimated_cost_usd > 0.0);

        let dir = tempfile::tempdir().unwrap();
        report.write(dir.path()).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("report.json")).unwrap();
        assert!(written.contains("\"glossary\""));
        assert!(written.ends_with('\n'));
    }
}
