//! Flat JSON report for a finished batch, one row per work item.

use crate::batch::{BatchOutcome, BatchSummary, ItemResult};
use crate::classify::WorkType;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub item_id: String,
    pub status: &'static str,
    pub cached: bool,
    pub work_type: Option<WorkType>,
    pub complexity_score: Option<u8>,
    pub risk_score: Option<u8>,
    pub clarity_score: Option<u8>,
    pub impact_score: Option<f64>,
    pub summary: Option<String>,
    pub error_reason: Option<String>,
    pub error_message: Option<String>,
}

impl From<&ItemResult> for ReportRow {
    fn from(item: &ItemResult) -> Self {
        match item {
            ItemResult::Success {
                item_id,
                result,
                cached,
            } => Self {
                item_id: item_id.clone(),
                status: "success",
                cached: *cached,
                work_type: Some(result.work_type),
                complexity_score: Some(result.complexity_score),
                risk_score: Some(result.risk_score),
                clarity_score: Some(result.clarity_score),
                impact_score: Some(result.impact_score()),
                summary: Some(result.summary.clone()),
                error_reason: None,
                error_message: None,
            },
            ItemResult::Error(err) => Self {
                item_id: err.item_id.clone(),
                status: "error",
                cached: false,
                work_type: None,
                complexity_score: None,
                risk_score: None,
                clarity_score: None,
                impact_score: None,
                summary: None,
                error_reason: Some(err.reason.to_string()),
                error_message: (!err.message.is_empty()).then(|| err.message.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub step: String,
    pub generated_at: String,
    pub resumed_from_checkpoint: bool,
    pub summary: BatchSummary,
    /// Mean impact over successful items.
    pub average_impact: Option<f64>,
    pub rows: Vec<ReportRow>,
}

impl BatchReport {
    pub fn from_outcome(outcome: &BatchOutcome) -> Self {
        let rows: Vec<ReportRow> = outcome.results.iter().map(ReportRow::from).collect();
        let impacts: Vec<f64> = rows.iter().filter_map(|row| row.impact_score).collect();
        let average_impact = (!impacts.is_empty()).then(|| {
            let mean = impacts.iter().sum::<f64>() / impacts.len() as f64;
            (mean * 100.0).round() / 100.0
        });

        Self {
            run_id: outcome.run_id.clone(),
            step: outcome.step.clone(),
            generated_at: Utc::now().to_rfc3339(),
            resumed_from_checkpoint: outcome.resumed_from_checkpoint,
            summary: outcome.summary,
            average_impact,
            rows,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        tracing::info!(path = %path.display(), rows = self.rows.len(), "report written");
        Ok(())
    }
}
