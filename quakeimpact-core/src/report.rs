//! Reporting and output generation
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Byte-for-byte identical output across runs

use crate::magnitude::Magnitude;
use crate::route::RouteOutcome;
use crate::selector::{DamageStateMap, SelectedState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-layer result of the impact pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub layer: String,
    pub magnitude: String,
    pub rows: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Updated rows per selected damage state
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub states: BTreeMap<String, usize>,
}

impl LayerSummary {
    pub fn new(layer: &str, magnitude: Magnitude) -> Self {
        LayerSummary {
            layer: layer.to_string(),
            magnitude: magnitude.label().to_string(),
            rows: 0,
            updated: 0,
            skipped: 0,
            states: BTreeMap::new(),
        }
    }

    pub fn record_state(&mut self, state: &str) {
        self.updated += 1;
        *self.states.entry(state.to_string()).or_insert(0) += 1;
    }
}

/// Per-layer result of the preparation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationSummary {
    pub layer: String,
    pub fields_added: Vec<String>,
    pub rows: usize,
    pub assigned: usize,
    pub skipped: usize,
    pub pga_calculated: bool,
}

/// Result of a keyed field extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractSummary {
    pub layer: String,
    pub updated: usize,
}

/// Result of evaluating a single fragility record at one IM value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub fragility_id: String,
    pub distribution: String,
    pub im_name: String,
    pub im: f64,
    pub states: DamageStateMap,
    pub selected: SelectedState,
}

/// Render impact summaries as text output
pub fn render_text(summaries: &[LayerSummary]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<24} {:<6} {:<8} {:<8} {:<8} {}\n",
        "LAYER", "MAG", "ROWS", "UPDATED", "SKIPPED", "STATES"
    ));

    for summary in summaries {
        let states = if summary.states.is_empty() {
            "-".to_string()
        } else {
            summary
                .states
                .iter()
                .map(|(state, count)| format!("{}={}", state, count))
                .collect::<Vec<_>>()
                .join(", ")
        };
        output.push_str(&format!(
            "{:<24} {:<6} {:<8} {:<8} {:<8} {}\n",
            truncate_or_pad(&summary.layer, 24),
            summary.magnitude,
            summary.rows,
            summary.updated,
            summary.skipped,
            states
        ));
    }

    output
}

/// Render impact summaries as JSON output
pub fn render_json(summaries: &[LayerSummary]) -> String {
    serde_json::to_string_pretty(summaries).unwrap_or_else(|_| "[]".to_string())
}

pub fn render_preparation_text(summaries: &[PreparationSummary]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<24} {:<8} {:<9} {:<8} {}\n",
        "LAYER", "ROWS", "ASSIGNED", "SKIPPED", "FIELDS ADDED"
    ));
    for summary in summaries {
        let assigned = if summary.pga_calculated {
            summary.assigned.to_string()
        } else {
            "-".to_string()
        };
        let fields = if summary.fields_added.is_empty() {
            "-".to_string()
        } else {
            summary.fields_added.join(", ")
        };
        output.push_str(&format!(
            "{:<24} {:<8} {:<9} {:<8} {}\n",
            truncate_or_pad(&summary.layer, 24),
            summary.rows,
            assigned,
            summary.skipped,
            fields
        ));
    }
    output
}

pub fn render_preparation_json(summaries: &[PreparationSummary]) -> String {
    serde_json::to_string_pretty(summaries).unwrap_or_else(|_| "[]".to_string())
}

pub fn render_evaluation_text(report: &EvaluationReport) -> String {
    let mut output = format!(
        "Fragility {} ({}) at {} = {}\n",
        report.fragility_id, report.distribution, report.im_name, report.im
    );
    for entry in report.states.iter() {
        let marker = if entry.state == report.selected.state {
            "*"
        } else {
            " "
        };
        output.push_str(&format!("{} {:<20} {}\n", marker, entry.state, entry.ep));
    }
    output.push_str(&format!(
        "Selected: {} (EP {})\n",
        report.selected.state,
        report.selected.ep.as_deref().unwrap_or("-")
    ));
    output
}

pub fn render_evaluation_json(report: &EvaluationReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}

pub fn render_extract_text(summary: &ExtractSummary) -> String {
    format!("Updated {} rows of {}\n", summary.updated, summary.layer)
}

pub fn render_extract_json(summary: &ExtractSummary) -> String {
    serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
}

pub fn render_route_text(outcome: &RouteOutcome) -> String {
    let mut output = format!(
        "Route layer: {}\nBarriers: {}\n",
        outcome.output_layer, outcome.barrier_count
    );
    if let Some(ref location) = outcome.location {
        output.push_str(&format!("Request: {}\n", location.display()));
    }
    output
}

pub fn render_route_json(outcome: &RouteOutcome) -> String {
    serde_json::to_string_pretty(outcome).unwrap_or_else(|_| "{}".to_string())
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        format!("{:<width$}", s, width = width)
    }
}
