//! quakeimpact core library - earthquake damage assessment for infrastructure assets

#![deny(warnings)]

// Global invariants enforced in this crate:
// - Assets are processed strictly sequentially, in row order
// - Reference data is loaded once per run and never mutated
// - No global mutable state; storage locations travel in ResolvedConfig
// - Fragility parameters are parsed once, at load time
// - Polynomial formulas run in a sandboxed evaluator, never a general eval

pub mod config;
pub mod distribution;
pub mod error;
pub mod extract;
pub mod formula;
pub mod fragility;
pub mod impact;
pub mod magnitude;
pub mod preparation;
pub mod reference;
pub mod report;
pub mod route;
pub mod selector;
pub mod station;
pub mod store;

pub use config::ResolvedConfig;
pub use error::{FragilityError, FragilityResult};
pub use fragility::{FragilityDatabase, FragilityRecord};
pub use impact::run_disaster_impact;
pub use magnitude::Magnitude;
pub use report::{render_json, render_text, EvaluationReport, LayerSummary};
pub use selector::{select_state, DamageStateMap, SelectedState};
pub use store::Workspace;

use anyhow::Result;

/// Evaluate one fragility record at `im` and select its damage state
pub fn evaluate_fragility(
    db: &FragilityDatabase,
    fragility_id: &str,
    im: f64,
    diameter: f64,
) -> Result<EvaluationReport> {
    let (record, states) = db.resolve(fragility_id, im, diameter)?;
    let selected = select_state(&states);
    Ok(EvaluationReport {
        fragility_id: record.id.clone(),
        distribution: record.family.to_string(),
        im_name: record.im_name.clone(),
        im,
        states,
        selected,
    })
}
