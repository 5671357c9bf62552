//! Disaster impact pass
//!
//! Walks every asset of every layer in row order, resolves its fragility
//! record, selects the representative damage state and writes the result
//! back to the row.
//!
//! Global invariants enforced:
//! - Strictly sequential, one row at a time
//! - Each row write commits on its own; earlier rows are never rolled back
//! - Only unknown ids and missing intensity values are skipped; everything
//!   else aborts the pass

use crate::error::FragilityError;
use crate::fragility::FragilityDatabase;
use crate::magnitude::Magnitude;
use crate::report::LayerSummary;
use crate::selector::{select_state, SelectedState};
use crate::store::{AssetRecord, Workspace};
use anyhow::{Context, Result};

/// Why an asset was left untouched
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingFragilityId,
    UnknownFragilityId(String),
    MissingIntensity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetOutcome {
    Updated(SelectedState),
    Skipped(SkipReason),
}

/// Assess a single asset in place.
///
/// On success the assessment fields of `asset` are filled in; the caller
/// persists them.
pub fn assess_asset(
    db: &FragilityDatabase,
    asset: &mut AssetRecord,
    magnitude: Magnitude,
    diameter: f64,
) -> Result<AssetOutcome, FragilityError> {
    let Some(id) = asset.fragility_id.as_deref() else {
        return Ok(AssetOutcome::Skipped(SkipReason::MissingFragilityId));
    };
    if !db.contains(id) {
        return Ok(AssetOutcome::Skipped(SkipReason::UnknownFragilityId(
            id.to_string(),
        )));
    }
    let Some(im) = asset.intensity else {
        return Ok(AssetOutcome::Skipped(SkipReason::MissingIntensity));
    };

    let (record, states) = db.resolve(id, im, diameter)?;
    let selected = select_state(&states);

    asset.damage = Some(selected.state.clone());
    asset.ep = selected.ep.clone();
    asset.hazard = Some(record.hazard_type.clone());
    asset.im = Some(record.im_name.clone());
    asset.im_unit = Some(record.im_unit.clone());
    asset.magnitude = Some(magnitude.label().to_string());

    Ok(AssetOutcome::Updated(selected))
}

/// Run the impact pass over one layer
pub fn run_layer(
    workspace: &Workspace,
    db: &FragilityDatabase,
    layer: &str,
    magnitude: Magnitude,
    diameter: f64,
) -> Result<LayerSummary> {
    let assets = workspace.read_assets(layer, magnitude)?;
    let mut summary = LayerSummary::new(layer, magnitude);

    for mut asset in assets {
        summary.rows += 1;
        let outcome = assess_asset(db, &mut asset, magnitude, diameter)
            .with_context(|| format!("{}: failed to assess row {}", layer, asset.row_id))?;
        match outcome {
            AssetOutcome::Updated(selected) => {
                workspace.write_assessment(layer, &asset)?;
                summary.record_state(&selected.state);
            }
            AssetOutcome::Skipped(reason) => {
                match &reason {
                    SkipReason::MissingFragilityId => {
                        tracing::warn!(layer, row = asset.row_id, "no fragility id, skipping")
                    }
                    SkipReason::UnknownFragilityId(id) => {
                        tracing::warn!(layer, row = asset.row_id, id = %id, "unknown fragility id, skipping")
                    }
                    SkipReason::MissingIntensity => tracing::warn!(
                        layer,
                        row = asset.row_id,
                        column = magnitude.pga_column(),
                        "no intensity value, skipping"
                    ),
                }
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Run the impact pass over every layer, in the order given
pub fn run_disaster_impact(
    workspace: &Workspace,
    db: &FragilityDatabase,
    layers: &[String],
    magnitude: Magnitude,
    diameter: f64,
) -> Result<Vec<LayerSummary>> {
    tracing::info!(magnitude = %magnitude, layers = layers.len(), "disaster impact started");
    let mut summaries = Vec::with_capacity(layers.len());
    for layer in layers {
        tracing::info!(layer = %layer, "simulating");
        let summary = run_layer(workspace, db, layer, magnitude, diameter)
            .with_context(|| format!("impact simulation failed for layer {}", layer))?;
        tracing::info!(
            layer = %layer,
            updated = summary.updated,
            skipped = summary.skipped,
            "{} simulation successful",
            layer
        );
        summaries.push(summary);
    }
    Ok(summaries)
}
