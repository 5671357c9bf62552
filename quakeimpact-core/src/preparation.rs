//! Layer preparation
//!
//! Readies an asset layer for the impact pass: gives it a blank-free name,
//! adds the assessment fields and optionally fills the PGA columns from the
//! nearest reference station.

use crate::error::FragilityError;
use crate::report::PreparationSummary;
use crate::station::{assign_nearest_station, StationTable};
use crate::store::{
    quote_ident, FieldSpec, Workspace, DAMAGE, EP, EQ_MAG, FRAG_NO, HAZARD, IM, IM_UNIT, LAT_CALC,
    LONG_CALC,
};
use anyhow::{Context, Result};

/// Fields every prepared layer carries, in the order they are added
pub const ASSESSMENT_FIELDS: [FieldSpec; 13] = [
    FieldSpec::real(LONG_CALC),
    FieldSpec::real(LAT_CALC),
    FieldSpec::real("M81_PGA"),
    FieldSpec::real("M84_PGA"),
    FieldSpec::real("M87_PGA"),
    FieldSpec::real("M90_PGA"),
    FieldSpec::text(FRAG_NO),
    FieldSpec::text(EP),
    FieldSpec::text(HAZARD),
    FieldSpec::text(DAMAGE),
    FieldSpec::text(IM),
    FieldSpec::text(IM_UNIT),
    FieldSpec::text(EQ_MAG),
];

/// Title-case a layer name and drop its blanks, if it has any.
///
/// `"oregon bridges"` becomes `"OregonBridges"`; names without a blank are
/// returned unchanged.
pub fn normalize_layer_name(name: &str) -> String {
    if !name.contains(' ') {
        return name.to_string();
    }
    title_case(name).replace(' ', "")
}

/// Word-initial letters upper, all other letters lower. Any non-letter
/// starts a new word.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Prepare one layer of the workspace.
///
/// When the normalized name differs from `layer`, the rows are copied into
/// a new table under the normalized name and that copy is prepared. With
/// `stations` set, every row with coordinates receives the PGA values of
/// its nearest station.
pub fn prepare_layer(
    workspace: &Workspace,
    layer: &str,
    stations: Option<&StationTable>,
) -> Result<PreparationSummary> {
    let target = normalize_layer_name(layer);
    if target != layer {
        copy_layer(workspace, layer, &target)?;
        tracing::info!(from = layer, to = %target, "layer copied");
    }

    let fields_added = workspace.ensure_fields(&target, &ASSESSMENT_FIELDS)?;
    for field in &fields_added {
        tracing::debug!(layer = %target, field = %field, "field added");
    }

    let mut summary = PreparationSummary {
        layer: target.clone(),
        fields_added,
        rows: 0,
        assigned: 0,
        skipped: 0,
        pga_calculated: stations.is_some(),
    };

    let Some(stations) = stations else {
        summary.rows = workspace.read_locations(&target)?.len();
        tracing::info!(layer = %target, "calculating PGA values skipped");
        return Ok(summary);
    };

    tracing::info!(layer = %target, stations = stations.len(), "calculating PGA values");
    for location in workspace.read_locations(&target)? {
        summary.rows += 1;
        let (Some(latitude), Some(longitude)) = (location.latitude, location.longitude) else {
            tracing::warn!(layer = %target, row = location.row_id, "no coordinates, skipping");
            summary.skipped += 1;
            continue;
        };
        match assign_nearest_station(stations, latitude, longitude) {
            Ok(pga) => {
                workspace.write_station_pga(&target, location.row_id, &pga)?;
                summary.assigned += 1;
            }
            Err(FragilityError::NoStationsAvailable) => {
                tracing::warn!(layer = %target, row = location.row_id, "no stations available, skipping");
                summary.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    tracing::info!(layer = %target, assigned = summary.assigned, "PGA values added");

    Ok(summary)
}

fn copy_layer(workspace: &Workspace, from: &str, to: &str) -> Result<()> {
    if !workspace.layer_exists(from)? {
        anyhow::bail!("layer does not exist in workspace: {}", from);
    }
    if workspace.layer_exists(to)? {
        anyhow::bail!("cannot copy {} to {}: target layer already exists", from, to);
    }
    let sql = format!(
        "CREATE TABLE {} AS SELECT * FROM {}",
        quote_ident(to),
        quote_ident(from)
    );
    workspace
        .connection()
        .execute(&sql, [])
        .with_context(|| format!("failed to copy {} to {}", from, to))?;
    Ok(())
}
