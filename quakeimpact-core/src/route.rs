//! Route-accessibility preparation
//!
//! Damaged assets become point barriers for a closest-facility analysis. The
//! network solve itself happens behind [`RouteSolver`]; this module only
//! assembles the request.

use crate::preparation::normalize_layer_name;
use crate::store::{BarrierPoint, Workspace};
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TRAVEL_MODE: &str = "Vehicle";
pub const DEFAULT_BARRIER_LAYER: &str = "Bridges";
pub const DEFAULT_FACILITY_COUNT: u32 = 1;
pub const DEFAULT_LAYER_PREFIX: &str = "ClosestFacilities";

/// Damage states that block a route
pub const DEFAULT_BARRIER_STATES: [&str; 4] = ["Slight", "Moderate", "Extensive", "Complete"];

pub fn default_barrier_states() -> Vec<String> {
    DEFAULT_BARRIER_STATES.iter().map(|s| s.to_string()).collect()
}

/// A point layer plus an optional SQL filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerFilter {
    pub layer: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub where_clause: Option<String>,
}

/// Everything an external solver needs for one closest-facility run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub travel_mode: String,
    pub facility_count: u32,
    pub incidents: LayerFilter,
    pub facilities: LayerFilter,
    pub barrier_layer: String,
    pub barriers: Vec<BarrierPoint>,
    pub output_layer: String,
    pub overwrite: bool,
}

/// Where a solver put its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub output_layer: String,
    pub barrier_count: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<PathBuf>,
}

/// Network solver seam
pub trait RouteSolver {
    fn solve(&mut self, request: &RouteRequest) -> Result<RouteOutcome>;
}

/// Solver that hands the request off as a JSON file, one per output layer
#[derive(Debug, Clone)]
pub struct JsonRequestSolver {
    output_dir: PathBuf,
}

impl JsonRequestSolver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        JsonRequestSolver {
            output_dir: output_dir.into(),
        }
    }

    pub fn request_path(&self, output_layer: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", output_layer))
    }
}

impl RouteSolver for JsonRequestSolver {
    fn solve(&mut self, request: &RouteRequest) -> Result<RouteOutcome> {
        check_layer_name(&request.output_layer)?;
        let path = self.request_path(&request.output_layer);
        if path.exists() && !request.overwrite {
            anyhow::bail!(
                "route layer {} already exists: {}",
                request.output_layer,
                path.display()
            );
        }
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create directory: {}", self.output_dir.display())
        })?;
        let json =
            serde_json::to_string_pretty(request).context("failed to serialize route request")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write route request: {}", path.display()))?;
        Ok(RouteOutcome {
            output_layer: request.output_layer.clone(),
            barrier_count: request.barriers.len(),
            location: Some(path),
        })
    }
}

/// Parse a facility count leniently: blank, `#` or non-integer input gives 1
pub fn parse_facility_count(raw: Option<&str>) -> u32 {
    raw.map(str::trim)
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_FACILITY_COUNT)
}

/// Pick the output layer name.
///
/// With `overwrite` the requested name is used verbatim and must be given.
/// Otherwise a requested name is normalized, and a missing, `""`, `" "` or
/// `"#"` name falls back to `ClosestFacilities` plus six random digits.
pub fn output_layer_name<R: Rng + ?Sized>(
    requested: Option<&str>,
    overwrite: bool,
    rng: &mut R,
) -> Result<String> {
    if overwrite {
        return match requested {
            Some(name) if !name.trim().is_empty() => {
                check_layer_name(name)?;
                Ok(name.to_string())
            }
            _ => anyhow::bail!("overwriting a route layer requires a layer name"),
        };
    }
    match requested {
        None | Some("") | Some(" ") | Some("#") => Ok(default_layer_name(rng)),
        Some(name) => {
            let name = normalize_layer_name(name);
            check_layer_name(&name)?;
            Ok(name)
        }
    }
}

/// Layer names double as request file names, so they must stay a single
/// path component.
pub fn check_layer_name(name: &str) -> Result<()> {
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        anyhow::bail!("invalid route layer name: {:?}", name);
    }
    Ok(())
}

pub fn default_layer_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "{}{}",
        DEFAULT_LAYER_PREFIX,
        rng.gen_range(100_000..=999_999)
    )
}

/// Damaged assets of `layer` as point barriers.
///
/// Any failure here (typically a layer that has not been assessed yet) is
/// logged and yields no barriers.
pub fn select_barriers(workspace: &Workspace, layer: &str, states: &[String]) -> Vec<BarrierPoint> {
    match workspace.select_damaged(layer, states) {
        Ok(barriers) => barriers,
        Err(e) => {
            tracing::warn!(
                layer,
                error = %format!("{:#}", e),
                "barrier selection failed, continuing without barriers"
            );
            Vec::new()
        }
    }
}

/// Inputs of one route-preparation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOptions {
    pub travel_mode: String,
    pub facility_count: u32,
    pub barrier_layer: String,
    pub barrier_states: Vec<String>,
    pub incidents: LayerFilter,
    pub facilities: LayerFilter,
    pub output_layer: String,
    pub overwrite: bool,
}

/// Select barriers, assemble the request and hand it to `solver`
pub fn run_route_analysis(
    workspace: &Workspace,
    options: &RouteOptions,
    solver: &mut dyn RouteSolver,
) -> Result<RouteOutcome> {
    tracing::info!("preparing for route analysis");
    let barriers = select_barriers(workspace, &options.barrier_layer, &options.barrier_states);
    tracing::info!(
        barrier_layer = %options.barrier_layer,
        barriers = barriers.len(),
        "barriers selected"
    );

    let request = RouteRequest {
        travel_mode: options.travel_mode.clone(),
        facility_count: options.facility_count,
        incidents: options.incidents.clone(),
        facilities: options.facilities.clone(),
        barrier_layer: options.barrier_layer.clone(),
        barriers,
        output_layer: options.output_layer.clone(),
        overwrite: options.overwrite,
    };
    let outcome = solver
        .solve(&request)
        .with_context(|| format!("route analysis failed for {}", request.output_layer))?;
    tracing::info!(output_layer = %outcome.output_layer, "route analysis prepared");
    Ok(outcome)
}

/// Read back a request written by [`JsonRequestSolver`]
pub fn read_route_request(path: &Path) -> Result<RouteRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read route request: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse route request: {}", path.display()))
}
