//! quakeimpact CLI - earthquake damage assessment for infrastructure assets

#![deny(warnings)]

// Global invariants enforced:
// - Reports go to stdout, status and warnings to stderr
// - CLI flags override config file values
// - Any error exits non-zero

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use quakeimpact_core::config::{self, ResolvedConfig};
use quakeimpact_core::preparation::prepare_layer;
use quakeimpact_core::reference::{load_fragility_database, load_station_table};
use quakeimpact_core::report::{
    render_evaluation_json, render_evaluation_text, render_extract_json, render_extract_text,
    render_preparation_json, render_preparation_text, render_route_json, render_route_text,
    ExtractSummary,
};
use quakeimpact_core::route::{
    output_layer_name, parse_facility_count, run_route_analysis, JsonRequestSolver, LayerFilter,
    RouteOptions,
};
use quakeimpact_core::{
    evaluate_fragility, extract, render_json, render_text, run_disaster_impact, Magnitude,
    Workspace,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quakeimpact")]
#[command(about = "Earthquake damage-state simulation for infrastructure assets")]
#[command(version = env!("QUAKEIMPACT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that touches project data
#[derive(Args)]
struct CommonArgs {
    /// Path to config file (default: auto-discover)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workspace database (overrides config file)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare asset layers: normalize names, add assessment fields, assign PGA values
    Prepare {
        /// Layers to prepare
        #[arg(required = true)]
        layers: Vec<String>,

        /// Assign PGA values from the nearest station
        #[arg(long)]
        calculate_pga: bool,

        /// Station table (overrides config file)
        #[arg(long)]
        stations: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Simulate earthquake damage states for asset layers
    Impact {
        /// Layers to simulate (overrides config file)
        #[arg(long = "layer")]
        layers: Vec<String>,

        /// Earthquake magnitude: 8.1, 8.4, 8.7 or 9.0 (overrides config file)
        #[arg(long)]
        magnitude: Option<Magnitude>,

        /// Diameter bound to D in polynomial formulas (overrides config file)
        #[arg(long)]
        pipe_diameter: Option<f64>,

        /// Fragility reference data (overrides config file)
        #[arg(long)]
        fragility_database: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Evaluate a single fragility record at one intensity value
    Evaluate {
        /// Fragility id
        fragility_id: String,

        /// Intensity measure value
        im: f64,

        /// Diameter bound to D in polynomial formulas (overrides config file)
        #[arg(long)]
        pipe_diameter: Option<f64>,

        /// Fragility reference data (overrides config file)
        #[arg(long)]
        fragility_database: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Prepare a closest-facility route request with damaged assets as barriers
    Route {
        /// Incident layer
        #[arg(long)]
        incidents: String,

        /// SQL filter for incidents
        #[arg(long)]
        incidents_where: Option<String>,

        /// Facility layer
        #[arg(long)]
        facilities: String,

        /// SQL filter for facilities
        #[arg(long)]
        facilities_where: Option<String>,

        /// Facilities to find per incident; blank or non-integer means 1
        #[arg(long)]
        facility_count: Option<String>,

        /// Output route layer name
        #[arg(long)]
        name: Option<String>,

        /// Replace an existing route layer of the same name
        #[arg(long)]
        overwrite: bool,

        /// Run the impact simulation on the barrier layer first
        #[arg(long)]
        run_impact: bool,

        /// Earthquake magnitude for --run-impact (overrides config file)
        #[arg(long)]
        magnitude: Option<Magnitude>,

        /// Directory receiving route requests (overrides config file)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Copy fields from a join layer onto matching rows of an input layer
    Extract {
        /// Layer to update
        #[arg(long)]
        input: String,

        /// Join field of the input layer
        #[arg(long)]
        input_key: String,

        /// Layer supplying the data
        #[arg(long)]
        join: String,

        /// Join field of the join layer
        #[arg(long)]
        join_key: String,

        /// Fields to copy
        #[arg(long = "field", required = true)]
        fields: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Validate a configuration file
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running anything
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare {
            layers,
            calculate_pga,
            stations,
            common,
        } => {
            let resolved = load_config(&common)?;
            let stations_path = stations.unwrap_or_else(|| resolved.stations.clone());
            let workspace = open_workspace(&resolved)?;

            let table = if calculate_pga {
                Some(load_station_table(&stations_path)?)
            } else {
                None
            };

            let mut summaries = Vec::with_capacity(layers.len());
            for layer in &layers {
                let summary = prepare_layer(&workspace, layer, table.as_ref())
                    .with_context(|| format!("failed to prepare layer {}", layer))?;
                summaries.push(summary);
            }

            match common.format {
                OutputFormat::Text => print!("{}", render_preparation_text(&summaries)),
                OutputFormat::Json => println!("{}", render_preparation_json(&summaries)),
            }
        }
        Commands::Impact {
            layers,
            magnitude,
            pipe_diameter,
            fragility_database,
            common,
        } => {
            let resolved = load_config(&common)?;
            let layers = if layers.is_empty() {
                resolved.layers.clone()
            } else {
                layers
            };
            if layers.is_empty() {
                anyhow::bail!("no layers given (use --layer or set \"layers\" in the config file)");
            }
            let magnitude = require_magnitude(magnitude, &resolved)?;
            let diameter = effective_diameter(pipe_diameter, &resolved)?;

            let db = load_fragility_database(
                fragility_database
                    .as_deref()
                    .unwrap_or(&resolved.fragility_database),
            )?;
            let workspace = open_workspace(&resolved)?;

            let summaries = run_disaster_impact(&workspace, &db, &layers, magnitude, diameter)?;

            match common.format {
                OutputFormat::Text => print!("{}", render_text(&summaries)),
                OutputFormat::Json => println!("{}", render_json(&summaries)),
            }
        }
        Commands::Evaluate {
            fragility_id,
            im,
            pipe_diameter,
            fragility_database,
            common,
        } => {
            let resolved = load_config(&common)?;
            let diameter = effective_diameter(pipe_diameter, &resolved)?;
            let db = load_fragility_database(
                fragility_database
                    .as_deref()
                    .unwrap_or(&resolved.fragility_database),
            )?;

            let report = evaluate_fragility(&db, &fragility_id, im, diameter)?;

            match common.format {
                OutputFormat::Text => print!("{}", render_evaluation_text(&report)),
                OutputFormat::Json => println!("{}", render_evaluation_json(&report)),
            }
        }
        Commands::Route {
            incidents,
            incidents_where,
            facilities,
            facilities_where,
            facility_count,
            name,
            overwrite,
            run_impact,
            magnitude,
            output_dir,
            common,
        } => {
            let resolved = load_config(&common)?;
            let workspace = open_workspace(&resolved)?;

            if run_impact {
                let magnitude = require_magnitude(magnitude, &resolved)?;
                let db = load_fragility_database(&resolved.fragility_database)?;
                run_disaster_impact(
                    &workspace,
                    &db,
                    std::slice::from_ref(&resolved.barrier_layer),
                    magnitude,
                    resolved.pipe_diameter,
                )?;
            }

            let facility_count = match facility_count {
                Some(raw) => parse_facility_count(Some(&raw)),
                None => resolved.facility_count,
            };
            let output_layer =
                output_layer_name(name.as_deref(), overwrite, &mut rand::thread_rng())?;
            if overwrite {
                tracing::info!(output_layer = %output_layer, "existing route layer will be overwritten");
            } else {
                tracing::info!(output_layer = %output_layer, "new route layer will be created");
            }

            let options = RouteOptions {
                travel_mode: resolved.travel_mode.clone(),
                facility_count,
                barrier_layer: resolved.barrier_layer.clone(),
                barrier_states: resolved.barrier_states.clone(),
                incidents: LayerFilter {
                    layer: incidents,
                    where_clause: incidents_where,
                },
                facilities: LayerFilter {
                    layer: facilities,
                    where_clause: facilities_where,
                },
                output_layer,
                overwrite,
            };
            let mut solver =
                JsonRequestSolver::new(output_dir.unwrap_or_else(|| resolved.route_output_dir.clone()));
            let outcome = run_route_analysis(&workspace, &options, &mut solver)?;

            match common.format {
                OutputFormat::Text => print!("{}", render_route_text(&outcome)),
                OutputFormat::Json => println!("{}", render_route_json(&outcome)),
            }
        }
        Commands::Extract {
            input,
            input_key,
            join,
            join_key,
            fields,
            common,
        } => {
            let resolved = load_config(&common)?;
            let workspace = open_workspace(&resolved)?;
            let updated =
                extract::extract_fields(&workspace, &input, &input_key, &join, &join_key, &fields)?;
            let summary = ExtractSummary {
                layer: input,
                updated,
            };

            match common.format {
                OutputFormat::Text => print!("{}", render_extract_text(&summary)),
                OutputFormat::Json => println!("{}", render_extract_json(&summary)),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref());

                match resolved {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref())
                    .context("failed to load configuration")?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

/// Load config from `--config` or auto-discovery, then apply `--workspace`
fn load_config(common: &CommonArgs) -> anyhow::Result<ResolvedConfig> {
    let project_root = std::env::current_dir()?;
    let mut resolved = config::load_and_resolve(&project_root, common.config.as_deref())
        .context("failed to load configuration")?;

    if let Some(config_path) = &resolved.config_path {
        tracing::info!("using config: {}", config_path.display());
    }
    if let Some(ref workspace) = common.workspace {
        resolved.workspace = absolute(&project_root, workspace);
    }
    Ok(resolved)
}

fn open_workspace(resolved: &ResolvedConfig) -> anyhow::Result<Workspace> {
    Workspace::open(&resolved.workspace).context("failed to open workspace")
}

fn require_magnitude(
    flag: Option<Magnitude>,
    resolved: &ResolvedConfig,
) -> anyhow::Result<Magnitude> {
    flag.or(resolved.magnitude).ok_or_else(|| {
        anyhow::anyhow!("no magnitude given (use --magnitude or set \"magnitude\" in the config file)")
    })
}

fn effective_diameter(flag: Option<f64>, resolved: &ResolvedConfig) -> anyhow::Result<f64> {
    match flag {
        Some(d) if !d.is_finite() || d <= 0.0 => {
            anyhow::bail!("--pipe-diameter must be positive (got {})", d)
        }
        Some(d) => Ok(d),
        None => Ok(resolved.pipe_diameter),
    }
}

fn absolute(root: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        root.join(path)
    } else {
        path.to_path_buf()
    }
}

fn print_config(resolved: &ResolvedConfig) {
    println!("Configuration:");
    if let Some(ref p) = resolved.config_path {
        println!("  Source: {}", p.display());
    } else {
        println!("  Source: defaults (no config file found)");
    }
    println!();
    println!("Data:");
    println!("  workspace:          {}", resolved.workspace.display());
    println!(
        "  fragility_database: {}",
        resolved.fragility_database.display()
    );
    println!("  stations:           {}", resolved.stations.display());
    println!();
    println!("Simulation:");
    println!(
        "  magnitude:     {}",
        resolved
            .magnitude
            .map(|m| m.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "  layers:        {}",
        if resolved.layers.is_empty() {
            "none".to_string()
        } else {
            resolved.layers.join(", ")
        }
    );
    println!("  pipe_diameter: {}", resolved.pipe_diameter);
    println!();
    println!("Route:");
    println!("  travel_mode:    {}", resolved.travel_mode);
    println!("  facility_count: {}", resolved.facility_count);
    println!("  barrier_layer:  {}", resolved.barrier_layer);
    println!("  barrier_states: {}", resolved.barrier_states.join(", "));
    println!("  output_dir:     {}", resolved.route_output_dir.display());
}
