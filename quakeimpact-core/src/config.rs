//! Configuration file support for quakeimpact
//!
//! Loads project-specific configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.quakeimpactrc.json` in project root
//! 3. `quakeimpact.config.json` in project root
//!
//! All fields are optional. CLI flags take precedence over config file values.
//! Relative paths are resolved against the project root.

use crate::distribution::DEFAULT_PIPE_DIAMETER;
use crate::magnitude::Magnitude;
use crate::route::{
    default_barrier_states, DEFAULT_BARRIER_LAYER, DEFAULT_FACILITY_COUNT, DEFAULT_TRAVEL_MODE,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_WORKSPACE: &str = "Infrastructures.db";
pub const DEFAULT_FRAGILITY_DATABASE: &str = "Fragility_Database_USA.json";
pub const DEFAULT_STATIONS: &str = "PGA Values/BridgePGAs.json";
pub const DEFAULT_ROUTE_OUTPUT_DIR: &str = "NetworkAnalysis";

/// quakeimpact configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuakeImpactConfig {
    /// Workspace database holding the asset layers (default: Infrastructures.db)
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    /// Fragility reference data, JSON or SQLite (default: Fragility_Database_USA.json)
    #[serde(default)]
    pub fragility_database: Option<PathBuf>,

    /// Station table with precomputed PGA values
    #[serde(default)]
    pub stations: Option<PathBuf>,

    /// Earthquake magnitude scenario: "8.1", "8.4", "8.7" or "9.0"
    #[serde(default)]
    pub magnitude: Option<String>,

    /// Asset layers processed by the impact pass, in order
    #[serde(default)]
    pub layers: Vec<String>,

    /// Diameter bound to `D` in polynomial fragility formulas (default: 1)
    #[serde(default)]
    pub pipe_diameter: Option<f64>,

    /// Damage states treated as route barriers
    #[serde(default)]
    pub barrier_states: Option<Vec<String>>,

    #[serde(default)]
    pub route: Option<RouteConfig>,
}

/// Closest-facility request defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Travel mode passed to the solver (default: Vehicle)
    pub travel_mode: Option<String>,
    /// Facilities to find per incident (default: 1)
    pub facility_count: Option<u32>,
    /// Layer whose damaged assets become barriers (default: Bridges)
    pub barrier_layer: Option<String>,
    /// Directory receiving route requests (default: NetworkAnalysis)
    pub output_dir: Option<PathBuf>,
}

/// Resolved configuration with defaults applied and paths made absolute
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub workspace: PathBuf,
    pub fragility_database: PathBuf,
    pub stations: PathBuf,
    /// None when no scenario is configured; the CLI then requires one
    pub magnitude: Option<Magnitude>,
    pub layers: Vec<String>,
    pub pipe_diameter: f64,
    pub barrier_states: Vec<String>,
    pub travel_mode: String,
    pub facility_count: u32,
    pub barrier_layer: String,
    pub route_output_dir: PathBuf,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl QuakeImpactConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        if let Some(ref m) = self.magnitude {
            m.parse::<Magnitude>()?;
        }

        if let Some(d) = self.pipe_diameter {
            if !d.is_finite() || d <= 0.0 {
                anyhow::bail!("pipe_diameter must be positive (got {})", d);
            }
        }

        for layer in &self.layers {
            if layer.trim().is_empty() {
                anyhow::bail!("layers must not contain blank names");
            }
        }

        if let Some(ref states) = self.barrier_states {
            if states.is_empty() {
                anyhow::bail!("barrier_states must not be empty");
            }
            if states.iter().any(|s| s.trim().is_empty()) {
                anyhow::bail!("barrier_states must not contain blank states");
            }
        }

        if let Some(ref route) = self.route {
            if route.facility_count == Some(0) {
                anyhow::bail!("route.facility_count must be at least 1");
            }
            if let Some(ref mode) = route.travel_mode {
                if mode.trim().is_empty() {
                    anyhow::bail!("route.travel_mode must not be blank");
                }
            }
            if let Some(ref layer) = route.barrier_layer {
                if layer.trim().is_empty() {
                    anyhow::bail!("route.barrier_layer must not be blank");
                }
            }
        }

        Ok(())
    }

    /// Resolve config against `project_root`, filling in defaults
    pub fn resolve(&self, project_root: &Path) -> Result<ResolvedConfig> {
        self.validate()?;

        let path_or = |value: &Option<PathBuf>, default: &str| {
            let path = value.clone().unwrap_or_else(|| PathBuf::from(default));
            if path.is_absolute() {
                path
            } else {
                project_root.join(path)
            }
        };

        let magnitude = self
            .magnitude
            .as_deref()
            .map(str::parse::<Magnitude>)
            .transpose()?;

        let route = self.route.clone().unwrap_or_default();

        Ok(ResolvedConfig {
            workspace: path_or(&self.workspace, DEFAULT_WORKSPACE),
            fragility_database: path_or(&self.fragility_database, DEFAULT_FRAGILITY_DATABASE),
            stations: path_or(&self.stations, DEFAULT_STATIONS),
            magnitude,
            layers: self.layers.clone(),
            pipe_diameter: self.pipe_diameter.unwrap_or(DEFAULT_PIPE_DIAMETER),
            barrier_states: self
                .barrier_states
                .clone()
                .unwrap_or_else(default_barrier_states),
            travel_mode: route
                .travel_mode
                .unwrap_or_else(|| DEFAULT_TRAVEL_MODE.to_string()),
            facility_count: route.facility_count.unwrap_or(DEFAULT_FACILITY_COUNT),
            barrier_layer: route
                .barrier_layer
                .unwrap_or_else(|| DEFAULT_BARRIER_LAYER.to_string()),
            route_output_dir: path_or(&route.output_dir, DEFAULT_ROUTE_OUTPUT_DIR),
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults(project_root: &Path) -> Result<Self> {
        QuakeImpactConfig::default().resolve(project_root)
    }
}

/// Discover and load a config file from the project root
///
/// Search order:
/// 1. `.quakeimpactrc.json`
/// 2. `quakeimpact.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(project_root: &Path) -> Result<Option<(QuakeImpactConfig, PathBuf)>> {
    for name in [".quakeimpactrc.json", "quakeimpact.config.json"] {
        let path = project_root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<QuakeImpactConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: QuakeImpactConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config for a project
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config from the project root.
/// Returns default config if nothing is found.
pub fn load_and_resolve(project_root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(project_root)? {
            Some((config, path)) => (config, Some(path)),
            None => (QuakeImpactConfig::default(), None),
        }
    };

    let mut resolved = config.resolve(project_root)?;
    resolved.config_path = source_path;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let root = Path::new("/project");
        let resolved = ResolvedConfig::defaults(root).expect("default config should resolve");
        assert_eq!(resolved.workspace, root.join("Infrastructures.db"));
        assert_eq!(
            resolved.fragility_database,
            root.join("Fragility_Database_USA.json")
        );
        assert_eq!(resolved.stations, root.join("PGA Values/BridgePGAs.json"));
        assert_eq!(resolved.magnitude, None);
        assert_eq!(resolved.pipe_diameter, 1.0);
        assert_eq!(resolved.travel_mode, "Vehicle");
        assert_eq!(resolved.facility_count, 1);
        assert_eq!(resolved.barrier_layer, "Bridges");
        assert_eq!(
            resolved.barrier_states,
            vec!["Slight", "Moderate", "Extensive", "Complete"]
        );
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "workspace": "/data/assets.db",
            "fragility_database": "ref/fragility.db",
            "stations": "ref/stations.json",
            "magnitude": "8.7",
            "layers": ["Bridges", "Pipelines"],
            "pipe_diameter": 0.6,
            "barrier_states": ["Extensive", "Complete"],
            "route": {"travel_mode": "Truck", "facility_count": 3, "barrier_layer": "Pipelines"}
        }"#;
        let config: QuakeImpactConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve(Path::new("/project")).unwrap();
        assert_eq!(resolved.workspace, PathBuf::from("/data/assets.db"));
        assert_eq!(
            resolved.fragility_database,
            PathBuf::from("/project/ref/fragility.db")
        );
        assert_eq!(resolved.magnitude, Some(Magnitude::M87));
        assert_eq!(resolved.layers, vec!["Bridges", "Pipelines"]);
        assert_eq!(resolved.pipe_diameter, 0.6);
        assert_eq!(resolved.barrier_states, vec!["Extensive", "Complete"]);
        assert_eq!(resolved.travel_mode, "Truck");
        assert_eq!(resolved.facility_count, 3);
        assert_eq!(resolved.barrier_layer, "Pipelines");
    }

    #[test]
    fn test_reject_unknown_fields() {
        let json = r#"{"magnitudes": "9.0"}"#;
        assert!(serde_json::from_str::<QuakeImpactConfig>(json).is_err());
    }

    #[test]
    fn test_reject_unsupported_magnitude() {
        let config: QuakeImpactConfig = serde_json::from_str(r#"{"magnitude": "7.5"}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_non_positive_diameter() {
        for d in ["0", "-1.5"] {
            let json = format!(r#"{{"pipe_diameter": {}}}"#, d);
            let config: QuakeImpactConfig = serde_json::from_str(&json).unwrap();
            assert!(config.validate().is_err(), "diameter {} accepted", d);
        }
    }

    #[test]
    fn test_reject_empty_barrier_states() {
        let config: QuakeImpactConfig =
            serde_json::from_str(r#"{"barrier_states": []}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_zero_facility_count() {
        let config: QuakeImpactConfig =
            serde_json::from_str(r#"{"route": {"facility_count": 0}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_discover_rc_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".quakeimpactrc.json");
        fs::write(&config_path, r#"{"magnitude": "9.0"}"#).unwrap();

        let (config, path) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.magnitude.as_deref(), Some("9.0"));
        assert_eq!(path, config_path);
    }

    #[test]
    fn test_discover_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".quakeimpactrc.json"),
            r#"{"magnitude": "8.1"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("quakeimpact.config.json"),
            r#"{"magnitude": "8.4"}"#,
        )
        .unwrap();

        let (config, _) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(
            config.magnitude.as_deref(),
            Some("8.1"),
            ".quakeimpactrc.json should take priority"
        );
    }

    #[test]
    fn test_no_config_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_and_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("custom.json");
        fs::write(&config_path, r#"{"layers": ["Bridges"]}"#).unwrap();

        let resolved = load_and_resolve(dir.path(), Some(&config_path)).unwrap();
        assert_eq!(resolved.layers, vec!["Bridges"]);
        assert_eq!(resolved.config_path, Some(config_path));
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("quakeimpact.config.json");
        fs::write(&config_path, r#"{"pipe_diameter": -2}"#).unwrap();

        let err = load_and_resolve(dir.path(), None).unwrap_err();
        assert!(format!("{:#}", err).contains("quakeimpact.config.json"));
    }
}
