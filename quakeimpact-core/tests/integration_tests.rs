//! End-to-end tests over an on-disk workspace
//!
//! Each test builds its own workspace database and reference files in a
//! temporary directory and drives the public passes the way the CLI does.

use quakeimpact_core::distribution::lognormal_cdf;
use quakeimpact_core::fragility::format_ep;
use quakeimpact_core::preparation::prepare_layer;
use quakeimpact_core::reference::{load_fragility_database, load_station_table};
use quakeimpact_core::route::{
    default_barrier_states, read_route_request, run_route_analysis, JsonRequestSolver,
    LayerFilter, RouteOptions,
};
use quakeimpact_core::{extract, run_disaster_impact, Magnitude, Workspace};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FRAGILITY_JSON: &str = r#"[
    {"Fragility_no": "F1", "Hazard_type": "Earthquake", "IM": "PGA", "IM_unit": "g",
     "Fragility_distribution": "Lognormal", "No_of_damage_state": 2,
     "Damage_state_1": "Slight", "Damage_state_med_1": 0.3, "Damage_state_std_1": 0.4,
     "Damage_state_2": "Moderate", "Damage_state_med_2": 0.6, "Damage_state_std_2": 0.5},
    {"Fragility_no": 7, "Hazard_type": "Earthquake", "IM": "PGA", "IM_unit": "g",
     "Fragility_distribution": "Discrete", "No_of_damage_state": "1",
     "Damage_state_1": "Complete", "Damage_state_med_1": "0.1 0.5 1.0",
     "Damage_state_std_1": "0.0 0.4 0.9"},
    {"Fragility_no": "P1", "Hazard_type": "Earthquake", "IM": "PGV", "IM_unit": "cm/s",
     "Fragility_distribution": "Polynomial", "No_of_damage_state": 1,
     "Damage_state_1": "Leak", "Fragility_polynomial": "0.3*D*PGV^2"}
]"#;

const STATIONS_JSON: &str = r#"[
    {"OBJECTID": 1, "LATITUDE": 45.5, "LONGITUDE": -122.7,
     "M81_PGA": 0.2, "M84_PGA": 0.3, "M87_PGA": 0.4, "M90_PGA": 0.5},
    {"OBJECTID": 2, "LATITUDE": 42.3, "LONGITUDE": -124.0,
     "M81_PGA": 0.6, "M84_PGA": 0.7, "M87_PGA": 0.8, "M90_PGA": 0.9}
]"#;

struct Project {
    _dir: TempDir,
    root: PathBuf,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::write(root.join("fragility.json"), FRAGILITY_JSON).unwrap();
        std::fs::write(root.join("stations.json"), STATIONS_JSON).unwrap();
        Connection::open(root.join("Infrastructures.db")).unwrap();
        Project { _dir: dir, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn workspace(&self) -> Workspace {
        Workspace::open(&self.path("Infrastructures.db")).unwrap()
    }

    fn exec(&self, sql: &str) {
        let conn = Connection::open(self.path("Infrastructures.db")).unwrap();
        conn.execute_batch(sql).unwrap();
    }
}

fn bridges_table(rows: &[(&str, Option<&str>, Option<f64>)]) -> String {
    let mut sql = String::from(
        r#"CREATE TABLE "Bridges" (
            "Name" TEXT, "Frag_no" TEXT, "Damage" TEXT, "EP" TEXT, "Hazard" TEXT,
            "IM" TEXT, "IM_unit" TEXT, "M81_PGA" REAL, "M84_PGA" REAL, "M87_PGA" REAL,
            "M90_PGA" REAL, "EQ_MAG" TEXT, "LAT_CALC" REAL, "LONG_CALC" REAL);"#,
    );
    for (name, frag, pga) in rows {
        let frag = frag.map_or("NULL".to_string(), |f| format!("'{}'", f));
        let pga = pga.map_or("NULL".to_string(), |p| p.to_string());
        sql.push_str(&format!(
            r#"INSERT INTO "Bridges" ("Name", "Frag_no", "M90_PGA") VALUES ('{}', {}, {});"#,
            name, frag, pga
        ));
    }
    sql
}

fn damage_of(project: &Project, name: &str) -> (Option<String>, Option<String>) {
    let conn = Connection::open(project.path("Infrastructures.db")).unwrap();
    conn.query_row(
        r#"SELECT "Damage", "EP" FROM "Bridges" WHERE "Name" = ?1"#,
        [name],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .unwrap()
}

#[test]
fn test_lognormal_scenario_selects_lower_severity_state() {
    let project = Project::new();
    project.exec(&bridges_table(&[("A", Some("F1"), Some(0.5))]));

    let db = load_fragility_database(&project.path("fragility.json")).unwrap();
    let ws = project.workspace();
    let summaries =
        run_disaster_impact(&ws, &db, &["Bridges".to_string()], Magnitude::M90, 1.0).unwrap();

    assert_eq!(summaries[0].updated, 1);
    let (damage, ep) = damage_of(&project, "A");
    assert_eq!(damage.as_deref(), Some("Slight"));
    let expected = format_ep(lognormal_cdf(0.5, 0.3, 0.4).unwrap());
    assert_eq!(ep, Some(expected));

    let conn = Connection::open(project.path("Infrastructures.db")).unwrap();
    let (hazard, im, unit, mag): (String, String, String, String) = conn
        .query_row(
            r#"SELECT "Hazard", "IM", "IM_unit", "EQ_MAG" FROM "Bridges""#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(
        (hazard.as_str(), im.as_str(), unit.as_str(), mag.as_str()),
        ("Earthquake", "PGA", "g", "9.0")
    );
}

#[test]
fn test_unknown_id_is_skipped_and_later_rows_written() {
    let project = Project::new();
    project.exec(&bridges_table(&[
        ("A", Some("F1"), Some(0.5)),
        ("B", Some("MISSING"), Some(0.5)),
        ("C", None, Some(0.5)),
        ("D", Some("F1"), None),
        ("E", Some("7"), Some(0.05)),
    ]));

    let db = load_fragility_database(&project.path("fragility.json")).unwrap();
    let ws = project.workspace();
    let summaries =
        run_disaster_impact(&ws, &db, &["Bridges".to_string()], Magnitude::M90, 1.0).unwrap();

    assert_eq!(summaries[0].rows, 5);
    assert_eq!(summaries[0].updated, 2);
    assert_eq!(summaries[0].skipped, 3);
    assert_eq!(damage_of(&project, "B"), (None, None));
    assert_eq!(damage_of(&project, "C"), (None, None));
    assert_eq!(damage_of(&project, "D"), (None, None));
    // below the first knot clamps to its EP; nothing crosses 0.5
    assert_eq!(
        damage_of(&project, "E"),
        (Some("None".to_string()), Some("0.0".to_string()))
    );
}

#[test]
fn test_missing_layer_aborts_impact() {
    let project = Project::new();
    let db = load_fragility_database(&project.path("fragility.json")).unwrap();
    let ws = project.workspace();
    let result = run_disaster_impact(&ws, &db, &["Pipelines".to_string()], Magnitude::M81, 1.0);
    assert!(result.is_err());
}

#[test]
fn test_parameter_error_aborts_but_keeps_earlier_rows() {
    let project = Project::new();
    std::fs::write(
        project.path("with_bad.json"),
        r#"[
        {"Fragility_no": "F1", "Hazard_type": "Earthquake", "IM": "PGA", "IM_unit": "g",
         "Fragility_distribution": "Lognormal", "No_of_damage_state": 1,
         "Damage_state_1": "Slight", "Damage_state_med_1": 0.3, "Damage_state_std_1": 0.4},
        {"Fragility_no": "BAD", "Hazard_type": "Earthquake", "IM": "PGA", "IM_unit": "g",
         "Fragility_distribution": "Lognormal", "No_of_damage_state": 1,
         "Damage_state_1": "Slight", "Damage_state_med_1": -0.2, "Damage_state_std_1": 0.4}
    ]"#,
    )
    .unwrap();
    project.exec(&bridges_table(&[
        ("A", Some("F1"), Some(0.5)),
        ("B", Some("BAD"), Some(0.5)),
        ("C", Some("F1"), Some(0.5)),
    ]));

    let db = load_fragility_database(&project.path("with_bad.json")).unwrap();
    let ws = project.workspace();
    let result = run_disaster_impact(&ws, &db, &["Bridges".to_string()], Magnitude::M90, 1.0);

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("median"), "{:#}", err);
    // rows before the failure stay committed, rows after it are never reached
    assert_eq!(damage_of(&project, "A").0.as_deref(), Some("Slight"));
    assert!(damage_of(&project, "A").1.is_some());
    assert_eq!(damage_of(&project, "B"), (None, None));
    assert_eq!(damage_of(&project, "C"), (None, None));
}

#[test]
fn test_prepare_then_impact() {
    let project = Project::new();
    project.exec(
        r#"
        CREATE TABLE "coast bridges" ("Name" TEXT, "LAT_CALC" REAL, "LONG_CALC" REAL);
        INSERT INTO "coast bridges" VALUES ('North', 45.4, -122.6);
        INSERT INTO "coast bridges" VALUES ('South', 42.4, -124.1);
        "#,
    );

    let ws = project.workspace();
    let stations = load_station_table(&project.path("stations.json")).unwrap();
    let summary = prepare_layer(&ws, "coast bridges", Some(&stations)).unwrap();
    assert_eq!(summary.layer, "CoastBridges");
    assert_eq!(summary.assigned, 2);

    ws.connection()
        .execute(r#"UPDATE "CoastBridges" SET "Frag_no" = 'F1'"#, [])
        .unwrap();
    let db = load_fragility_database(&project.path("fragility.json")).unwrap();
    let summaries =
        run_disaster_impact(&ws, &db, &["CoastBridges".to_string()], Magnitude::M84, 1.0).unwrap();
    assert_eq!(summaries[0].updated, 2);

    let pga: Vec<f64> = ws
        .read_assets("CoastBridges", Magnitude::M84)
        .unwrap()
        .into_iter()
        .filter_map(|a| a.intensity)
        .collect();
    assert_eq!(pga, vec![0.3, 0.7]);
}

#[test]
fn test_polynomial_uses_pipe_diameter() {
    let project = Project::new();
    project.exec(
        r#"
        CREATE TABLE "Pipes" ("Name" TEXT, "Frag_no" TEXT, "Damage" TEXT, "EP" TEXT,
            "Hazard" TEXT, "IM" TEXT, "IM_unit" TEXT, "M87_PGA" REAL, "EQ_MAG" TEXT);
        INSERT INTO "Pipes" ("Name", "Frag_no", "M87_PGA") VALUES ('main', 'P1', 2.0);
        "#,
    );
    let db = load_fragility_database(&project.path("fragility.json")).unwrap();
    let ws = project.workspace();
    run_disaster_impact(&ws, &db, &["Pipes".to_string()], Magnitude::M87, 0.5).unwrap();

    let (damage, ep, im): (String, String, String) = ws
        .connection()
        .query_row(r#"SELECT "Damage", "EP", "IM" FROM "Pipes""#, [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap();
    // 0.3 * 0.5 * 2^2
    assert_eq!(ep, "0.6");
    assert_eq!(damage, "Leak");
    assert_eq!(im, "PGV");
}

fn route_options(output_layer: &str) -> RouteOptions {
    RouteOptions {
        travel_mode: "Vehicle".to_string(),
        facility_count: 1,
        barrier_layer: "Bridges".to_string(),
        barrier_states: default_barrier_states(),
        incidents: LayerFilter {
            layer: "Incidents".to_string(),
            where_clause: None,
        },
        facilities: LayerFilter {
            layer: "FireStations".to_string(),
            where_clause: None,
        },
        output_layer: output_layer.to_string(),
        overwrite: false,
    }
}

#[test]
fn test_route_without_assessed_layer_continues() {
    let project = Project::new();
    let ws = project.workspace();
    let mut solver = JsonRequestSolver::new(project.path("NetworkAnalysis"));
    let outcome = run_route_analysis(&ws, &route_options("Routes"), &mut solver).unwrap();
    assert_eq!(outcome.barrier_count, 0);
    assert!(outcome.location.is_some());
}

#[test]
fn test_route_uses_assessed_damage() {
    let project = Project::new();
    project.exec(&bridges_table(&[
        ("A", Some("F1"), Some(0.5)),
        ("B", Some("F1"), Some(0.01)),
    ]));
    let db = load_fragility_database(&project.path("fragility.json")).unwrap();
    let ws = project.workspace();
    run_disaster_impact(&ws, &db, &["Bridges".to_string()], Magnitude::M90, 1.0).unwrap();

    let mut solver = JsonRequestSolver::new(project.path("NetworkAnalysis"));
    let outcome = run_route_analysis(&ws, &route_options("Routes"), &mut solver).unwrap();
    assert_eq!(outcome.barrier_count, 1);

    let request = read_route_request(outcome.location.as_deref().unwrap()).unwrap();
    assert_eq!(request.barriers[0].damage, "Slight");
    assert_eq!(request.facilities.layer, "FireStations");
}

#[test]
fn test_extract_then_impact() {
    let project = Project::new();
    project.exec(&bridges_table(&[("A", None, Some(0.5)), ("B", None, Some(0.5))]));
    project.exec(
        r#"
        CREATE TABLE "NBI" ("StructureName" TEXT, "Frag_no" TEXT);
        INSERT INTO "NBI" VALUES ('A', 'F1');
        "#,
    );

    let ws = project.workspace();
    let fields = vec!["Frag_no".to_string()];
    let updated = extract::extract_fields(&ws, "Bridges", "Name", "NBI", "StructureName", &fields)
        .unwrap();
    assert_eq!(updated, 1);

    let db = load_fragility_database(&project.path("fragility.json")).unwrap();
    let summaries =
        run_disaster_impact(&ws, &db, &["Bridges".to_string()], Magnitude::M90, 1.0).unwrap();
    assert_eq!(summaries[0].updated, 1);
    assert_eq!(summaries[0].skipped, 1);
}

#[test]
fn test_workspace_must_exist() {
    let dir = TempDir::new().unwrap();
    assert!(Workspace::open(Path::new(&dir.path().join("absent.db"))).is_err());
}
