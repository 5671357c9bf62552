//! Reference data loading
//!
//! The fragility database and the station table are read once per run, in
//! full. A missing or unreadable source is a fatal configuration failure.

use crate::fragility::{Cell, FragilityDatabase, RawFragilityRow, FRAGILITY_COLUMNS};
use crate::station::{Station, StationTable};
use crate::store::quote_ident;
use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// SQLite table holding the fragility reference rows
pub const FRAGILITY_TABLE: &str = "Fragility_Database";

/// Load and parse the fragility database.
///
/// `.json` files hold an array of row objects; anything else is opened as a
/// SQLite database containing a `Fragility_Database` table.
pub fn load_fragility_database(path: &Path) -> Result<FragilityDatabase> {
    let rows = if is_json(path) {
        read_fragility_json(path)?
    } else {
        read_fragility_sqlite(path)?
    };
    let db = FragilityDatabase::from_rows(rows.iter())
        .with_context(|| format!("invalid fragility database: {}", path.display()))?;
    tracing::debug!(records = db.len(), path = %path.display(), "fragility database loaded");
    Ok(db)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn read_fragility_json(path: &Path) -> Result<Vec<RawFragilityRow>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fragility database: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse fragility database: {}", path.display()))
}

fn read_fragility_sqlite(path: &Path) -> Result<Vec<RawFragilityRow>> {
    if !path.exists() {
        anyhow::bail!("fragility database does not exist: {}", path.display());
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open fragility database: {}", path.display()))?;
    read_fragility_table(&conn)
        .with_context(|| format!("failed to read {} from {}", FRAGILITY_TABLE, path.display()))
}

/// Read every row of the `Fragility_Database` table
pub fn read_fragility_table(conn: &Connection) -> Result<Vec<RawFragilityRow>> {
    let columns = FRAGILITY_COLUMNS
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {} FROM {}", columns, quote_ident(FRAGILITY_TABLE));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let mut cells = Vec::with_capacity(FRAGILITY_COLUMNS.len());
            for i in 0..FRAGILITY_COLUMNS.len() {
                cells.push(cell_from_value(row.get_ref(i)?));
            }
            Ok(RawFragilityRow::from_cells(cells))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn cell_from_value(value: ValueRef<'_>) -> Option<Cell> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Cell::Number(i as f64)),
        ValueRef::Real(f) => Some(Cell::Number(f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(Cell::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }
}

/// Load the station table from a JSON array of station rows
pub fn load_station_table(path: &Path) -> Result<StationTable> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read station table: {}", path.display()))?;
    let stations: Vec<Station> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse station table: {}", path.display()))?;
    tracing::debug!(stations = stations.len(), path = %path.display(), "station table loaded");
    Ok(StationTable::new(stations))
}
