//! SQLite-backed asset working set
//!
//! Each asset layer is a table in the workspace database. Reads are
//! field-scoped; writes update one row at a time and commit immediately,
//! so a failure part-way through a pass leaves earlier rows updated.

use crate::magnitude::Magnitude;
use crate::station::MagnitudePga;
use anyhow::{Context, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const FRAG_NO: &str = "Frag_no";
pub const DAMAGE: &str = "Damage";
pub const EP: &str = "EP";
pub const HAZARD: &str = "Hazard";
pub const IM: &str = "IM";
pub const IM_UNIT: &str = "IM_unit";
pub const EQ_MAG: &str = "EQ_MAG";
pub const LAT_CALC: &str = "LAT_CALC";
pub const LONG_CALC: &str = "LONG_CALC";

/// SQLite column affinity for added fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Real,
}

impl FieldType {
    fn sql(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Real => "REAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
}

impl FieldSpec {
    pub const fn text(name: &'static str) -> Self {
        FieldSpec {
            name,
            field_type: FieldType::Text,
        }
    }

    pub const fn real(name: &'static str) -> Self {
        FieldSpec {
            name,
            field_type: FieldType::Real,
        }
    }
}

/// One asset row as seen by the impact pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub row_id: i64,
    pub fragility_id: Option<String>,
    pub intensity: Option<f64>,
    pub damage: Option<String>,
    pub ep: Option<String>,
    pub hazard: Option<String>,
    pub im: Option<String>,
    pub im_unit: Option<String>,
    pub magnitude: Option<String>,
}

/// Asset coordinates in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetLocation {
    pub row_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A damaged asset selected as a routing barrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierPoint {
    pub row_id: i64,
    pub damage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// Handle on the workspace database
pub struct Workspace {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Workspace {
    /// Open an existing workspace database for reading and writing
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("workspace database does not exist: {}", path.display());
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open workspace database: {}", path.display()))?;
        Ok(Workspace {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a scratch workspace that lives only in memory
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory workspace")?;
        Ok(Workspace { conn, path: None })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn layer_exists(&self, layer: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![layer],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to look up layer: {}", layer))?;
        Ok(count > 0)
    }

    fn require_layer(&self, layer: &str) -> Result<()> {
        if !self.layer_exists(layer)? {
            anyhow::bail!("layer does not exist in workspace: {}", layer);
        }
        Ok(())
    }

    /// Column names of a layer, in table order
    pub fn columns(&self, layer: &str) -> Result<Vec<String>> {
        self.require_layer(layer)?;
        let sql = format!("PRAGMA table_info({})", quote_ident(layer));
        let mut stmt = self.conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read columns of {}", layer))?;
        Ok(names)
    }

    /// Add any missing fields; returns the names that were added
    pub fn ensure_fields(&self, layer: &str, fields: &[FieldSpec]) -> Result<Vec<String>> {
        let existing = self.columns(layer)?;
        let mut added = Vec::new();
        for field in fields {
            if existing.iter().any(|c| c.eq_ignore_ascii_case(field.name)) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(layer),
                quote_ident(field.name),
                field.field_type.sql()
            );
            self.conn
                .execute(&sql, [])
                .with_context(|| format!("failed to add field {} to {}", field.name, layer))?;
            added.push(field.name.to_string());
        }
        Ok(added)
    }

    /// Read the eight impact-pass fields of every row, in rowid order
    pub fn read_assets(&self, layer: &str, magnitude: Magnitude) -> Result<Vec<AssetRecord>> {
        self.require_layer(layer)?;
        let sql = format!(
            "SELECT rowid, {}, {}, {}, {}, {}, {}, {}, {} FROM {} ORDER BY rowid",
            quote_ident(FRAG_NO),
            quote_ident(DAMAGE),
            quote_ident(EP),
            quote_ident(HAZARD),
            quote_ident(IM),
            quote_ident(IM_UNIT),
            quote_ident(magnitude.pga_column()),
            quote_ident(EQ_MAG),
            quote_ident(layer),
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("layer {} is missing required asset fields", layer))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AssetRecord {
                    row_id: row.get(0)?,
                    fragility_id: value_to_key(row.get_ref(1)?),
                    damage: value_to_text(row.get_ref(2)?),
                    ep: value_to_text(row.get_ref(3)?),
                    hazard: value_to_text(row.get_ref(4)?),
                    im: value_to_text(row.get_ref(5)?),
                    im_unit: value_to_text(row.get_ref(6)?),
                    intensity: value_to_f64(row.get_ref(7)?),
                    magnitude: value_to_text(row.get_ref(8)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read assets from {}", layer))?;
        Ok(rows)
    }

    /// Write the assessment fields of one asset back to its row
    pub fn write_assessment(&self, layer: &str, record: &AssetRecord) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET {} = ?1, {} = ?2, {} = ?3, {} = ?4, {} = ?5, {} = ?6 WHERE rowid = ?7",
            quote_ident(layer),
            quote_ident(DAMAGE),
            quote_ident(EP),
            quote_ident(HAZARD),
            quote_ident(IM),
            quote_ident(IM_UNIT),
            quote_ident(EQ_MAG),
        );
        self.conn
            .execute(
                &sql,
                params![
                    record.damage,
                    record.ep,
                    record.hazard,
                    record.im,
                    record.im_unit,
                    record.magnitude,
                    record.row_id
                ],
            )
            .with_context(|| format!("failed to update row {} of {}", record.row_id, layer))?;
        Ok(())
    }

    /// Read `LAT_CALC`/`LONG_CALC` of every row
    pub fn read_locations(&self, layer: &str) -> Result<Vec<AssetLocation>> {
        self.require_layer(layer)?;
        let sql = format!(
            "SELECT rowid, {}, {} FROM {} ORDER BY rowid",
            quote_ident(LAT_CALC),
            quote_ident(LONG_CALC),
            quote_ident(layer)
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("layer {} has no coordinate fields", layer))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AssetLocation {
                    row_id: row.get(0)?,
                    latitude: value_to_f64(row.get_ref(1)?),
                    longitude: value_to_f64(row.get_ref(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read coordinates from {}", layer))?;
        Ok(rows)
    }

    /// Write the four magnitude PGA columns of one row
    pub fn write_station_pga(&self, layer: &str, row_id: i64, pga: &MagnitudePga) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET {} = ?1, {} = ?2, {} = ?3, {} = ?4 WHERE rowid = ?5",
            quote_ident(layer),
            quote_ident(Magnitude::M81.pga_column()),
            quote_ident(Magnitude::M84.pga_column()),
            quote_ident(Magnitude::M87.pga_column()),
            quote_ident(Magnitude::M90.pga_column()),
        );
        self.conn
            .execute(&sql, params![pga.m81, pga.m84, pga.m87, pga.m90, row_id])
            .with_context(|| format!("failed to update PGA values of row {} in {}", row_id, layer))?;
        Ok(())
    }

    /// Rows whose `Damage` value is one of `states`
    pub fn select_damaged(&self, layer: &str, states: &[String]) -> Result<Vec<BarrierPoint>> {
        self.require_layer(layer)?;
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let columns = self.columns(layer)?;
        let has_coords = [LAT_CALC, LONG_CALC]
            .iter()
            .all(|c| columns.iter().any(|col| col.eq_ignore_ascii_case(c)));
        let coords = if has_coords {
            format!("{}, {}", quote_ident(LAT_CALC), quote_ident(LONG_CALC))
        } else {
            "NULL, NULL".to_string()
        };
        let placeholders = (1..=states.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT rowid, {}, {} FROM {} WHERE {} IN ({}) ORDER BY rowid",
            quote_ident(DAMAGE),
            coords,
            quote_ident(layer),
            quote_ident(DAMAGE),
            placeholders
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(states.iter()), |row| {
                Ok(BarrierPoint {
                    row_id: row.get(0)?,
                    damage: value_to_text(row.get_ref(1)?).unwrap_or_default(),
                    latitude: value_to_f64(row.get_ref(2)?),
                    longitude: value_to_f64(row.get_ref(3)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to select damaged assets from {}", layer))?;
        Ok(rows)
    }

    /// Read `key` plus `fields` for every row: `(rowid, key, values)`
    pub fn read_fields(
        &self,
        layer: &str,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<(i64, Option<String>, Vec<Value>)>> {
        self.require_layer(layer)?;
        let mut columns = vec![quote_ident(key)];
        columns.extend(fields.iter().map(|f| quote_ident(f)));
        let sql = format!(
            "SELECT rowid, {} FROM {} ORDER BY rowid",
            columns.join(", "),
            quote_ident(layer)
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("failed to read fields from {}", layer))?;
        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(fields.len());
                for i in 0..fields.len() {
                    values.push(row.get::<_, Value>(i + 2)?);
                }
                Ok((row.get(0)?, value_to_key(row.get_ref(1)?), values))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read fields from {}", layer))?;
        Ok(rows)
    }

    /// Overwrite `fields` of one row with `values`
    pub fn write_fields(
        &self,
        layer: &str,
        row_id: i64,
        fields: &[String],
        values: &[Value],
    ) -> Result<()> {
        if fields.len() != values.len() {
            anyhow::bail!(
                "field/value count mismatch ({} fields, {} values)",
                fields.len(),
                values.len()
            );
        }
        if fields.is_empty() {
            return Ok(());
        }
        let assignments = fields
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{} = ?{}", quote_ident(f), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE rowid = ?{}",
            quote_ident(layer),
            assignments,
            fields.len() + 1
        );
        let mut bound: Vec<Value> = values.to_vec();
        bound.push(Value::Integer(row_id));
        self.conn
            .execute(&sql, rusqlite::params_from_iter(bound.iter()))
            .with_context(|| format!("failed to update row {} of {}", row_id, layer))?;
        Ok(())
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a cell as text. NULL stays `None`; integral reals keep their `.0`.
pub fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(crate::fragility::format_ep(f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Render a cell as a lookup key. Integral reals drop their fraction so a
/// `REAL` column still matches integer-keyed reference rows.
pub fn value_to_key(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Real(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some((f as i64).to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).trim().to_string()),
        other => value_to_text(other),
    }
}

/// Read a numeric cell; numeric text is accepted, anything else is `None`
pub fn value_to_f64(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}
