//! Fragility records and the per-asset resolver
//!
//! Reference rows arrive with loosely typed cells (numbers or text). They are
//! validated and parsed once, at load time, into [`FragilityRecord`]s whose
//! damage-state curves carry family-specific [`FragilityParams`].
//!
//! Global invariants enforced:
//! - A record holds exactly as many curves as its declared state count
//! - Curves are evaluated in ascending slot order
//! - EP values are encoded to strings exactly once, here

use crate::distribution::{
    discrete_interpolate, evaluate_polynomial, lognormal_cdf, normal_cdf, parse_knots,
    DistributionFamily,
};
use crate::error::{FragilityError, FragilityResult};
use crate::formula::Formula;
use crate::selector::DamageStateMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum number of damage-state slots in the reference schema
pub const MAX_DAMAGE_STATES: usize = 5;

/// A reference-table cell: numeric columns may arrive as text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl Cell {
    /// Render as a key or label. Integral numbers drop the fractional part.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", *v as i64),
            Cell::Number(v) => v.to_string(),
        }
    }

    pub fn as_f64(&self, field: &str) -> FragilityResult<f64> {
        match self {
            Cell::Number(v) => Ok(*v),
            Cell::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                FragilityError::invalid(field, format!("`{}` is not a number", s))
            }),
        }
    }
}

/// One damage-state slot as stored in the reference table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStateSlot {
    pub state: Option<Cell>,
    pub median: Option<Cell>,
    pub std_dev: Option<Cell>,
}

/// A reference row with the 22 named columns of the fragility database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFragilityRow {
    #[serde(rename = "Fragility_no")]
    pub fragility_no: Option<Cell>,
    #[serde(rename = "Hazard_type", default)]
    pub hazard_type: Option<Cell>,
    #[serde(rename = "IM", default)]
    pub im: Option<Cell>,
    #[serde(rename = "IM_unit", default)]
    pub im_unit: Option<Cell>,
    #[serde(rename = "Fragility_distribution", default)]
    pub distribution: Option<Cell>,
    #[serde(rename = "No_of_damage_state", default)]
    pub state_count: Option<Cell>,
    #[serde(rename = "Damage_state_1", default)]
    pub state_1: Option<Cell>,
    #[serde(rename = "Damage_state_med_1", default)]
    pub median_1: Option<Cell>,
    #[serde(rename = "Damage_state_std_1", default)]
    pub std_1: Option<Cell>,
    #[serde(rename = "Damage_state_2", default)]
    pub state_2: Option<Cell>,
    #[serde(rename = "Damage_state_med_2", default)]
    pub median_2: Option<Cell>,
    #[serde(rename = "Damage_state_std_2", default)]
    pub std_2: Option<Cell>,
    #[serde(rename = "Damage_state_3", default)]
    pub state_3: Option<Cell>,
    #[serde(rename = "Damage_state_med_3", default)]
    pub median_3: Option<Cell>,
    #[serde(rename = "Damage_state_std_3", default)]
    pub std_3: Option<Cell>,
    #[serde(rename = "Damage_state_4", default)]
    pub state_4: Option<Cell>,
    #[serde(rename = "Damage_state_med_4", default)]
    pub median_4: Option<Cell>,
    #[serde(rename = "Damage_state_std_4", default)]
    pub std_4: Option<Cell>,
    #[serde(rename = "Fragility_polynomial", default)]
    pub polynomial: Option<Cell>,
    #[serde(rename = "Damage_state_5", default)]
    pub state_5: Option<Cell>,
    #[serde(rename = "Damage_state_med_5", default)]
    pub median_5: Option<Cell>,
    #[serde(rename = "Damage_state_std_5", default)]
    pub std_5: Option<Cell>,
}

/// Column names in reference-table order
pub const FRAGILITY_COLUMNS: [&str; 22] = [
    "Fragility_no",
    "Hazard_type",
    "IM",
    "IM_unit",
    "Fragility_distribution",
    "No_of_damage_state",
    "Damage_state_1",
    "Damage_state_med_1",
    "Damage_state_std_1",
    "Damage_state_2",
    "Damage_state_med_2",
    "Damage_state_std_2",
    "Damage_state_3",
    "Damage_state_med_3",
    "Damage_state_std_3",
    "Damage_state_4",
    "Damage_state_med_4",
    "Damage_state_std_4",
    "Fragility_polynomial",
    "Damage_state_5",
    "Damage_state_med_5",
    "Damage_state_std_5",
];

impl RawFragilityRow {
    /// Build a row from cells listed in [`FRAGILITY_COLUMNS`] order
    pub fn from_cells(mut cells: Vec<Option<Cell>>) -> Self {
        cells.resize(FRAGILITY_COLUMNS.len(), None);
        let mut it = cells.into_iter();
        let mut next = || it.next().flatten();
        RawFragilityRow {
            fragility_no: next(),
            hazard_type: next(),
            im: next(),
            im_unit: next(),
            distribution: next(),
            state_count: next(),
            state_1: next(),
            median_1: next(),
            std_1: next(),
            state_2: next(),
            median_2: next(),
            std_2: next(),
            state_3: next(),
            median_3: next(),
            std_3: next(),
            state_4: next(),
            median_4: next(),
            std_4: next(),
            polynomial: next(),
            state_5: next(),
            median_5: next(),
            std_5: next(),
        }
    }

    /// The five damage-state slots in severity order
    pub fn slots(&self) -> [RawStateSlot; MAX_DAMAGE_STATES] {
        let slot = |state: &Option<Cell>, median: &Option<Cell>, std_dev: &Option<Cell>| {
            RawStateSlot {
                state: state.clone(),
                median: median.clone(),
                std_dev: std_dev.clone(),
            }
        };
        [
            slot(&self.state_1, &self.median_1, &self.std_1),
            slot(&self.state_2, &self.median_2, &self.std_2),
            slot(&self.state_3, &self.median_3, &self.std_3),
            slot(&self.state_4, &self.median_4, &self.std_4),
            slot(&self.state_5, &self.median_5, &self.std_5),
        ]
    }
}

/// Family-specific curve parameters, parsed at load time
#[derive(Debug, Clone, PartialEq)]
pub enum FragilityParams {
    Discrete { x: Vec<f64>, y: Vec<f64> },
    Lognormal { median: f64, std_dev: f64 },
    Normal { median: f64, std_dev: f64 },
    Polynomial { formula: Formula },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DamageStateCurve {
    pub name: String,
    pub params: FragilityParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragilityRecord {
    pub id: String,
    pub hazard_type: String,
    pub im_name: String,
    pub im_unit: String,
    pub family: DistributionFamily,
    pub states: Vec<DamageStateCurve>,
}

impl FragilityRecord {
    /// Validate and parse a raw reference row
    pub fn from_raw(row: &RawFragilityRow) -> FragilityResult<Self> {
        let id = row
            .fragility_no
            .as_ref()
            .map(Cell::as_text)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FragilityError::invalid("Fragility_no", "missing fragility id"))?;

        let family: DistributionFamily = row
            .distribution
            .as_ref()
            .map(Cell::as_text)
            .unwrap_or_default()
            .parse()?;

        let count_cell = row.state_count.as_ref().ok_or_else(|| {
            FragilityError::invalid("No_of_damage_state", format!("{}: missing", id))
        })?;
        let count = count_cell.as_f64("No_of_damage_state")?;
        if count.fract() != 0.0 || !(1.0..=MAX_DAMAGE_STATES as f64).contains(&count) {
            return Err(FragilityError::InvalidStateCount {
                id,
                count: count as i64,
            });
        }
        let count = count as usize;

        let im_name = text_or_empty(&row.im);
        let formula = if family == DistributionFamily::Polynomial {
            let source = text_or_empty(&row.polynomial);
            Some(Formula::parse(&source)?)
        } else {
            None
        };

        let mut states = Vec::with_capacity(count);
        for (index, slot) in row.slots().iter().take(count).enumerate() {
            let name = slot
                .state
                .as_ref()
                .map(Cell::as_text)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    FragilityError::invalid(
                        format!("Damage_state_{}", index + 1),
                        format!("{}: missing damage state name", id),
                    )
                })?;
            let params = match (&formula, family) {
                (Some(formula), _) => FragilityParams::Polynomial {
                    formula: formula.clone(),
                },
                (None, family) => parse_slot_params(family, slot, index + 1)?,
            };
            states.push(DamageStateCurve { name, params });
        }

        Ok(FragilityRecord {
            id,
            hazard_type: text_or_empty(&row.hazard_type),
            im_name,
            im_unit: text_or_empty(&row.im_unit),
            family,
            states,
        })
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Evaluate every damage state at `im` into an ordered EP map
    pub fn evaluate(&self, im: f64, diameter: f64) -> FragilityResult<DamageStateMap> {
        let mut map = DamageStateMap::new();
        for curve in &self.states {
            let ep = evaluate_curve(&curve.params, &self.im_name, im, diameter)?;
            map.insert(curve.name.clone(), format_ep(ep));
        }
        Ok(map)
    }
}

fn text_or_empty(cell: &Option<Cell>) -> String {
    cell.as_ref().map(Cell::as_text).unwrap_or_default()
}

fn parse_slot_params(
    family: DistributionFamily,
    slot: &RawStateSlot,
    slot_no: usize,
) -> FragilityResult<FragilityParams> {
    let median_field = format!("Damage_state_med_{}", slot_no);
    let std_field = format!("Damage_state_std_{}", slot_no);
    let median = slot
        .median
        .as_ref()
        .ok_or_else(|| FragilityError::invalid(&median_field, "missing"))?;
    let std_dev = slot
        .std_dev
        .as_ref()
        .ok_or_else(|| FragilityError::invalid(&std_field, "missing"))?;

    match family {
        DistributionFamily::Discrete => Ok(FragilityParams::Discrete {
            x: parse_knots(&median_field, &median.as_text())?,
            y: parse_knots(&std_field, &std_dev.as_text())?,
        }),
        DistributionFamily::Lognormal => Ok(FragilityParams::Lognormal {
            median: median.as_f64(&median_field)?,
            std_dev: std_dev.as_f64(&std_field)?,
        }),
        DistributionFamily::Normal => Ok(FragilityParams::Normal {
            median: median.as_f64(&median_field)?,
            std_dev: std_dev.as_f64(&std_field)?,
        }),
        DistributionFamily::Polynomial => Err(FragilityError::invalid(
            "Fragility_polynomial",
            "polynomial curves take their parameters from the formula column",
        )),
    }
}

/// Evaluate one curve at `im`
pub fn evaluate_curve(
    params: &FragilityParams,
    im_name: &str,
    im: f64,
    diameter: f64,
) -> FragilityResult<f64> {
    match params {
        FragilityParams::Discrete { x, y } => discrete_interpolate(im, x, y),
        FragilityParams::Lognormal { median, std_dev } => lognormal_cdf(im, *median, *std_dev),
        FragilityParams::Normal { median, std_dev } => normal_cdf(im, *median, *std_dev),
        FragilityParams::Polynomial { formula } => {
            evaluate_polynomial(formula, im_name, im, diameter)
        }
    }
}

/// Encode an EP as the shortest round-trip decimal, keeping a trailing `.0`
/// on integral values and switching to exponent form outside [1e-4, 1e16).
///
/// `0.5` → `"0.5"`, `1.0` → `"1.0"`, `1e-5` → `"1e-05"`, NaN → `"nan"`.
pub fn format_ep(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sci = format!("{:e}", value);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if (-4..16).contains(&exponent) {
        let plain = format!("{}", value);
        if plain.contains('.') {
            plain
        } else {
            format!("{}.0", plain)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

/// In-memory fragility database keyed by fragility id.
///
/// Loaded once per run and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct FragilityDatabase {
    records: HashMap<String, FragilityRecord>,
}

impl FragilityDatabase {
    /// Parse raw rows. Later rows with a repeated id replace earlier ones.
    pub fn from_rows<'a>(
        rows: impl IntoIterator<Item = &'a RawFragilityRow>,
    ) -> FragilityResult<Self> {
        let mut records = HashMap::new();
        for row in rows {
            let record = FragilityRecord::from_raw(row)?;
            records.insert(record.id.clone(), record);
        }
        Ok(FragilityDatabase { records })
    }

    pub fn from_records(records: impl IntoIterator<Item = FragilityRecord>) -> Self {
        FragilityDatabase {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&FragilityRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted ids, for deterministic listing
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.records.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Look up `id` and evaluate all of its damage states at `im`
    pub fn resolve(
        &self,
        id: &str,
        im: f64,
        diameter: f64,
    ) -> FragilityResult<(&FragilityRecord, DamageStateMap)> {
        let record = self
            .get(id)
            .ok_or_else(|| FragilityError::UnknownFragilityId(id.to_string()))?;
        let map = record.evaluate(im, diameter)?;
        Ok((record, map))
    }
}
