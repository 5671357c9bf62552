//! Nearest-station PGA assignment
//!
//! Stations carry precomputed PGA values for each supported magnitude; an
//! asset inherits the values of the station closest to it.

use crate::error::{FragilityError, FragilityResult};
use crate::magnitude::Magnitude;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per mile, as used by the station lookup
pub const KM_PER_MILE: f64 = 1.609;

/// PGA values for the four supported magnitudes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagnitudePga {
    #[serde(rename = "M81_PGA")]
    pub m81: f64,
    #[serde(rename = "M84_PGA")]
    pub m84: f64,
    #[serde(rename = "M87_PGA")]
    pub m87: f64,
    #[serde(rename = "M90_PGA")]
    pub m90: f64,
}

impl MagnitudePga {
    pub fn for_magnitude(&self, magnitude: Magnitude) -> f64 {
        match magnitude {
            Magnitude::M81 => self.m81,
            Magnitude::M84 => self.m84,
            Magnitude::M87 => self.m87,
            Magnitude::M90 => self.m90,
        }
    }
}

/// A reference station row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    #[serde(rename = "OBJECTID")]
    pub object_id: i64,
    #[serde(rename = "LATITUDE")]
    pub latitude: f64,
    #[serde(rename = "LONGITUDE")]
    pub longitude: f64,
    #[serde(flatten)]
    pub pga: MagnitudePga,
}

/// Read-only station set, kept in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationTable {
    stations: Vec<Station>,
}

impl StationTable {
    pub fn new(stations: Vec<Station>) -> Self {
        StationTable { stations }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Closest station to the given point, with its distance in miles.
    ///
    /// Equal distances keep the first station encountered.
    pub fn nearest(&self, latitude: f64, longitude: f64) -> FragilityResult<(&Station, f64)> {
        let mut best: Option<(&Station, f64)> = None;
        for station in &self.stations {
            let d = distance_miles(station.latitude, station.longitude, latitude, longitude);
            match best {
                Some((_, best_d)) if d < best_d => best = Some((station, d)),
                None => best = Some((station, d)),
                _ => {}
            }
        }
        best.ok_or(FragilityError::NoStationsAvailable)
    }
}

/// Great-circle distance in miles by the spherical law of cosines.
///
/// Works on colatitudes; the cosine term is clamped so coincident points
/// yield 0 rather than NaN.
pub fn distance_miles(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let colat_a = (90.0 - lat_a).to_radians();
    let colat_b = (90.0 - lat_b).to_radians();
    let dlon = (lon_a - lon_b).to_radians();
    let cos_angle = colat_a.cos() * colat_b.cos() + colat_a.sin() * colat_b.sin() * dlon.cos();
    EARTH_RADIUS_KM * cos_angle.clamp(-1.0, 1.0).acos() / KM_PER_MILE
}

/// Nearest station's PGA values for an asset at `(latitude, longitude)`
pub fn assign_nearest_station(
    table: &StationTable,
    latitude: f64,
    longitude: f64,
) -> FragilityResult<MagnitudePga> {
    table.nearest(latitude, longitude).map(|(s, _)| s.pga)
}
