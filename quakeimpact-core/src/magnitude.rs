//! Supported earthquake magnitude scenarios
//!
//! Each scenario maps to the asset column holding its PGA values.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Magnitude {
    #[serde(rename = "8.1")]
    M81,
    #[serde(rename = "8.4")]
    M84,
    #[serde(rename = "8.7")]
    M87,
    #[serde(rename = "9.0")]
    M90,
}

impl Magnitude {
    pub const ALL: [Magnitude; 4] = [
        Magnitude::M81,
        Magnitude::M84,
        Magnitude::M87,
        Magnitude::M90,
    ];

    /// Label written to the `EQ_MAG` column
    pub fn label(&self) -> &'static str {
        match self {
            Magnitude::M81 => "8.1",
            Magnitude::M84 => "8.4",
            Magnitude::M87 => "8.7",
            Magnitude::M90 => "9.0",
        }
    }

    /// Asset column holding this scenario's PGA
    pub fn pga_column(&self) -> &'static str {
        match self {
            Magnitude::M81 => "M81_PGA",
            Magnitude::M84 => "M84_PGA",
            Magnitude::M87 => "M87_PGA",
            Magnitude::M90 => "M90_PGA",
        }
    }
}

impl fmt::Display for Magnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Magnitude {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Magnitude::ALL
            .into_iter()
            .find(|m| m.label() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unsupported earthquake magnitude `{}` (expected one of 8.1, 8.4, 8.7, 9.0)",
                    s
                )
            })
    }
}
