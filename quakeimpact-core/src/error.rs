//! Error taxonomy for fragility evaluation
//!
//! Only `UnknownFragilityId` is skip-worthy at the batch level; every other
//! variant aborts the run once it reaches the orchestrator.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FragilityError {
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("formula evaluation failed for `{formula}`: {reason}")]
    FormulaEvaluation { formula: String, reason: String },

    #[error("unknown fragility id: {0}")]
    UnknownFragilityId(String),

    #[error("no stations available for nearest-station assignment")]
    NoStationsAvailable,

    #[error("fragility {id}: damage-state count must be between 1 and 5 (got {count})")]
    InvalidStateCount { id: String, count: i64 },
}

impl FragilityError {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FragilityError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True when the batch should log and move on to the next record.
    pub fn is_skippable(&self) -> bool {
        matches!(self, FragilityError::UnknownFragilityId(_))
    }
}

pub type FragilityResult<T> = std::result::Result<T, FragilityError>;
