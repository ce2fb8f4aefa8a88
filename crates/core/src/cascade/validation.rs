use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::matrix::CellKey;
use crate::matrix::RebateMatrix;

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellEditError {
    #[error("cell {key} is not part of the allocation grid")]
    UnknownCell { key: CellKey },
    #[error("amount {requested} for {key} exceeds the parent ceiling of {ceiling}")]
    ExceedsParent { key: CellKey, requested: u64, ceiling: u64 },
    #[error("allocation percent {0} must be within 0..=100")]
    PercentOutOfRange(u32),
}

impl CellEditError {
    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownCell { .. } => "That cell is no longer part of the matrix.".to_owned(),
            Self::ExceedsParent { ceiling, .. } => {
                format!("Cannot exceed the parent rebate of {ceiling}.")
            }
            Self::PercentOutOfRange(_) => "Choose a percentage between 0 and 100.".to_owned(),
        }
    }
}

/// Checks a proposed child amount against the parent ceiling for the same
/// cell. A parent without that cell has a ceiling of 0.
pub fn validate_cell_edit(
    parent: &RebateMatrix,
    child: &RebateMatrix,
    key: CellKey,
    new_value: u64,
) -> Result<u64, CellEditError> {
    if !child.contains(key) {
        return Err(CellEditError::UnknownCell { key });
    }

    let ceiling = parent.amount(key);
    if new_value > ceiling {
        return Err(CellEditError::ExceedsParent { key, requested: new_value, ceiling });
    }

    Ok(new_value)
}

/// What the parent keeps for itself in a cell: `parent - child`.
pub fn margin(parent: &RebateMatrix, child: &RebateMatrix, key: CellKey) -> i64 {
    let parent_amount = i64::try_from(parent.amount(key)).unwrap_or(i64::MAX);
    let child_amount = i64::try_from(child.amount(key)).unwrap_or(i64::MAX);
    parent_amount.saturating_sub(child_amount)
}
