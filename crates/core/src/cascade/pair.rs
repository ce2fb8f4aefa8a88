use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::backfill::{initialize_child, InitReport};
use super::validation::{margin, validate_cell_edit, CellEditError};
use crate::domain::matrix::{coerce_amount_input, CellKey, MatrixRecord};
use crate::matrix::RebateMatrix;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMargin {
    pub key: CellKey,
    pub parent: u64,
    pub child: u64,
    pub margin: i64,
}

/// A read-only parent grid and the child grid being allocated from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationPair {
    parent: RebateMatrix,
    child: RebateMatrix,
    cell_errors: BTreeMap<CellKey, CellEditError>,
}

impl AllocationPair {
    pub fn new(parent: RebateMatrix, child: RebateMatrix) -> Self {
        Self { parent, child, cell_errors: BTreeMap::new() }
    }

    /// Builds the child from stored records (or none) and flags stored cells
    /// that already sit above the parent ceiling.
    pub fn initialize(parent: RebateMatrix, stored: Option<&[MatrixRecord]>) -> (Self, InitReport) {
        let (child, report) = initialize_child(&parent, stored);
        let mut pair = Self::new(parent, child);
        for key in &report.over_ceiling {
            let error = CellEditError::ExceedsParent {
                key: *key,
                requested: pair.child.amount(*key),
                ceiling: pair.parent.amount(*key),
            };
            pair.cell_errors.insert(*key, error);
        }
        (pair, report)
    }

    pub fn parent(&self) -> &RebateMatrix {
        &self.parent
    }

    pub fn child(&self) -> &RebateMatrix {
        &self.child
    }

    pub fn cell_errors(&self) -> &BTreeMap<CellKey, CellEditError> {
        &self.cell_errors
    }

    pub fn cell_error(&self, key: CellKey) -> Option<&CellEditError> {
        self.cell_errors.get(&key)
    }

    /// Applies one child edit. A rejected edit keeps the previous amount and
    /// records the error against the cell; an accepted edit clears it.
    pub fn edit_cell(&mut self, key: CellKey, new_value: u64) -> Result<u64, CellEditError> {
        match validate_cell_edit(&self.parent, &self.child, key, new_value) {
            Ok(amount) => {
                self.child
                    .set_cell(key.plan_range, key.contract_period.0, amount)
                    .map_err(|_| CellEditError::UnknownCell { key })?;
                self.cell_errors.remove(&key);
                Ok(amount)
            }
            Err(error) => {
                if self.child.contains(key) {
                    self.cell_errors.insert(key, error.clone());
                }
                Err(error)
            }
        }
    }

    pub fn edit_cell_input(&mut self, key: CellKey, raw: &str) -> Result<u64, CellEditError> {
        self.edit_cell(key, coerce_amount_input(raw))
    }

    pub fn margin(&self, key: CellKey) -> i64 {
        margin(&self.parent, &self.child, key)
    }

    pub fn margins(&self) -> Vec<CellMargin> {
        self.parent
            .keys()
            .map(|key| CellMargin {
                key,
                parent: self.parent.amount(key),
                child: self.child.amount(key),
                margin: self.margin(key),
            })
            .collect()
    }

    /// Sets every child cell to `floor(parent * percent / 100)`.
    pub fn fill_from_parent(&mut self, percent: u32) -> Result<usize, CellEditError> {
        if percent > 100 {
            return Err(CellEditError::PercentOutOfRange(percent));
        }

        let keys: Vec<CellKey> = self.child.keys().collect();
        let mut filled = 0;
        for key in keys {
            let share = u128::from(self.parent.amount(key)) * u128::from(percent) / 100;
            let amount = u64::try_from(share).unwrap_or(u64::MAX);
            self.edit_cell(key, amount)?;
            filled += 1;
        }
        Ok(filled)
    }

    /// Marks `keys` as stored by the backend so they are no longer sent as new.
    pub(crate) fn settle_saved(&mut self, keys: impl IntoIterator<Item = CellKey>) -> usize {
        self.child.settle_synthetic_ids(keys)
    }

    /// Child cells currently above their parent ceiling.
    pub fn violations(&self) -> Vec<CellKey> {
        self.child.keys().filter(|key| self.child.amount(*key) > self.parent.amount(*key)).collect()
    }
}
