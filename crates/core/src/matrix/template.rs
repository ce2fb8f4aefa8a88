use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::matrix::CellKey;

/// A fixed set of cell amounts that can be stamped onto a matrix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickFillTemplate {
    entries: BTreeMap<CellKey, u64>,
}

impl QuickFillTemplate {
    pub fn new(entries: impl IntoIterator<Item = (CellKey, u64)>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Demo amounts for the default 11K..99K x 12/24/36 grid. 24-month
    /// contracts carry the richest rebate, 12-month the leanest.
    pub fn reference() -> Self {
        let entries = (1..=9u64).flat_map(|step| {
            let plan_range = step * 11_000;
            [
                (CellKey::new(plan_range, 12), 20_000 + step * 10_000),
                (CellKey::new(plan_range, 24), 50_000 + step * 15_000),
                (CellKey::new(plan_range, 36), 40_000 + step * 12_000),
            ]
        });
        Self::new(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellKey, u64)> + '_ {
        self.entries.iter().map(|(key, amount)| (*key, *amount))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
