use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::matrix::{CellKey, MatrixRecord, RecordId};
use crate::matrix::{MatrixCell, RebateMatrix};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// Parent keys the stored child lacked; now zero with a synthetic id.
    pub backfilled: Vec<CellKey>,
    /// Stored child records with no counterpart in the parent grid.
    pub dropped: Vec<MatrixRecord>,
    /// Stored child cells already above the parent ceiling.
    pub over_ceiling: Vec<CellKey>,
}

/// Builds the editable child grid on the parent's axes.
///
/// Stored child records are placed on the parent key they match (number,
/// numeric string or label form). Every parent key the child does not cover
/// gets a zero cell tagged with a synthetic id so the next save sends it as a
/// new record. Existing child cells are never overwritten.
pub fn initialize_child(
    parent: &RebateMatrix,
    stored: Option<&[MatrixRecord]>,
) -> (RebateMatrix, InitReport) {
    let mut child = parent.empty_like();
    let mut report = InitReport::default();
    let mut covered: BTreeSet<CellKey> = BTreeSet::new();

    for record in stored.unwrap_or_default() {
        let key = parent.find_plan_range(&record.plan_range).map(|range| CellKey {
            plan_range: range.value,
            contract_period: record.contract_period,
        });

        match key {
            Some(key) if child.contains(key) => {
                if covered.insert(key) {
                    child.put_cell(
                        key,
                        MatrixCell { amount: record.rebate_amount, id: record.id.clone() },
                    );
                }
            }
            _ => report.dropped.push(record.clone()),
        }
    }

    let missing: Vec<CellKey> = parent.keys().filter(|key| !covered.contains(key)).collect();
    for key in missing {
        child.put_cell(key, MatrixCell { amount: 0, id: Some(RecordId::synthetic()) });
        report.backfilled.push(key);
    }

    report.over_ceiling =
        child.keys().filter(|key| child.amount(*key) > parent.amount(*key)).collect();
    child.refresh_export();
    (child, report)
}
