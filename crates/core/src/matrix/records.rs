use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{MatrixCell, MatrixError, RebateMatrix};
use crate::domain::matrix::{CellKey, ContractPeriod, MatrixRecord, PlanRange};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrateReport {
    pub matched: usize,
    pub zeroed: usize,
    /// Records that match no cell of the current axes.
    pub unmatched: Vec<MatrixRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsReport {
    /// Records whose plan-range key could not be read as a value.
    pub unparsed: Vec<MatrixRecord>,
    pub hydrate: HydrateReport,
}

impl RebateMatrix {
    /// Rebuilds every cell of the current axes from flat records. Keys may be
    /// stored as numbers, numeric strings or labels; the first matching record
    /// wins and cells with no record go back to zero.
    pub fn hydrate(&mut self, records: &[MatrixRecord]) -> HydrateReport {
        let mut report = HydrateReport::default();
        let mut used = vec![false; records.len()];

        let keys: Vec<CellKey> = self.keys().collect();
        for key in keys {
            let Some(range) = self.plan_range(key.plan_range) else {
                continue;
            };
            let found = records.iter().enumerate().find(|(_, record)| {
                record.contract_period == key.contract_period && record.plan_range.matches(range)
            });

            let cell = match found {
                Some((index, record)) => {
                    used[index] = true;
                    report.matched += 1;
                    MatrixCell { amount: record.rebate_amount, id: record.id.clone() }
                }
                None => {
                    report.zeroed += 1;
                    MatrixCell::default()
                }
            };
            self.put_cell(key, cell);
        }

        report.unmatched = records
            .iter()
            .zip(used)
            .filter(|(record, used)| !used && !self.matches_any_cell(record))
            .map(|(record, _)| record.clone())
            .collect();
        self.refresh_export();
        report
    }

    /// Derives the axes from the records themselves and hydrates the result.
    /// Used for a parent matrix, whose records define the allocation key space.
    pub fn from_records(records: &[MatrixRecord]) -> Result<(Self, RecordsReport), MatrixError> {
        let mut unparsed = Vec::new();
        let mut ranges: BTreeMap<u64, PlanRange> = BTreeMap::new();
        let mut periods: Vec<ContractPeriod> = Vec::new();

        for record in records {
            let Some(value) = record.plan_range.resolve() else {
                unparsed.push(record.clone());
                continue;
            };
            if record.contract_period.0 == 0 {
                unparsed.push(record.clone());
                continue;
            }

            let range = match record.plan_range.label() {
                Some(label) => PlanRange::with_label(value, label),
                None => PlanRange::new(value),
            };
            ranges.entry(value).or_insert(range);
            if !periods.contains(&record.contract_period) {
                periods.push(record.contract_period);
            }
        }

        let mut matrix = Self::new(ranges.into_values().collect(), periods)?;
        let hydrate = matrix.hydrate(records);
        Ok((matrix, RecordsReport { unparsed, hydrate }))
    }

    fn matches_any_cell(&self, record: &MatrixRecord) -> bool {
        self.contract_periods.contains(&record.contract_period)
            && self.find_plan_range(&record.plan_range).is_some()
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::matrix::{
        CellKey, ContractPeriod, MatrixRecord, PlanRange, PlanRangeKey, RecordId,
    };
    use crate::matrix::{MatrixError, QuickFillTemplate, RebateMatrix};

    #[test]
    fn hydrate_matches_legacy_keys_and_zeroes_missing_cells() {
        let mut matrix = RebateMatrix::new(
            vec![PlanRange::with_label(11_000, "11K"), PlanRange::new(22_000), PlanRange::new(33_000)],
            vec![ContractPeriod(12)],
        )
        .expect("valid axes");
        matrix.set_cell(33_000, 12, 999).expect("known cell");

        let report = matrix.hydrate(&[
            MatrixRecord::new("11K", 12, 1_000).with_id(RecordId::Persisted(4)),
            MatrixRecord::new("22000", 12, 2_000),
            MatrixRecord::new(77_000, 12, 7_000),
        ]);

        assert_eq!(matrix.get_cell(11_000, 12), 1_000);
        assert_eq!(matrix.get_cell(22_000, 12), 2_000);
        assert_eq!(matrix.get_cell(33_000, 12), 0);
        assert_eq!(
            matrix.cell(CellKey::new(11_000, 12)).and_then(|cell| cell.id.clone()),
            Some(RecordId::Persisted(4))
        );
        assert_eq!(report.matched, 2);
        assert_eq!(report.zeroed, 1);
        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].plan_range, PlanRangeKey::Value(77_000));
    }

    #[test]
    fn hydrate_is_idempotent_over_exported_records() {
        let mut original = RebateMatrix::with_default_axes();
        original.quick_fill(&QuickFillTemplate::reference());
        original.set_cell(44_000, 24, 0).expect("known cell");

        let mut fresh = original.empty_like();
        fresh.hydrate(original.records());

        for key in original.keys() {
            assert_eq!(fresh.amount(key), original.amount(key), "cell {key} differs");
        }
        assert_eq!(fresh.records(), original.records());
    }

    #[test]
    fn from_records_derives_sorted_axes_and_labels() {
        let (matrix, report) = RebateMatrix::from_records(&[
            MatrixRecord::new(33_000, 24, 3_300),
            MatrixRecord::new("11K", 36, 1_100),
            MatrixRecord::new("11K", 12, 1_200),
            MatrixRecord::new("mystery", 12, 50),
        ])
        .expect("records define axes");

        let labels: Vec<&str> = matrix.plan_ranges().iter().map(|range| range.label.as_str()).collect();
        assert_eq!(labels, vec!["11K", "33K"]);
        assert_eq!(
            matrix.contract_periods(),
            &[ContractPeriod(12), ContractPeriod(24), ContractPeriod(36)]
        );
        assert_eq!(matrix.get_cell(11_000, 36), 1_100);
        assert_eq!(matrix.get_cell(33_000, 24), 3_300);
        assert_eq!(matrix.get_cell(33_000, 12), 0);
        assert_eq!(report.unparsed.len(), 1);
    }

    #[test]
    fn from_records_rejects_empty_input() {
        assert_eq!(RebateMatrix::from_records(&[]), Err(MatrixError::LastPlanRange));
    }
}
