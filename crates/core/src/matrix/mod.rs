//! Plan-range x contract-period rebate grid.
//!
//! The grid is always fully materialized: every row/column pair of the current
//! axes has a cell, zero when nothing was set. Axis mutations are applied
//! atomically, so callers never observe a row without its cells.

pub mod records;
pub mod template;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::matrix::{CellKey, ContractPeriod, MatrixRecord, PlanRange, PlanRangeKey, RecordId};

pub use records::{HydrateReport, RecordsReport};
pub use template::QuickFillTemplate;

pub const DEFAULT_CONTRACT_PERIODS: [u32; 3] = [12, 24, 36];

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixError {
    #[error("plan range {label} already exists")]
    DuplicatePlanRange { value: u64, label: String },
    #[error("contract period {0} already exists")]
    DuplicateContractPeriod(ContractPeriod),
    #[error("plan range {0} does not exist")]
    UnknownPlanRange(u64),
    #[error("contract period {0} does not exist")]
    UnknownContractPeriod(ContractPeriod),
    #[error("cell {0} is outside the current plan ranges and contract periods")]
    UnknownCell(CellKey),
    #[error("at least one plan range is required")]
    LastPlanRange,
    #[error("at least one contract period is required")]
    LastContractPeriod,
    #[error("contract period must be at least one month")]
    ZeroContractPeriod,
}

impl MatrixError {
    /// Inline message for the control that triggered the error.
    pub fn user_message(&self) -> String {
        match self {
            Self::DuplicatePlanRange { label, .. } => {
                format!("Plan range {label} is already in the matrix.")
            }
            Self::DuplicateContractPeriod(period) => {
                format!("A {}-month contract period is already in the matrix.", period.0)
            }
            Self::LastPlanRange => "The matrix needs at least one plan range.".to_owned(),
            Self::LastContractPeriod => {
                "The matrix needs at least one contract period.".to_owned()
            }
            Self::ZeroContractPeriod => "Contract periods must be at least one month.".to_owned(),
            Self::UnknownPlanRange(_)
            | Self::UnknownContractPeriod(_)
            | Self::UnknownCell(_) => "That cell is no longer part of the matrix.".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    pub amount: u64,
    pub id: Option<RecordId>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub cell_count: usize,
    pub non_zero_count: usize,
    pub total_amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebateMatrix {
    plan_ranges: Vec<PlanRange>,
    contract_periods: Vec<ContractPeriod>,
    cells: BTreeMap<CellKey, MatrixCell>,
    exported: Vec<MatrixRecord>,
}

impl RebateMatrix {
    /// Builds a zero-filled grid. Axes are sorted ascending; duplicates and
    /// empty axes are rejected.
    pub fn new(
        plan_ranges: Vec<PlanRange>,
        contract_periods: Vec<ContractPeriod>,
    ) -> Result<Self, MatrixError> {
        if plan_ranges.is_empty() {
            return Err(MatrixError::LastPlanRange);
        }
        if contract_periods.is_empty() {
            return Err(MatrixError::LastContractPeriod);
        }

        let mut matrix = Self {
            plan_ranges: Vec::with_capacity(plan_ranges.len()),
            contract_periods: Vec::with_capacity(contract_periods.len()),
            cells: BTreeMap::new(),
            exported: Vec::new(),
        };
        for period in contract_periods {
            matrix.insert_period_axis(period)?;
        }
        for range in plan_ranges {
            matrix.insert_plan_axis(range)?;
        }
        matrix.materialize();
        Ok(matrix)
    }

    /// Nine plan ranges from 11K to 99K by 11K steps, and 12/24/36 months.
    pub fn with_default_axes() -> Self {
        let mut matrix = Self {
            plan_ranges: (1..=9u64).map(|step| PlanRange::new(step * 11_000)).collect(),
            contract_periods: DEFAULT_CONTRACT_PERIODS.iter().copied().map(ContractPeriod).collect(),
            cells: BTreeMap::new(),
            exported: Vec::new(),
        };
        matrix.materialize();
        matrix
    }

    /// Same axes, every cell zero and without record ids.
    pub fn empty_like(&self) -> Self {
        let mut matrix = Self {
            plan_ranges: self.plan_ranges.clone(),
            contract_periods: self.contract_periods.clone(),
            cells: BTreeMap::new(),
            exported: Vec::new(),
        };
        matrix.materialize();
        matrix
    }

    pub fn plan_ranges(&self) -> &[PlanRange] {
        &self.plan_ranges
    }

    pub fn contract_periods(&self) -> &[ContractPeriod] {
        &self.contract_periods
    }

    pub fn plan_range(&self, value: u64) -> Option<&PlanRange> {
        self.plan_ranges.iter().find(|range| range.value == value)
    }

    /// Finds the axis entry a stored key refers to, whichever form it uses.
    pub fn find_plan_range(&self, key: &PlanRangeKey) -> Option<&PlanRange> {
        self.plan_ranges.iter().find(|range| key.matches(range))
    }

    /// Row-major keys of the current axes.
    pub fn keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.plan_ranges.iter().flat_map(move |range| {
            self.contract_periods
                .iter()
                .map(move |period| CellKey { plan_range: range.value, contract_period: *period })
        })
    }

    pub fn contains(&self, key: CellKey) -> bool {
        self.cells.contains_key(&key)
    }

    pub fn cell(&self, key: CellKey) -> Option<&MatrixCell> {
        self.cells.get(&key)
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellKey, &MatrixCell)> + '_ {
        self.cells.iter().map(|(key, cell)| (*key, cell))
    }

    /// Amount at `key`; 0 when the key is not part of the grid.
    pub fn amount(&self, key: CellKey) -> u64 {
        self.cells.get(&key).map(|cell| cell.amount).unwrap_or(0)
    }

    pub fn get_cell(&self, plan_range: u64, contract_period: u32) -> u64 {
        self.amount(CellKey::new(plan_range, contract_period))
    }

    pub fn set_cell(
        &mut self,
        plan_range: u64,
        contract_period: u32,
        amount: u64,
    ) -> Result<(), MatrixError> {
        let key = CellKey::new(plan_range, contract_period);
        let cell = self.cells.get_mut(&key).ok_or(MatrixError::UnknownCell(key))?;
        cell.amount = amount;
        self.refresh_export();
        Ok(())
    }

    /// Sets a cell from raw text input, clamping to a non-negative integer.
    pub fn set_cell_input(
        &mut self,
        plan_range: u64,
        contract_period: u32,
        raw: &str,
    ) -> Result<u64, MatrixError> {
        let amount = crate::domain::matrix::coerce_amount_input(raw);
        self.set_cell(plan_range, contract_period, amount)?;
        Ok(amount)
    }

    pub fn add_plan_range(&mut self, range: PlanRange) -> Result<(), MatrixError> {
        let value = range.value;
        self.insert_plan_axis(range)?;
        for period in &self.contract_periods {
            self.cells
                .entry(CellKey { plan_range: value, contract_period: *period })
                .or_default();
        }
        Ok(())
    }

    pub fn remove_plan_range(&mut self, value: u64) -> Result<PlanRange, MatrixError> {
        let index = self
            .plan_ranges
            .iter()
            .position(|range| range.value == value)
            .ok_or(MatrixError::UnknownPlanRange(value))?;
        if self.plan_ranges.len() == 1 {
            return Err(MatrixError::LastPlanRange);
        }

        let removed = self.plan_ranges.remove(index);
        self.cells.retain(|key, _| key.plan_range != value);
        self.refresh_export();
        Ok(removed)
    }

    pub fn add_contract_period(&mut self, months: u32) -> Result<(), MatrixError> {
        let period = ContractPeriod(months);
        self.insert_period_axis(period)?;
        for range in &self.plan_ranges {
            self.cells
                .entry(CellKey { plan_range: range.value, contract_period: period })
                .or_default();
        }
        Ok(())
    }

    pub fn remove_contract_period(&mut self, months: u32) -> Result<(), MatrixError> {
        let period = ContractPeriod(months);
        let index = self
            .contract_periods
            .iter()
            .position(|existing| *existing == period)
            .ok_or(MatrixError::UnknownContractPeriod(period))?;
        if self.contract_periods.len() == 1 {
            return Err(MatrixError::LastContractPeriod);
        }

        self.contract_periods.remove(index);
        self.cells.retain(|key, _| key.contract_period != period);
        self.refresh_export();
        Ok(())
    }

    /// Copies template amounts into cells that exist on the current axes.
    /// Returns how many cells were filled.
    pub fn quick_fill(&mut self, template: &QuickFillTemplate) -> usize {
        let mut filled = 0;
        for (key, amount) in template.iter() {
            if let Some(cell) = self.cells.get_mut(&key) {
                cell.amount = amount;
                filled += 1;
            }
        }
        self.refresh_export();
        filled
    }

    pub fn clear_all(&mut self) {
        for cell in self.cells.values_mut() {
            cell.amount = 0;
        }
        self.exported.clear();
    }

    /// What gets persisted for a self-declared matrix: non-zero cells only.
    pub fn records(&self) -> &[MatrixRecord] {
        &self.exported
    }

    /// Every cell, zero or not, with its record id.
    pub fn full_records(&self) -> Vec<MatrixRecord> {
        self.cells.iter().map(|(key, cell)| to_record(*key, cell)).collect()
    }

    pub fn summary(&self) -> MatrixSummary {
        self.cells.values().fold(
            MatrixSummary { cell_count: self.cells.len(), ..MatrixSummary::default() },
            |mut summary, cell| {
                if cell.amount > 0 {
                    summary.non_zero_count += 1;
                    summary.total_amount = summary.total_amount.saturating_add(cell.amount);
                }
                summary
            },
        )
    }

    /// Drops synthetic ids on `keys`; the backend matches those cells by key.
    pub(crate) fn settle_synthetic_ids(&mut self, keys: impl IntoIterator<Item = CellKey>) -> usize {
        let mut settled = 0;
        for key in keys {
            if let Some(cell) = self.cells.get_mut(&key) {
                if cell.id.as_ref().is_some_and(RecordId::is_synthetic) {
                    cell.id = None;
                    settled += 1;
                }
            }
        }
        if settled > 0 {
            self.refresh_export();
        }
        settled
    }

    pub(crate) fn put_cell(&mut self, key: CellKey, cell: MatrixCell) -> bool {
        match self.cells.get_mut(&key) {
            Some(existing) => {
                *existing = cell;
                true
            }
            None => false,
        }
    }

    pub(crate) fn refresh_export(&mut self) {
        self.exported = self
            .cells
            .iter()
            .filter(|(_, cell)| cell.amount > 0)
            .map(|(key, cell)| to_record(*key, cell))
            .collect();
    }

    fn insert_plan_axis(&mut self, range: PlanRange) -> Result<(), MatrixError> {
        match self.plan_ranges.binary_search_by_key(&range.value, |existing| existing.value) {
            Ok(_) => Err(MatrixError::DuplicatePlanRange { value: range.value, label: range.label }),
            Err(index) => {
                self.plan_ranges.insert(index, range);
                Ok(())
            }
        }
    }

    fn insert_period_axis(&mut self, period: ContractPeriod) -> Result<(), MatrixError> {
        if period.0 == 0 {
            return Err(MatrixError::ZeroContractPeriod);
        }
        match self.contract_periods.binary_search(&period) {
            Ok(_) => Err(MatrixError::DuplicateContractPeriod(period)),
            Err(index) => {
                self.contract_periods.insert(index, period);
                Ok(())
            }
        }
    }

    fn materialize(&mut self) {
        let keys: Vec<CellKey> = self.keys().collect();
        for key in keys {
            self.cells.entry(key).or_default();
        }
    }
}

fn to_record(key: CellKey, cell: &MatrixCell) -> MatrixRecord {
    MatrixRecord {
        plan_range: PlanRangeKey::Value(key.plan_range),
        contract_period: key.contract_period,
        rebate_amount: cell.amount,
        id: cell.id.clone(),
    }
}
