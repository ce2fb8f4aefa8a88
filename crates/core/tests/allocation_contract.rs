use rebate_core::cascade::{AllocationPair, CellEditError};
use rebate_core::domain::matrix::{CellKey, ContractPeriod, MatrixRecord, PlanRange, RecordId};
use rebate_core::envelope::envelope_message;
use rebate_core::matrix::{MatrixError, QuickFillTemplate, RebateMatrix};
use serde_json::json;

type ContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

fn parent_with_periods(periods: &[u32]) -> ContractTestResult<RebateMatrix> {
    let records: Vec<MatrixRecord> = [11_000u64, 22_000, 33_000]
        .iter()
        .flat_map(|range| {
            periods
                .iter()
                .map(move |period| MatrixRecord::new(*range, *period, range / 11 * 10 + u64::from(*period)))
        })
        .collect();
    RebateMatrix::from_records(&records)
        .map(|(matrix, _)| matrix)
        .map_err(|error| format!("parent should parse: {error}"))
}

#[test]
fn every_cell_reads_as_a_non_negative_amount() -> ContractTestResult {
    let mut matrix = RebateMatrix::with_default_axes();
    matrix
        .set_cell(33_000, 24, 7_500)
        .map_err(|error| format!("set_cell failed: {error}"))?;

    for key in matrix.keys().collect::<Vec<_>>() {
        let amount = matrix.get_cell(key.plan_range, key.contract_period.0);
        let expected = if key == CellKey::new(33_000, 24) { 7_500 } else { 0 };
        require_eq!(amount, expected);
    }
    require_eq!(matrix.get_cell(44_000, 36), 0);
    Ok(())
}

#[test]
fn last_axis_entries_cannot_be_removed() -> ContractTestResult {
    let mut matrix = RebateMatrix::new(vec![PlanRange::new(11_000)], vec![ContractPeriod(12)])
        .map_err(|error| format!("single-cell matrix: {error}"))?;
    matrix.set_cell(11_000, 12, 900).map_err(|error| error.to_string())?;
    let before = matrix.clone();

    let removed_range = matrix.remove_plan_range(11_000);
    require_eq!(removed_range, Err::<PlanRange, _>(MatrixError::LastPlanRange));
    let removed_period = matrix.remove_contract_period(12);
    require_eq!(removed_period, Err::<(), _>(MatrixError::LastContractPeriod));
    require!(matrix == before, "matrix changed after rejected removals");
    Ok(())
}

#[test]
fn duplicate_plan_range_is_rejected() -> ContractTestResult {
    let mut matrix = RebateMatrix::with_default_axes();
    let result = matrix.add_plan_range(PlanRange::with_label(22_000, "22,000"));

    require!(
        matches!(result, Err(MatrixError::DuplicatePlanRange { value: 22_000, .. })),
        "expected duplicate error, got {result:?}"
    );
    require_eq!(matrix.plan_ranges().len(), 9);
    Ok(())
}

#[test]
fn export_then_hydrate_reproduces_the_grid() -> ContractTestResult {
    let mut original = RebateMatrix::with_default_axes();
    original.quick_fill(&QuickFillTemplate::reference());
    original.set_cell(55_000, 24, 0).map_err(|error| error.to_string())?;

    let mut restored = original.empty_like();
    let report = restored.hydrate(original.records());

    require!(report.unmatched.is_empty(), "unexpected unmatched records: {:?}", report.unmatched);
    for key in original.keys().collect::<Vec<_>>() {
        require_eq!(restored.amount(key), original.amount(key));
    }
    require_eq!(restored.records(), original.records());
    Ok(())
}

#[test]
fn number_numeric_string_and_label_keys_match_the_same_row() -> ContractTestResult {
    let mut matrix =
        RebateMatrix::new(vec![PlanRange::with_label(11_000, "11K")], vec![
            ContractPeriod(12),
            ContractPeriod(24),
            ContractPeriod(36),
        ])
        .map_err(|error| error.to_string())?;
    let records: Vec<MatrixRecord> = serde_json::from_value(json!([
        {"plan_range": "11K", "contract_period": 12, "rebate_amount": 100},
        {"plan_range": "11000", "contract_period": 24, "rebate_amount": 200},
        {"plan_range": 11000, "contract_period": 36, "rebate_amount": 300}
    ]))
    .map_err(|error| format!("records should decode: {error}"))?;

    let report = matrix.hydrate(&records);

    require_eq!(report.matched, 3);
    require_eq!(matrix.get_cell(11_000, 12), 100);
    require_eq!(matrix.get_cell(11_000, 24), 200);
    require_eq!(matrix.get_cell(11_000, 36), 300);
    Ok(())
}

#[test]
fn child_edits_are_bounded_by_the_parent_cell() -> ContractTestResult {
    let parent = parent_with_periods(&[12, 24])?;
    let (mut pair, _) = AllocationPair::initialize(parent, None);
    let key = CellKey::new(22_000, 12);
    let ceiling = pair.parent().amount(key);

    pair.edit_cell(key, ceiling / 2).map_err(|error| error.to_string())?;
    let rejected = pair.edit_cell(key, ceiling + 1);

    require!(
        matches!(rejected, Err(CellEditError::ExceedsParent { ceiling: c, .. }) if c == ceiling),
        "expected bound violation, got {rejected:?}"
    );
    require_eq!(pair.child().amount(key), ceiling / 2);
    require!(pair.cell_error(key).is_some(), "rejected edit should leave a per-cell error");

    pair.edit_cell(key, ceiling).map_err(|error| error.to_string())?;
    require_eq!(pair.child().amount(key), ceiling);
    require!(pair.cell_error(key).is_none(), "accepted edit should clear the cell error");
    Ok(())
}

#[test]
fn margins_are_parent_minus_child_and_never_negative() -> ContractTestResult {
    let parent = parent_with_periods(&[12, 24, 36])?;
    let (mut pair, _) = AllocationPair::initialize(parent, None);
    pair.fill_from_parent(40).map_err(|error| error.to_string())?;
    let _ = pair.edit_cell(CellKey::new(11_000, 36), u64::MAX);

    for margin in pair.margins() {
        require_eq!(margin.margin, margin.parent as i64 - margin.child as i64);
        require!(margin.margin >= 0, "negative margin at {}", margin.key);
    }
    Ok(())
}

#[test]
fn quick_fill_then_clear_leaves_nothing_to_export() -> ContractTestResult {
    let mut matrix = RebateMatrix::with_default_axes();
    require_eq!(matrix.plan_ranges().len(), 9);
    require_eq!(matrix.contract_periods().len(), 3);

    let filled = matrix.quick_fill(&QuickFillTemplate::reference());
    require_eq!(filled, 27);
    require_eq!(matrix.records().len(), 27);

    matrix.clear_all();
    require!(matrix.cells().all(|(_, cell)| cell.amount == 0), "every cell should be zero");
    require!(matrix.records().is_empty(), "export should be empty after clear");
    require_eq!(matrix.full_records().len(), 27);
    Ok(())
}

#[test]
fn new_parent_period_is_backfilled_into_stored_child() -> ContractTestResult {
    let parent = parent_with_periods(&[12, 24, 36])?;
    let stored: Vec<MatrixRecord> = [11_000u64, 22_000, 33_000]
        .iter()
        .enumerate()
        .flat_map(|(row, range)| {
            [12u32, 24].into_iter().enumerate().map(move |(col, period)| {
                MatrixRecord::new(*range, period, 100 * (row as u64 + 1) + col as u64)
                    .with_id(RecordId::Persisted((row * 2 + col) as u64 + 1))
            })
        })
        .collect();

    let (pair, report) = AllocationPair::initialize(parent, Some(stored.as_slice()));

    require_eq!(
        report.backfilled,
        vec![CellKey::new(11_000, 36), CellKey::new(22_000, 36), CellKey::new(33_000, 36)]
    );
    for key in &report.backfilled {
        let cell = pair.child().cell(*key).ok_or_else(|| format!("missing backfilled cell {key}"))?;
        require_eq!(cell.amount, 0);
        require!(
            cell.id.as_ref().is_some_and(RecordId::is_synthetic),
            "backfilled cell {key} should carry a synthetic id"
        );
    }
    for record in &stored {
        let Some(range) = record.plan_range.resolve() else {
            return Err("stored record key should resolve".to_owned());
        };
        let key = CellKey { plan_range: range, contract_period: record.contract_period };
        let cell = pair.child().cell(key).ok_or_else(|| format!("missing stored cell {key}"))?;
        require_eq!(cell.amount, record.rebate_amount);
        require_eq!(cell.id, record.id);
    }
    Ok(())
}

#[test]
fn double_wrapped_save_response_yields_its_message() -> ContractTestResult {
    let response = json!({"success": true, "data": {"success": true, "data": {"message": "ok"}}});

    let message = envelope_message(&response).map_err(|error| error.to_string())?;
    require_eq!(message.as_deref(), Some("ok"));
    Ok(())
}
