//! Parent/child allocation: a child tier edits its own grid against a
//! read-only parent grid and may never exceed the parent in any cell.

pub mod backfill;
pub mod pair;
pub mod validation;

pub use backfill::{initialize_child, InitReport};
pub use pair::{AllocationPair, CellMargin};
pub use validation::{margin, validate_cell_edit, CellEditError};
