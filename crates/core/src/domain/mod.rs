pub mod matrix;
pub mod policy;
