pub mod eval;
pub mod task;
