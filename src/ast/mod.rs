pub mod nodes;

pub use nodes::{BinaryOp, Expr, Filter, Literal, ObjectEntry, ObjectKey};
