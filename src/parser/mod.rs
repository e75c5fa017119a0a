pub mod grammar;

pub use grammar::{ParserError, parse};
