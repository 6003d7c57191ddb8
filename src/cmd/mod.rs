//! Command-line entry points.

pub mod list;
pub mod ocr;
pub mod schema;
