//! Input schema
//!
//! The versioned field table mapping each `FieldId` to its accepted source
//! keys and unit rules, and the raw record / source shape types that form the
//! boundary with the record-fetching layer.

mod field_table;
mod raw_record;

pub use field_table::*;
pub use raw_record::*;
