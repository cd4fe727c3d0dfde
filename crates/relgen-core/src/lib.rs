//! Core value model for relgen.
//!
//! This crate defines the closed `Value` union, the insertion-ordered
//! `Record` that every generator produces, and dotted `FieldPath`s used to
//! address nested fields across configuration, CSV and reference lookups.

pub mod error;
pub mod path;
pub mod record;
pub mod value;

pub use error::{Error, Result};
pub use path::FieldPath;
pub use record::Record;
pub use value::{NULL_CELL, ScalarKind, Value};
