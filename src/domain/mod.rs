//! Domain types for the persisted task representation.
//!
//! [`TaskRecord`] is the row stored per task. [`TaskKey`] is its
//! store-assigned identity and [`VersionedTask`] pairs both with the
//! store version observed when the record was read or written.

pub mod record;

pub use record::*;
