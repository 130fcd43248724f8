//! Lifecycle state machine types.

pub mod state;

pub use state::*;
