//! Shared types for flowd
//!
//! This crate contains the flow record and flow key types exchanged between
//! the aggregation store, the HTTP surface and any client that speaks the
//! flowd JSON format.

pub mod types;

// Re-export commonly used types
pub use types::flow::*;
