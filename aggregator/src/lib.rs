//! flowd library: flow aggregation store and its HTTP surface

pub mod access;
pub mod config;
pub mod metrics;
pub mod server;
pub mod store;

pub use store::{FlowStore, StoreError};
