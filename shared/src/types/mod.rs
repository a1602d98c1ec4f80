//! Flow data types

pub mod flow;
