//! API endpoint handlers module
//!
//! Contains all HTTP endpoint handler implementations.

pub mod data_sources;
pub mod health;
pub mod metrics;
