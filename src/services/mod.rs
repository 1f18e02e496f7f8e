//! Services module
//!
//! Contains the data source client pooling and validation logic.

pub mod data_source;

pub use data_source::{
    DataSourceClientParams, DataSourceError, DataSourceService, PoolConfig, ServiceDependencies,
};
