//! Configuration management module
//!
//! This module handles loading and validating application configuration
//! from environment variables and .env files, plus the AWS settings used
//! when signing requests to SigV4 data sources.

pub mod aws;
pub mod settings;

pub use aws::AwsConfigBuilder;
pub use settings::{DataSourceSettings, Environment, LogFormat, Settings};
