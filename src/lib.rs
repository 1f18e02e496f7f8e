//! Data source service library
//!
//! Pooled, credential-aware clients for multiple search cluster data
//! sources, plus the HTTP surface that exposes validation and calls.

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::ApiError;
pub use server::App;
pub use services::{DataSourceError, DataSourceService};
pub use utils::truncate_str;
