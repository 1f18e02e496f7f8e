//! Error types exposed over HTTP

mod types;

pub use types::ApiError;
