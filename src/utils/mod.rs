//! Utility modules
//!
//! Timeout handling and string helpers.

pub mod string;
pub mod timeout;

pub use string::{summarize_body, truncate_str, truncate_with_suffix};
pub use timeout::{with_timeout, TimeoutError};
