//! Tracing and logging (shared setup).
//!
//! The binary decides the format (see `LogFormat`) and calls [`init`] once at
//! startup; repeated calls are no-ops.

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use tracing::{LogFormat, init};
