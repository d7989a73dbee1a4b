//! Tracing and logging setup shared by every process embedding the store.

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(tracing::LogFormat::Json);
}

/// Initialize process-wide tracing with the format named by `LOG_FORMAT`.
pub fn init_from_env() {
    tracing::init_with(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use self::tracing::{LogFormat, init_test, init_with};
