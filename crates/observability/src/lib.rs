//! Logging setup shared by the binary and integration tests.

/// Structured logging configuration.
pub mod logging;

pub use logging::DEFAULT_FILTER;

/// Initialize process-wide logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    logging::init(DEFAULT_FILTER);
}
