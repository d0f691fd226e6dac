//! Process-wide tracing setup shared by every binary embedding the archive.

/// Initialize tracing with the default `info` level.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init("info");
}

/// Subscriber construction (JSON output, `RUST_LOG` filtering).
pub mod tracing;
