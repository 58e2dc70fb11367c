//! Tracing and logging setup shared by binaries, benches and tests.

/// Initialize process-wide tracing (JSON, `RUST_LOG` filtered).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize compact, test-captured logging.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber construction.
pub mod tracing;
