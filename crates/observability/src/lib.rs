//! Log output setup for the worker binary and ad-hoc tooling.

/// Install the global subscriber using `EINVOICE_LOG_FORMAT` and `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init();
}

pub mod tracing;

pub use tracing::{LogFormat, init_with};
