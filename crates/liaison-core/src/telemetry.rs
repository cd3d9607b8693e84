//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,liaison_core=debug";

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over [`DEFAULT_FILTER`]. Returns `false` if a
/// subscriber was already installed, which makes it safe to call from tests.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init()
        .is_ok()
}
