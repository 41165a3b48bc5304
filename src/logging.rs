//! Log output for applications embedding the link.

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "lightshow_link=info";

fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("lightshow_link=debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global `fmt` subscriber.
///
/// `verbose` forces debug output for this crate and ignores `RUST_LOG`.
/// Returns false when a subscriber was already installed.
pub fn init(verbose: bool) -> bool {
    fmt()
        .with_env_filter(filter(verbose))
        .with_target(false)
        .try_init()
        .is_ok()
}
