//! Tracing subscriber setup for hosts and demos

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "stack_repository=info";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Returns `false` when a global subscriber was already installed, so it is
/// safe to call from every test and entry point.
pub fn init() -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
