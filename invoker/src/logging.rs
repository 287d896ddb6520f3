//! Development-time tracing for debugging invocations.
//!
//! Tracing is diagnostics only and goes to stderr. Events emitted while a
//! Handle redirects the process streams end up in that Handle's captured
//! stderr.

use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Compact stderr output filtered by `RUST_LOG`, `warn` when unset.
fn subscriber() -> impl Subscriber + Send + Sync + 'static {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
}

/// Install the invoker's tracing subscriber for a host or debugging
/// session. Panics if a global subscriber is already installed; see
/// [`try_init`].
///
/// ```bash
/// RUST_LOG=invoker=debug cargo test
/// ```
pub fn init() {
    subscriber().init();
}

/// Like [`init`], but returns false instead of panicking when a subscriber
/// is already installed.
pub fn try_init() -> bool {
    subscriber().try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_init_is_idempotent() {
        try_init();
        assert!(!try_init());
    }
}
