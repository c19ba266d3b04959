//! Tracing subscriber setup.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global fmt subscriber.
///
/// `filter` takes `EnvFilter` directives; without it `RUST_LOG` is used, and
/// `info` when that is unset or invalid. Fails if a global subscriber is
/// already installed, which tests may ignore.
pub fn init_tracing(filter: Option<&str>) -> Result<(), TryInitError> {
    let filter = filter
        .and_then(|f| EnvFilter::try_new(f).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true).with_target(false))
        .try_init()
}
