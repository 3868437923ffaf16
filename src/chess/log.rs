use std::env;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the log filter, e.g. `CHESS_LOG=warn,chess_sync=debug`.
pub const LOG_ENV: &str = "CHESS_LOG";

fn filter(default_directive: &str) -> EnvFilter {
    env::var(LOG_ENV)
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive))
}

/// Installs the global subscriber. A second call leaves the first one in place.
pub fn init(default_directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(default_directive))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
