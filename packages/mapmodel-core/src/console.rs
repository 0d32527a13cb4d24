use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter. Calling this more than once is a no-op.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // Another subscriber may already be installed by the host binary
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// Pipeline milestone at `info` level.
pub fn log(message: &str) {
    tracing::info!(target: "mapmodel", "{}", message);
}

// Note: The console_log macro is defined in lib.rs to avoid duplication
