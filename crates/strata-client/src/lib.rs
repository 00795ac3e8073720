pub mod config;
pub mod error;
pub mod session;
pub mod sync_loop;

#[cfg(test)]
mod test_support;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use error::{ClientError, ConfigError, Result};
pub use session::Session;
pub use sync_loop::{backoff_delay, SyncLoop, SyncLoopConfig, SyncState};

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strata_sync=debug,strata_crypto=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
