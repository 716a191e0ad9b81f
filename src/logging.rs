use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the log filter, e.g. `REFILE_LOG=refile_ops=debug`.
pub const LOG_ENV: &str = "REFILE_LOG";

/// Install a compact stderr subscriber. Defaults to warnings only.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_target(false),
        )
        .with(filter)
        .init();
}
