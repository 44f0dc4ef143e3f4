//! Process logging: a `tracing` subscriber on stderr, filtered by `IPREPD_LOG`.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the `EnvFilter` directives.
pub const LOG_ENV: &str = "IPREPD_LOG";

/// Install the global subscriber. Safe to call more than once; later calls are
/// ignored.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
