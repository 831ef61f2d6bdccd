use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "HIVE_LOG";

/// Install the global subscriber. `HIVE_LOG` takes standard `EnvFilter`
/// directives; `verbose` forces `debug`.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Whether debug events would currently be recorded.
pub fn debug_enabled() -> bool {
    tracing::enabled!(tracing::Level::DEBUG)
}
