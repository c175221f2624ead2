use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CACHEWEAVE_LOG";

/// Install the global fmt subscriber. `CACHEWEAVE_LOG` wins over the
/// verbosity derived from the command line.
pub fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    // A subscriber may already be installed (tests, embedding hosts).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
