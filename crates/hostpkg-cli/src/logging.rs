use tracing_subscriber::EnvFilter;

/// `RUST_LOG` takes precedence over the configured filter. Logs go to stderr
/// so stdout stays reserved for command output.
pub(crate) fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
