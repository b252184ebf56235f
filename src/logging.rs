use tracing_subscriber::EnvFilter;

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,dlink=debug"
    } else {
        "warn"
    }
}

/// Initialize structured logging on stderr; stdout is reserved for JSON results.
///
/// `RUST_LOG` wins over the `--verbose` default. Calling this twice is a no-op.
pub fn init_logging(verbose: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
