use tracing_subscriber::EnvFilter;

/// Initializes the process-wide tracing subscriber. `RUST_LOG` overrides
/// the default `info` level, same convention as the rest of the corpus.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
