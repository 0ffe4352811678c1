use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn filter_from_env() -> EnvFilter {
    for var in ["ARCHIVIST_LOG", "RUST_LOG"] {
        if let Ok(raw) = std::env::var(var)
            && !raw.trim().is_empty()
            && let Ok(filter) = EnvFilter::try_new(raw.trim())
        {
            return filter;
        }
    }
    EnvFilter::new(DEFAULT_FILTER)
}

/// Human-readable events on stderr; stdout is reserved for reports.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
