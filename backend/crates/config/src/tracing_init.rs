use tracing_subscriber::{fmt, EnvFilter};

/// Directives appended to the default filter so driver chatter stays out of the logs.
const QUIET_DEPENDENCIES: &str = "sqlx=warn,hyper=warn,reqwest=warn";

/// Initialize the tracing subscriber with env-based filtering.
///
/// `RUST_LOG` wins over `LOG_LEVEL`; with neither set, `default_level` is used
/// for this service and noisy dependencies are held at `warn`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_filter(default_level)));

    // A second call (tests, embedded use) keeps the first subscriber.
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

fn default_filter(level: &str) -> String {
    format!("{level},{QUIET_DEPENDENCIES}")
}
