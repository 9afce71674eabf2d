use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Logs go to standard error so they never mix
/// with remote command output on standard output.
pub fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
