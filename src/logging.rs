use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Builds the subscriber for one run of a command line tool.
///
/// `RUST_LOG` takes precedence over the verbosity count. The caller decides
/// how long the subscriber is active, normally by wrapping the run in
/// [`tracing::subscriber::with_default`].
pub fn subscriber(verbosity: u8) -> Result<impl Subscriber + Send + Sync + 'static> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(&directives).with_context(|| {
            format!("invalid {} directives '{}'", EnvFilter::DEFAULT_ENV, directives)
        })?,
        Err(_) => EnvFilter::new(default_directive(verbosity)),
    };
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish())
}
