use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use crate::cli::OutputFormat;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--verbose`.
/// Text output is meant for a terminal, JSON for log collectors.
pub fn init(format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        OutputFormat::Text => builder.try_init(),
        OutputFormat::Json => builder.json().flatten_event(true).try_init(),
    }
    .map_err(|e| anyhow!("failed to install logger: {e}"))
}
