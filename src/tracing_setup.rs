use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LogFormat;

/// Initializes the global `tracing` subscriber. `log_level` follows
/// `EnvFilter` syntax (e.g. "info", "quicproxy=debug,hyper_util=warn") and
/// falls back to the `RUST_LOG` environment variable, then `"info"`, when
/// unset.
pub fn init_tracing(format: LogFormat, log_level: Option<&str>) -> anyhow::Result<()> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    match format {
        LogFormat::Json => {
            Registry::default()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_span_list(true),
                )
                .try_init()?;
        }
        LogFormat::Pretty => {
            Registry::default()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
    }

    tracing::info!("structured logging initialized");
    Ok(())
}

pub fn shutdown_tracing() {
    tracing::info!("tracing shutdown complete");
}
