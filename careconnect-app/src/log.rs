use anyhow::{Context, Result};
use careconnect_core::directory::Directory;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Settings;

const LOG_FILE_PREFIX: &str = "careconnect.log";

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. The returned guard flushes the
/// file writer and must be held until exit.
pub fn init_logging(settings: &Settings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .context("invalid log level")?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .boxed();

    let (file_layer, guard) = match settings
        .log_to_file
        .then(Directory::logs_directory)
        .flatten()
    {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("logging already initialised")?;

    Ok(guard)
}
