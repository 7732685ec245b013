//! Tracing subscriber setup.
//!
//! Console and rolling-file sinks share one `EnvFilter` (`RUST_LOG`, default
//! `tenyod=info`) and one format. The file sink writes through a background
//! thread; the returned guard flushes it on drop, so `main` must hold it
//! until exit.

use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{prelude::*, EnvFilter, Layer, Registry};

use crate::config::{LogFileConfig, LogFormat, LogRotation, LoggingConfig};
use crate::error::{DaemonError, DaemonResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Returns the file writer guard when a file sink is configured.
pub fn init(config: &LoggingConfig) -> DaemonResult<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.console {
        layers.push(format_layer(std::io::stdout, config.format, true));
    }
    if let Some(file) = &config.file {
        let (writer, file_guard) = tracing_appender::non_blocking(file_appender(file)?);
        layers.push(format_layer(writer, config.format, false));
        guard = Some(file_guard);
    }

    let filter = EnvFilter::from_default_env().add_directive(
        "tenyod=info"
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid log directive: {}", e)))?,
    );

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| DaemonError::Config(format!("Failed to install logger: {}", e)))?;

    Ok(guard)
}

/// Open the rolling file, creating its directory first.
pub fn file_appender(file: &LogFileConfig) -> DaemonResult<RollingFileAppender> {
    fs::create_dir_all(&file.directory).map_err(|e| {
        DaemonError::Config(format!(
            "Failed to create log directory {}: {}",
            file.directory.display(),
            e
        ))
    })?;

    RollingFileAppender::builder()
        .rotation(rotation(file.rotation))
        .filename_prefix(file.file_name.as_str())
        .max_log_files(file.max_files)
        .build(&file.directory)
        .map_err(|e| DaemonError::Config(format!("Failed to open log file: {}", e)))
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn format_layer<W>(writer: W, format: LogFormat, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
