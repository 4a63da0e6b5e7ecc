//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::Layer;

/// Environment variable naming a directory for rolling log files.
pub const LOG_PATH_ENV_VAR: &str = "TRAINCTL_LOG_PATH";

/// Output format of the stderr log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
///
/// Logs go to stderr so command output on stdout stays machine readable. When
/// `log_dir` is set, a daily rolling file is written as well and the returned
/// guard must be held until the process exits.
pub fn init<P: AsRef<Path>>(format: LogFormat, log_dir: Option<P>) -> Option<WorkerGuard> {
    let stderr_layer = match format {
        LogFormat::Text => layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter())
            .boxed(),
        LogFormat::Json => layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
            .boxed(),
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("trainctl.log")
            .max_log_files(3)
            .build(dir.as_ref())
        {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let file_layer = layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter())
                    .boxed();
                (Some(file_layer), Some(guard))
            }
            Err(e) => {
                eprintln!(
                    "failed to open log directory {}: {e}",
                    dir.as_ref().display()
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    registry().with(stderr_layer).with(file_layer).init();
    guard
}
