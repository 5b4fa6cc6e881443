//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::InitError;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

const DEFAULT_LOG_FILE_NAME: &str = "multiarch-initializer.log";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Build a daily rolling appender writing next to `log_file`, keeping three files.
pub fn file_appender(log_file: &Path) -> Result<RollingFileAppender, InitError> {
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = log_file
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_LOG_FILE_NAME);

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
}

/// initiate the global tracing subscriber
///
/// Logs always go to stderr. When `log_file` is given, a non-blocking rolling file
/// layer is added and its guard returned; dropping the guard flushes the file.
pub fn init(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, InitError> {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let file_layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter());
            (Some(file_layer), Some(guard))
        }
        None => (None, None),
    };

    registry().with(fmt_layer).with(file_layer).init();
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn file_appender_creates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("logs");
        let appender = file_appender(&log_dir.join("initializer.log"));

        assert!(appender.is_ok());
        assert!(log_dir.exists());
    }

    #[test]
    fn file_appender_uses_file_name_as_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut appender = file_appender(&dir.path().join("initializer.log")).expect("appender");
        std::io::Write::write_all(&mut appender, b"hello\n").expect("write");

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("initializer.log"), "{names:?}");
    }
}
