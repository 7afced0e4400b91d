//! Tracing setup for the `iris` binary

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use clap::ValueEnum;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Layer, Registry};

/// Written in the work directory when `--log-file` is given
pub const LOG_FILE: &str = "iris_log.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

type FileLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Handle for adding the log file layer once the work directory may be written
#[derive(Clone)]
pub struct LogFile {
    handle: reload::Handle<Option<FileLayer>, Registry>,
}

impl LogFile {
    /// Start appending log output to `path`, creating its directory
    pub fn attach(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let layer: FileLayer = fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .boxed();
        self.handle.reload(Some(layer))?;
        Ok(())
    }
}

fn subscriber(filter: EnvFilter) -> (impl tracing::Subscriber + Send + Sync + 'static, LogFile) {
    let (file_layer, handle) = reload::Layer::new(None::<FileLayer>);
    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter);
    (subscriber, LogFile { handle })
}

/// Install the global subscriber, logging to stderr only until
/// [`LogFile::attach`] is called. `RUST_LOG` wins over `level`.
pub fn init(level: LogLevel) -> anyhow::Result<LogFile> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let (subscriber, log_file) = subscriber(filter);
    subscriber.try_init()?;
    Ok(log_file)
}

/// Logging for the `local-web` child: stderr only, shared with the parent
pub fn init_child() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_receives_only_events_after_attach() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work").join(LOG_FILE);
        let (subscriber, log_file) = subscriber(EnvFilter::new("info"));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before preflight");
            assert!(!path.exists());
            log_file.attach(&path).unwrap();
            tracing::info!("after preflight");
        });

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("after preflight"));
        assert!(!text.contains("before preflight"));
    }
}
