//! Tracing setup.
//!
//! Everything is written to stdout in compact form and appended to a log file
//! (`SYNAPSE_LOG_FILE`, default `logs/synapse.log`) through a non-blocking writer. Audit events
//! emitted under [`AUDIT_TARGET`] are additionally copied to `<log file>.audit` so PII
//! restorations can be reviewed without the surrounding noise. `RUST_LOG` filters the stdout and
//! main file layers only; the audit layer always records `synapse::audit` at INFO and above.
//!
//! Log lines carry lengths, counts and ids only. User text is never logged.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, filter::Targets, fmt, prelude::*};

static LOG_GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Tracing target used for audit events.
pub const AUDIT_TARGET: &str = "synapse::audit";

const DEFAULT_LOG_FILE: &str = "logs/synapse.log";

/// Install the global subscriber. Later calls leave the first subscriber in place.
pub fn init_tracing() {
    let path = log_file_path(std::env::var("SYNAPSE_LOG_FILE").ok());

    let mut guards = Vec::new();
    let main_writer = open_writer(&path, &mut guards);
    let audit_writer = open_writer(&audit_path(&path), &mut guards);

    let file_layer = main_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .compact()
            .with_filter(env_filter())
    });
    let audit_layer = audit_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .json()
            .with_filter(audit_filter())
    });

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .compact()
                .with_filter(env_filter()),
        )
        .with(file_layer)
        .with(audit_layer)
        .try_init();

    match installed {
        Ok(()) => {
            let _ = LOG_GUARDS.set(guards);
            tracing::debug!(log_file = %path.display(), "Tracing initialised");
        }
        Err(_) => tracing::debug!("Tracing subscriber already installed"),
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn audit_filter() -> Targets {
    Targets::new().with_target(AUDIT_TARGET, tracing::Level::INFO)
}

fn log_file_path(configured: Option<String>) -> PathBuf {
    configured
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}

fn audit_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".audit");
    PathBuf::from(name)
}

fn open_writer(path: &Path, guards: &mut Vec<WorkerGuard>) -> Option<NonBlocking> {
    match open_append(path) {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            guards.push(guard);
            Some(writer)
        }
        Err(err) => {
            eprintln!("File logging disabled for {}: {err}", path.display());
            None
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_falls_back_to_default() {
        assert_eq!(log_file_path(None), PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(log_file_path(Some("  ".into())), PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(
            log_file_path(Some("/var/log/synapse.log".into())),
            PathBuf::from("/var/log/synapse.log")
        );
    }

    #[test]
    fn audit_filter_ignores_the_global_level() {
        use tracing::Level;
        use tracing_subscriber::layer::SubscriberExt;

        let captured = std::sync::Arc::new(std::sync::Mutex::new(Vec::<u8>::new()));
        let sink = captured.clone();
        let writer = move || CaptureWriter(sink.clone());
        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::sink)
                    .with_filter(EnvFilter::new("warn")),
            )
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(audit_filter()),
            );

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: AUDIT_TARGET, entities = 2, "PII restored in final answer");
            tracing::info!("ordinary event");
            tracing::event!(target: AUDIT_TARGET, Level::DEBUG, "too detailed");
        });

        let output = String::from_utf8(captured.lock().expect("captured").clone()).expect("utf8");
        assert!(output.contains("PII restored in final answer"));
        assert!(!output.contains("ordinary event"));
        assert!(!output.contains("too detailed"));
    }

    struct CaptureWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("captured").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn audit_file_sits_next_to_main_log() {
        assert_eq!(
            audit_path(Path::new("logs/synapse.log")),
            PathBuf::from("logs/synapse.log.audit")
        );
    }

    #[test]
    fn open_append_creates_missing_directories() {
        let dir = std::env::temp_dir().join(format!("synapse-log-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("app.log");
        open_append(&path).expect("log file");
        assert!(path.exists());
        std::fs::remove_dir_all(dir).expect("cleanup");
    }
}
