//! Tracing-subscriber setup, grounded on `host/src/bin/main.rs`'s
//! `subscribe_log`: a stdout layer plus an optional non-blocking JSON file
//! layer, both filtered by the CLI's `--log` level.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Installs the global subscriber. Returns a guard that must be held for
/// the process lifetime when a log file is configured (dropping it flushes
/// the non-blocking writer).
pub fn subscribe(log_level: &str, quiet: bool, log_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = (!quiet).then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
    });

    if let Some(path) = log_path {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(dir);
            }
        }
        let file = std::fs::File::create(path).ok();
        if let Some(file) = file {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let file_layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter);

            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(file_layer)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::registry().with(stdout_layer).init();
    None
}
