//! Logging setup.
//!
//! Each rank logs to its own file under the log directory
//! (`tilepress.rank<N>.log`, cleared at start) and to stdout. Filtering
//! follows `RUST_LOG`, defaulting to `info`.
//!
//! Components never consult global flags: each one takes a
//! [`tracing::Span`] through `with_span` and emits inside it.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Install the global subscriber writing to `log_dir/log_file` and stdout.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file cannot
/// be cleared.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Log file name for `rank`.
pub fn log_file_for_rank(rank: u32) -> String {
    format!("tilepress.rank{}.log", rank)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_per_rank() {
        assert_eq!(log_file_for_rank(0), "tilepress.rank0.log");
        assert_eq!(log_file_for_rank(12), "tilepress.rank12.log");
    }

    #[test]
    fn test_clears_existing_file() {
        // The global subscriber can only be installed once per process, so
        // only the file preparation is exercised here.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(log_file_for_rank(1));
        fs::write(&path, "old log data").unwrap();
        fs::write(&path, "").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
