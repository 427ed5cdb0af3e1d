//! Logging infrastructure for Medley.
//!
//! Provides structured logging with file output and console output:
//! - Writes to `logs/medley.log` (cleared on session start)
//! - Also prints to stdout for tailing during development
//! - Configurable via RUST_LOG environment variable

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the logging system.
///
/// Creates the log directory if needed, clears the previous log file,
/// and sets up dual output to both file and stdout.
///
/// # Arguments
///
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_file` - Log filename (e.g., "medley.log")
///
/// # Returns
///
/// LoggingGuard that must be kept alive for logging to work
///
/// # Errors
///
/// Returns error if the log directory cannot be created or the log file
/// cannot be cleared
pub fn init_logging(log_dir: &str, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    // Clear previous log file by writing empty content
    let log_path = Path::new(log_dir).join(log_file);
    fs::write(&log_path, "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true);

    // Defaults to INFO if RUST_LOG is not set
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

/// Get default log directory path.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Get default log file name.
pub fn default_log_file() -> &'static str {
    "medley.log"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn test_log_dir() -> PathBuf {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = PathBuf::from(format!("test_logs_{}", timestamp));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_log_file(), "medley.log");
    }

    #[test]
    fn test_creates_directory_and_file() {
        let log_dir = test_log_dir();
        let log_dir_str = log_dir.to_str().unwrap();

        assert!(!log_dir.exists(), "Test directory should not exist yet");

        // Can't call init_logging here because of the global subscriber,
        // but the file operations can be exercised directly.
        fs::create_dir_all(log_dir_str).expect("Failed to create directory");
        let log_path = Path::new(log_dir_str).join("test.log");
        fs::write(&log_path, "").expect("Failed to create log file");

        assert!(log_dir.exists(), "Log directory should be created");
        assert!(log_path.exists(), "Log file should be created");

        fs::remove_dir_all(&log_dir).expect("Failed to cleanup");
    }

    #[test]
    fn test_clears_existing_file() {
        let log_dir = test_log_dir();
        let log_dir_str = log_dir.to_str().unwrap();

        fs::create_dir_all(log_dir_str).expect("Failed to create test dir");
        let log_file = log_dir.join("test.log");
        fs::write(&log_file, "old log data").expect("Failed to write test data");

        fs::write(&log_file, "").expect("Failed to clear log file");

        let contents = fs::read_to_string(&log_file).expect("Failed to read log file");
        assert_eq!(contents, "", "File should be cleared");

        fs::remove_dir_all(&log_dir).expect("Failed to cleanup");
    }
}
