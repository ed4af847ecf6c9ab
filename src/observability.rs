//! Logging and observability helpers.
//!
//! Embedders call [`init_tracing`] once at startup, before building the
//! engine state. Logs roll daily under a per-user directory; set
//! `DBATLAS_LOG_DIR` to redirect them.

use std::fs;
use std::path::PathBuf;

use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "dbatlas.log";
const LOG_DIR_ENV: &str = "DBATLAS_LOG_DIR";

pub fn init_tracing() {
    init_tracing_at(log_directory());
}

/// Installs the global subscriber writing to `log_dir`. Later calls are
/// no-ops; the first subscriber stays in place.
pub fn init_tracing_at(log_dir: PathBuf) {
    let _ = fs::create_dir_all(&log_dir);

    let file_appender: RollingFileAppender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dbatlas=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(file_appender)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

fn log_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if cfg!(windows) {
        let appdata = std::env::var_os("APPDATA")
            .unwrap_or_else(|| std::env::var_os("USERPROFILE").unwrap_or_default());
        let mut path = PathBuf::from(appdata);
        path.push("DbAtlas");
        path.push("logs");
        path
    } else {
        let home = std::env::var_os("HOME").unwrap_or_default();
        let mut path = PathBuf::from(home);
        path.push(".dbatlas");
        path.push("logs");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_platform_default() {
        std::env::set_var(LOG_DIR_ENV, "/tmp/dbatlas-logs");
        let dir = log_directory();
        std::env::remove_var(LOG_DIR_ENV);

        assert_eq!(dir, PathBuf::from("/tmp/dbatlas-logs"));
    }

    #[test]
    fn init_creates_the_log_directory_and_tolerates_reinit() {
        let dir = std::env::temp_dir().join("dbatlas-observability-test");

        init_tracing_at(dir.clone());
        init_tracing_at(dir.clone());

        assert!(dir.is_dir());
        tracing::info!("logging initialised");
    }
}
