//! Logging Infrastructure
//!
//! Structured logging setup for the kitchen display engine.
//! Features:
//! - Console output, plain text for development or JSON for production
//! - Daily rotating application logs under `<log_dir>/app` (deleted after 14 days)

use chrono::{Local, NaiveDate};
use std::fs;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Days an application log file is kept
const RETENTION_DAYS: i64 = 14;

/// File name prefix used by the rolling appender (`app.YYYY-MM-DD`)
const APP_LOG_PREFIX: &str = "app";

/// Clean up old application log files (older than 14 days)
///
/// Call this periodically (e.g., daily) to maintain log size. Returns the
/// number of files removed.
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<usize> {
    let app_log_dir = log_dir.join("app");
    if !app_log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Local::now().date_naive() - chrono::Duration::days(RETENTION_DAYS);
    let mut removed = 0;

    for entry in fs::read_dir(app_log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        // Match app.YYYY-MM-DD
        if let Some(date_part) = name
            .strip_prefix(APP_LOG_PREFIX)
            .and_then(|rest| rest.strip_prefix('.'))
            && let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            && date < cutoff
        {
            fs::remove_file(&path)?;
            removed += 1;
            tracing::info!(file = %name, "Deleted old log file");
        }
    }

    Ok(removed)
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug"); `RUST_LOG` overrides it
/// * `json_format` - JSON console output (production) or plain text (development)
/// * `log_dir` - Optional directory for daily rotating JSON files
///
/// # Examples
/// ```no_run
/// use kds_engine::init_logger_with_file;
///
/// // Development setup (console only)
/// init_logger_with_file("debug", false, None)?;
///
/// // Production setup (console + file)
/// init_logger_with_file("info", true, Some("./kds-data/logs"))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&str>,
) -> anyhow::Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    // Console layer
    if json_format {
        layers.push(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_filter(level_filter(level))
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_filter(level_filter(level))
                .boxed(),
        );
    }

    if let Some(dir) = log_dir {
        let app_log_dir = Path::new(dir).join("app");
        fs::create_dir_all(&app_log_dir)?;

        // Application logs (rotated daily, subject to 14-day cleanup)
        let app_log = RollingFileAppender::new(Rotation::DAILY, app_log_dir, APP_LOG_PREFIX);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::sync::Mutex::new(app_log))
                .with_filter(level_filter(level))
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_removes_only_expired_app_logs() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();

        let today = Local::now().date_naive();
        let old = today - chrono::Duration::days(RETENTION_DAYS + 3);
        let recent = today - chrono::Duration::days(2);

        let old_file = app_dir.join(format!("app.{}", old.format("%Y-%m-%d")));
        let recent_file = app_dir.join(format!("app.{}", recent.format("%Y-%m-%d")));
        let other_file = app_dir.join("notes.txt");
        for path in [&old_file, &recent_file, &other_file] {
            fs::write(path, "x").unwrap();
        }

        assert_eq!(cleanup_old_logs(dir.path()).unwrap(), 1);
        assert!(!old_file.exists());
        assert!(recent_file.exists());
        assert!(other_file.exists());
    }

    #[test]
    fn test_cleanup_without_app_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path()).unwrap(), 0);
    }
}
