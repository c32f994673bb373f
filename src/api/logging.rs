//! Logging setup

use std::path::Path;
use tracing::level_filters::LevelFilter;

/// Install the global subscriber.
///
/// With `log_dir`, output goes to a daily rolling file there; otherwise to
/// stderr. Calling this again after a subscriber is installed is a no-op.
pub fn init_logging(log_dir: Option<&Path>) -> Result<(), String> {
    let level = resolve_log_level();

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                format!("Failed to create log directory {}: {}", dir.display(), e)
            })?;
            let file_appender = tracing_appender::rolling::daily(dir, "mockproxy");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Logging lasts until process exit
            std::mem::forget(guard);

            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(non_blocking)
                .with_ansi(false)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }

    tracing::info!("mockproxy core v{} logging at {}", env!("CARGO_PKG_VERSION"), level);
    Ok(())
}

pub fn resolve_log_level() -> LevelFilter {
    match std::env::var("RUST_LOG") {
        Ok(val) => match val.to_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" | "warning" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            _ => LevelFilter::INFO,
        },
        Err(_) => LevelFilter::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn level_follows_rust_log() {
        std::env::set_var("RUST_LOG", "Warning");
        assert_eq!(resolve_log_level(), LevelFilter::WARN);
        std::env::set_var("RUST_LOG", "nonsense");
        assert_eq!(resolve_log_level(), LevelFilter::INFO);
        std::env::remove_var("RUST_LOG");
        assert_eq!(resolve_log_level(), LevelFilter::INFO);
    }

    #[test]
    #[serial]
    fn repeated_init_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(init_logging(Some(dir.path())).is_ok());
        assert!(init_logging(None).is_ok());
    }
}
