//! Tracing subscriber setup: console plus a daily rolling file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rolled log files kept on disk.
pub const MAX_LOG_FILES: usize = 10;

const LOG_PREFIX: &str = "stockdesk";
const DEFAULT_FILTER: &str = "info,stockdesk_lib=debug";

/// `$LOCALAPPDATA`, `$XDG_DATA_HOME` or `~/.local/share`, then
/// `stockdesk/logs`.
pub fn default_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join(LOG_PREFIX).join("logs")
}

/// Deletes all but the newest [`MAX_LOG_FILES`] `stockdesk.*` files in
/// `log_dir`. Returns how many were removed.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };
    let mut logs: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&format!("{LOG_PREFIX}.")))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    logs.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in logs.iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to prune log file"),
        }
    }
    removed
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
/// Keep the returned guard alive; dropping it flushes and stops the file
/// writer. A second call leaves the first subscriber in place.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let pruned = prune_old_logs(log_dir);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        Ok(()) => debug!(dir = %log_dir.display(), pruned, "Logging initialised"),
        Err(e) => debug!(error = %e, "Logging already initialised"),
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("stockdesk_logs_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn prune_keeps_newest_and_ignores_other_files() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).unwrap();
        for day in 1..=12 {
            fs::write(dir.join(format!("stockdesk.2024-01-{day:02}")), "x").unwrap();
        }
        fs::write(dir.join("other.log"), "x").unwrap();

        assert_eq!(prune_old_logs(&dir), 2);
        let remaining = fs::read_dir(&dir).unwrap().count();
        assert_eq!(remaining, MAX_LOG_FILES + 1);
        assert!(dir.join("other.log").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn prune_missing_dir_is_noop() {
        assert_eq!(prune_old_logs(&scratch_dir()), 0);
    }

    #[test]
    #[serial]
    fn init_twice_is_not_an_error() {
        let dir = scratch_dir();
        let first = init_logging(&dir);
        assert!(first.is_ok());
        assert!(dir.is_dir());
        let second = init_logging(&dir);
        assert!(second.is_ok());
        drop(first);
        drop(second);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn default_dir_ends_with_app_logs() {
        let dir = default_log_dir();
        assert!(dir.ends_with(Path::new("stockdesk").join("logs")));
    }
}
