use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "SHELLCACHE_LOG";

const LOG_FILE_PREFIX: &str = "shellcache.log";

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Logs go to a daily-rotated file under `log_dir`; stdout is reserved for
/// event outcomes. If the directory cannot be created, logs go to stderr.
/// The returned guard must be held until exit so buffered lines are flushed.
pub fn init(log_dir: &Path) -> Option<WorkerGuard> {
  if std::fs::create_dir_all(log_dir).is_err() {
    fmt()
      .with_env_filter(env_filter())
      .with_writer(std::io::stderr)
      .init();
    return None;
  }

  let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  fmt()
    .with_env_filter(env_filter())
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Some(guard)
}
