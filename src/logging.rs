//! Log sinks.
//!
//! Commands that talk to the repository log into `modis<product>.log` inside
//! the destination directory as well as to stderr. The subscriber is built
//! per session and installed with [`tracing::subscriber::set_default`], so the
//! log file is closed when the session's guard is dropped.

use crate::error::SyncError;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Session log file name for a product.
pub fn log_file_name(product: &str) -> String {
    format!("modis{}.log", product)
}

/// Console filter: `RUST_LOG` when set, otherwise `modisync=info` (or
/// `debug` when verbose).
pub fn env_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("modisync={}", level)))
}

/// Installs the global console subscriber for commands without a session.
pub fn init_console(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .init();
}

/// Subscriber writing to stderr and, at debug level, to the session log
/// file in `dir`, which is appended to.
pub fn session_subscriber(
    dir: &Path,
    product: &str,
    verbose: bool,
) -> Result<(impl Subscriber + Send + Sync, PathBuf), SyncError> {
    let path = dir.join(log_file_name(product));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter(verbose));
    let log_file = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(EnvFilter::new("modisync=debug"));

    let subscriber = tracing_subscriber::registry().with(console).with(log_file);
    Ok((subscriber, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info};

    #[test]
    fn test_session_log_is_written_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let (subscriber, path) = session_subscriber(dir.path(), "MOD11A1.005", false).unwrap();
        assert!(path.ends_with("modisMOD11A1.005.log"));

        {
            let _guard = tracing::subscriber::set_default(subscriber);
            info!("Open connection e4ftl01u.ecs.nasa.gov");
            debug!("File listed");
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Open connection e4ftl01u.ecs.nasa.gov"));
        assert!(content.contains("File listed"));
    }

    #[test]
    fn test_unwritable_destination_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(session_subscriber(&missing, "MOD11A1.005", false).is_err());
    }
}
