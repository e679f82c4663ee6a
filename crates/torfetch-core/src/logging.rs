//! Worker logging: tracing with an env filter, written to a log file under
//! the XDG state dir when that is writable, otherwise to stderr.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,torfetch=debug";
const LOG_FILE_NAME: &str = "torfetch.log";

/// Initialize logging for a worker process.
///
/// Prefers an append-only `torfetch.log` under `~/.local/state/torfetch/`.
/// If the state dir cannot be set up the worker still starts, logging to
/// stderr instead.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (writer, target) = match open_state_log_file() {
        Ok((file, path)) => (BoxMakeWriter::new(Mutex::new(file)), Ok(path)),
        Err(e) => (BoxMakeWriter::new(io::stderr), Err(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    match target {
        Ok(path) => tracing::info!("logging to {}", path.display()),
        Err(e) => tracing::warn!("state dir unavailable ({}), logging to stderr", e),
    }
}

fn open_state_log_file() -> io::Result<(File, PathBuf)> {
    let state_dir = xdg::BaseDirectories::with_prefix("torfetch")
        .map_err(io::Error::other)?
        .get_state_home();
    open_log_file_in(&state_dir)
}

/// Opens the append-only log file under `dir`, creating both as needed.
fn open_log_file_in(dir: &Path) -> io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn log_file_is_created_under_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state");
        let (_, path) = open_log_file_in(&target).unwrap();
        assert_eq!(path, target.join(LOG_FILE_NAME));
        assert!(path.exists());
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let (mut file, path) = open_log_file_in(dir.path()).unwrap();
        file.write_all(b"first\n").unwrap();
        drop(file);

        let (mut file, _) = open_log_file_in(dir.path()).unwrap();
        file.write_all(b"second\n").unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), b"first\nsecond\n");
    }

    #[test]
    fn unusable_state_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, b"not a directory").unwrap();
        assert!(open_log_file_in(&blocker).is_err());
    }
}
