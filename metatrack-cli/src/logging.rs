//! Subscriber setup and size-based rotation of the optional log file.
//!
//! `RUST_LOG` overrides the configured level; `-v` raises the default to
//! `debug`. With `logging.file` set, output is appended to that file (after
//! rotation) instead of stderr. Rotation scheme:
//!   metatrack.log → metatrack.log.1 → … → metatrack.log.<max_files>

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use metatrack_core::{paths, LoggingSettings, Settings};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(home: &Path, verbose: bool) {
    // Settings errors surface again when the command opens its context.
    let settings = Settings::load_at(home).map(|s| s.logging).unwrap_or_default();
    let level = if verbose { "debug" } else { settings.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match open_log_file(home, &settings) {
        Ok(Some(file)) => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        Ok(None) => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(io::stderr)
                .try_init();
        }
        Err((path, err)) => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(io::stderr)
                .try_init();
            tracing::warn!(path = %path.display(), error = %err, "cannot open log file; logging to stderr");
        }
    }
}

fn open_log_file(
    home: &Path,
    settings: &LoggingSettings,
) -> Result<Option<fs::File>, (PathBuf, io::Error)> {
    let Some(configured) = settings.file.as_deref() else {
        return Ok(None);
    };
    let path = paths::log_file(home, configured);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| (path.clone(), e))?;
    }
    rotate_if_needed(&path, settings.max_bytes, settings.max_files).map_err(|e| (path.clone(), e))?;
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map(Some)
        .map_err(|e| (path, e))
}

/// Rotate `log_path` once it reaches `max_bytes`, keeping at most
/// `max_files` numbered copies. Returns whether rotation happened; a missing
/// file is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }
    if max_files == 0 {
        fs::remove_file(log_path)?;
        return Ok(true);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    Ok(true)
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(paths::LOG_FILE);
    base.with_file_name(format!("{name}.{n}"))
}
