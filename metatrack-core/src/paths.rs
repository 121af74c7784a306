use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";
pub const LOG_FILE: &str = "metatrack.log";

pub fn metatrack_root(home: &Path) -> PathBuf {
    home.join(".metatrack")
}

pub fn config_path(home: &Path) -> PathBuf {
    metatrack_root(home).join(CONFIG_FILE)
}

pub fn environments_dir(home: &Path) -> PathBuf {
    metatrack_root(home).join("environments")
}

pub fn objects_dir(home: &Path) -> PathBuf {
    metatrack_root(home).join("objects")
}

pub fn integrations_dir(home: &Path) -> PathBuf {
    metatrack_root(home).join("integrations")
}

/// Default parent directory of per-environment working copies.
pub fn repos_dir(home: &Path) -> PathBuf {
    metatrack_root(home).join("repos")
}

/// Default parent directory of bare repositories for `local` hosting.
pub fn remotes_dir(home: &Path) -> PathBuf {
    metatrack_root(home).join("remotes")
}

/// Default parent directory of mirrored orgs for the `mirror` gateway.
pub fn orgs_dir(home: &Path) -> PathBuf {
    metatrack_root(home).join("orgs")
}

pub fn logs_dir(home: &Path) -> PathBuf {
    metatrack_root(home).join("logs")
}

/// Resolve a configured log file: absolute paths as-is, relative ones under
/// the logs directory.
pub fn log_file(home: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        logs_dir(home).join(configured)
    }
}
