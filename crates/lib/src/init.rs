//! Initialize the configuration directory and the downloads directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, DownloadsConfig};

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the downloads directory named by the (possibly existing) config.
///
/// Returns the downloads directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config::config_dir(config_path);
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let downloads = config.downloads.directory;
    if !downloads.exists() {
        std::fs::create_dir_all(&downloads)
            .with_context(|| format!("creating downloads directory {}", downloads.display()))?;
        log::info!("created downloads directory at {}", downloads.display());
    } else {
        log::debug!(
            "downloads directory already exists at {}, skipping",
            downloads.display()
        );
    }

    Ok(downloads)
}

/// Warn at startup when downloads will fail because the directory is missing.
/// Returns true when the directory exists or will be created on demand.
pub fn check_downloads_dir(downloads: &DownloadsConfig) -> bool {
    if downloads.directory.is_dir() || downloads.create_directory {
        return true;
    }
    log::warn!(
        "downloads directory {} does not exist; run `wabot init` or set downloads.createDirectory",
        downloads.directory.display()
    );
    false
}
