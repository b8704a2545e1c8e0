//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.wabot/config.json`) and environment.
//! Every field has a default, so a missing file or `{}` gives a working bot.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Where and how `!download` writes files.
    #[serde(default)]
    pub downloads: DownloadsConfig,

    /// Channel settings (the WhatsApp bridge).
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Download destination and failure handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadsConfig {
    /// Downloads directory (default "downloads"). Relative paths are resolved against the process working directory.
    #[serde(default = "default_downloads_dir")]
    pub directory: PathBuf,

    /// Create the downloads directory before each download when missing. Default: false (the directory must exist).
    #[serde(default)]
    pub create_directory: bool,

    /// Drop `?query` and `#fragment` from the derived file name. Default: false (the raw URL basename is used).
    #[serde(default)]
    pub strip_query: bool,

    /// Delete the destination file when a download fails after the file was opened. Default: false.
    #[serde(default)]
    pub remove_partial: bool,

    /// Keep the URL's case as sent. Default: false (the whole message is lower-cased, URL included).
    #[serde(default)]
    pub preserve_url_case: bool,
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            directory: default_downloads_dir(),
            create_directory: false,
            strip_query: false,
            remove_partial: false,
            preserve_url_case: false,
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppChannelConfig,
}

/// WhatsApp bridge process config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppChannelConfig {
    /// Program that runs the bridge (default "node"). Overridden by WABOT_BRIDGE_COMMAND env when set.
    #[serde(default = "default_bridge_command")]
    pub bridge_command: String,

    /// Arguments passed to the bridge program (default ["bridge.js"]).
    #[serde(default = "default_bridge_args")]
    pub bridge_args: Vec<String>,

    /// Directory where the bridge keeps its session so pairing survives restarts (default: `whatsapp-auth` next to the config file).
    #[serde(default)]
    pub auth_dir: Option<PathBuf>,
}

fn default_bridge_command() -> String {
    "node".to_string()
}

fn default_bridge_args() -> Vec<String> {
    vec!["bridge.js".to_string()]
}

impl Default for WhatsAppChannelConfig {
    fn default() -> Self {
        Self {
            bridge_command: default_bridge_command(),
            bridge_args: default_bridge_args(),
            auth_dir: None,
        }
    }
}

/// Resolve the bridge program: env WABOT_BRIDGE_COMMAND overrides config.
pub fn resolve_bridge_command(config: &Config) -> String {
    std::env::var("WABOT_BRIDGE_COMMAND")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .unwrap_or_else(|| config.channels.whatsapp.bridge_command.trim().to_string())
}

/// Resolve the bridge session directory: `channels.whatsapp.authDir` (relative to the config file's parent) or `whatsapp-auth` next to the config file.
pub fn resolve_auth_dir(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_dir(config_path);
    match &config.channels.whatsapp.auth_dir {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent.join(d)
            }
        }
        _ => config_parent.join("whatsapp-auth"),
    }
}

/// Directory holding the config file ("." when the path has no parent).
pub fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WABOT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".wabot").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or WABOT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the auth directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
