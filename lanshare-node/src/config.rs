//! Load config from file and environment.

use std::path::PathBuf;

use serde::Deserialize;

/// Daemon configuration. File: ~/.config/lanshare/config.toml or
/// /etc/lanshare/config.toml. Env overrides: LANSHARE_NICKNAME,
/// LANSHARE_DISCOVERY_PORT, LANSHARE_TRANSFER_PORT, LANSHARE_DOWNLOAD_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name shown to peers (default: hostname).
    #[serde(default = "default_nickname")]
    pub nickname: String,
    /// Discovery UDP port (default 65431).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Transfer/handshake TCP port (default 65432).
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    /// Where accepted transfers are stored.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_nickname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "lanshare".to_string())
}
fn default_discovery_port() -> u16 {
    lanshare_core::protocol::DISCOVERY_PORT
}
fn default_transfer_port() -> u16 {
    lanshare_core::protocol::TRANSFER_PORT
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("lanshare-downloads")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            discovery_port: default_discovery_port(),
            transfer_port: default_transfer_port(),
            download_dir: default_download_dir(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LANSHARE_NICKNAME") {
        if !s.is_empty() {
            c.nickname = s;
        }
    }
    if let Ok(s) = std::env::var("LANSHARE_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("LANSHARE_TRANSFER_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.transfer_port = p;
        }
    }
    if let Ok(s) = std::env::var("LANSHARE_DOWNLOAD_DIR") {
        if !s.is_empty() {
            c.download_dir = PathBuf::from(s);
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(home.join(".config/lanshare/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanshare/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
