//! Load host config from file and environment.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Host configuration. File: ~/.config/flare/config.toml or /etc/flare/config.toml.
/// Env overrides: FLARE_DEVICE_ID, FLARE_PORT, FLARE_BROADCAST_ADDR, FLARE_LOG.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Sender id put in every frame (default: hostname, else "unknown").
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// UDP port to bind and broadcast to (default 47474).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Destination address for outgoing frames (default 255.255.255.255).
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
    /// tracing filter directive, e.g. "info" or "flare_core=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Deliver our own broadcasts to ourselves as well.
    #[serde(default)]
    pub loopback: bool,
}

fn default_device_id() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| flare_core::protocol::UNKNOWN_SENDER_ID.to_string())
}
fn default_port() -> u16 {
    47474
}
fn default_broadcast_addr() -> String {
    "255.255.255.255".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            port: default_port(),
            broadcast_addr: default_broadcast_addr(),
            log_level: default_log_level(),
            loopback: false,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
/// A config file that cannot be read or parsed is skipped; the error comes back for logging
/// once the subscriber is installed.
pub fn load() -> (Config, Option<anyhow::Error>) {
    let (file, problem) = match load_file() {
        Ok(c) => (c, None),
        Err(e) => (None, Some(e)),
    };
    let mut c = file.unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    (c, problem)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("FLARE_DEVICE_ID") {
        if !s.is_empty() {
            c.device_id = s;
        }
    }
    if let Some(s) = var("FLARE_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Some(s) = var("FLARE_BROADCAST_ADDR") {
        if !s.is_empty() {
            c.broadcast_addr = s;
        }
    }
    if let Some(s) = var("FLARE_LOG") {
        if !s.is_empty() {
            c.log_level = s;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/flare/config.toml"));
    }
    out.push(PathBuf::from("/etc/flare/config.toml"));
    out
}

// The first existing file wins, even if it fails to parse.
fn load_file() -> anyhow::Result<Option<Config>> {
    match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => read_file(&p).map(Some),
        None => Ok(None),
    }
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}
