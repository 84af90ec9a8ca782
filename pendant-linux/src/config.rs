//! Load config from file and environment.

use std::path::PathBuf;
use std::time::Duration;

use pendant_core::{ReassemblerConfig, TransportMode};
use serde::Deserialize;
use tracing::warn;

/// Host configuration. File: ~/.config/pendant/config.toml or /etc/pendant/config.toml.
/// Env overrides: PENDANT_MODE, PENDANT_PACKET_SIZE, PENDANT_FRAME_TIMEOUT_MS,
/// PENDANT_SWEEP_INTERVAL_MS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// How the device delivers audio (default "stream").
    #[serde(default)]
    pub mode: TransportMode,
    #[serde(default)]
    pub reassembler: ReassemblerConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Apply overrides from `var` (normally `std::env::var`). Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = var("PENDANT_MODE") {
            match s.to_ascii_lowercase().as_str() {
                "stream" => self.mode = TransportMode::Stream,
                "packets" => self.mode = TransportMode::Packets,
                other => warn!(value = other, "ignoring PENDANT_MODE"),
            }
        }
        if let Some(n) = var("PENDANT_PACKET_SIZE").and_then(|s| s.parse::<usize>().ok()) {
            self.reassembler.packet_size = n;
        }
        if let Some(ms) = var("PENDANT_FRAME_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok()) {
            self.reassembler.frame_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = var("PENDANT_SWEEP_INTERVAL_MS").and_then(|s| s.parse::<u64>().ok()) {
            self.reassembler.sweep_interval = Duration::from_millis(ms);
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_overrides(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/pendant/config.toml"));
    }
    out.push(PathBuf::from("/etc/pendant/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match Config::from_toml_str(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "invalid config, using defaults")
                    }
                },
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "unreadable config, using defaults")
                }
            }
            break;
        }
    }
    None
}
