use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::DrawbridgeError;

/// Process-wide configuration, layered: built-in defaults, an optional
/// `drawbridge.toml`, then `DRAWBRIDGE_*` environment variables, in that
/// order of increasing precedence.
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct AppConfig {
    pub drawbridge: DrawbridgeConfig,
}

impl AppConfig {
    /// Load config from an optional file plus the process environment.
    ///
    /// `file` is merged in if present; it is not an error for it to be missing.
    pub fn load(file: Option<PathBuf>) -> Result<Self, DrawbridgeError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        Ok(figment
            .merge(Env::prefixed("DRAWBRIDGE_").map(|key| format!("drawbridge.{key}").into()))
            .extract()?)
    }

    /// Build the rocket config the server binds with: ambient rocket
    /// defaults except for the port, which follows `DRAWBRIDGE_PORT`.
    pub fn rocket_config(&self) -> rocket::Config {
        let mut config = rocket::Config::default();
        config.port = self.drawbridge.port;
        config
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DrawbridgeConfig {
    /// Port the HTTP/websocket server binds to.
    pub port: u16,

    /// Root directory for per-session snapshot, log, and files-meta files.
    pub data_dir: PathBuf,

    /// Interval between periodic snapshot-flush sweeps, in seconds.
    pub snapshot_interval_secs: u64,

    /// How long a session may sit with no subscribers before it is evicted
    /// from memory, in seconds.
    pub idle_evict_secs: u64,

    /// Maximum number of versioned snapshots retained per session.
    pub history_cap: usize,

    /// Debounce window for coalescing subscriber-originated log appends, in
    /// milliseconds.
    pub update_debounce_ms: u64,

    /// Bound on each subscriber's outbound message queue; sends beyond this
    /// are dropped rather than allowed to block the mutation path.
    pub subscriber_queue_depth: usize,
}

impl Default for DrawbridgeConfig {
    fn default() -> Self {
        Self {
            port: 3062,
            data_dir: PathBuf::from("./data"),
            snapshot_interval_secs: 300,
            idle_evict_secs: 300,
            history_cap: 50,
            update_debounce_ms: 500,
            subscriber_queue_depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.drawbridge.port, 3062);
        assert_eq!(config.drawbridge.data_dir, PathBuf::from("./data"));
        assert_eq!(config.drawbridge.history_cap, 50);
    }

    #[test]
    fn env_overrides_port_and_data_dir() {
        std::env::set_var("DRAWBRIDGE_PORT", "9999");
        std::env::set_var("DRAWBRIDGE_DATA_DIR", "/tmp/drawbridge-test-data");
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.drawbridge.port, 9999);
        assert_eq!(
            config.drawbridge.data_dir,
            PathBuf::from("/tmp/drawbridge-test-data")
        );
        std::env::remove_var("DRAWBRIDGE_PORT");
        std::env::remove_var("DRAWBRIDGE_DATA_DIR");
    }
}
