//! Daemon configuration loader.

use clawd_hub::HubConfig;
use clawd_lanes::{LaneSpec, LaneTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const CONFIG_ENV: &str = "CLAWD_CONFIG";
pub const BIND_ENV: &str = "CLAWD_BIND";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Config file is empty: {0}")]
    Empty(String),

    #[error("Invalid YAML: {0}")]
    InvalidYaml(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-lane settings merged over the built-in lane table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LaneOverride {
    /// 0 means unlimited.
    pub concurrency: Option<usize>,
    pub hard_cap: Option<usize>,
    pub watchdog_secs: Option<u64>,
    pub warn_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Deadline for the agent's reply to one heartbeat.
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            timeout_secs: 120,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind: String,
    pub hub: HubConfig,
    pub lanes: BTreeMap<String, LaneOverride>,
    pub heartbeat: HeartbeatConfig,
    /// JSONL file receiving one line per contained task panic.
    pub crash_log: PathBuf,
    /// Rotate the crash log once it would grow past this size. 0 disables.
    pub crash_log_max_bytes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:18789".to_string(),
            hub: HubConfig::default(),
            lanes: BTreeMap::new(),
            heartbeat: HeartbeatConfig::default(),
            crash_log: PathBuf::from("./data/crash.jsonl"),
            crash_log_max_bytes: 1024 * 1024,
        }
    }
}

impl DaemonConfig {
    /// Load a YAML config file. Absent fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Err(ConfigError::Empty(path.display().to_string()));
        }

        serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidYaml(e.to_string()))
    }

    /// Resolve the config from the `--config` flag, then `CLAWD_CONFIG`,
    /// then defaults. `CLAWD_BIND` overrides the bind address.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let env_bind = std::env::var(BIND_ENV).ok();
        Self::resolve_with(cli_path, env_path.as_deref(), env_bind)
    }

    pub fn resolve_with(
        cli_path: Option<&Path>,
        env_path: Option<&Path>,
        env_bind: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match cli_path.or(env_path) {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(bind) = env_bind.filter(|b| !b.trim().is_empty()) {
            config.bind = bind;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        let hub = &self.hub;
        if hub.primary.trim().is_empty() {
            return Err(ConfigError::Invalid("hub.primary must not be empty".to_string()));
        }
        if hub.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.outbound_capacity must be greater than 0".to_string(),
            ));
        }
        if hub.max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "hub.max_message_bytes must be greater than 0".to_string(),
            ));
        }
        if hub.idle_timeout_secs == 0 || hub.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "hub idle timeout and ping interval must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat.enabled && self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind address '{}': {}", self.bind, e)))
    }

    /// The built-in lane table with this config's overrides applied.
    pub fn lane_table(&self) -> LaneTable {
        let mut table = LaneTable::standard();
        for (name, overrides) in &self.lanes {
            let spec = apply_override(name, table.spec_for(name), overrides);
            table.insert(name.clone(), spec);
        }
        table
    }
}

fn apply_override(name: &str, mut spec: LaneSpec, overrides: &LaneOverride) -> LaneSpec {
    if let Some(concurrency) = overrides.concurrency {
        spec.concurrency = concurrency;
    }
    if let Some(cap) = overrides.hard_cap {
        spec = spec.with_hard_cap(cap);
    }
    if let Some(secs) = overrides.watchdog_secs {
        spec.watchdog = (secs > 0).then_some(Duration::from_secs(secs));
    }
    if let Some(secs) = overrides.warn_after_secs {
        spec.warn_after = (secs > 0).then_some(Duration::from_secs(secs));
    }
    if let Some(cap) = spec.hard_cap {
        if spec.concurrency > cap {
            warn!(
                lane = %name,
                concurrency = spec.concurrency,
                hard_cap = cap,
                "Lane concurrency above hard cap, clamping"
            );
            spec.concurrency = cap;
        }
    }
    spec
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use clawd_lanes::lanes;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("clawd.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = DaemonConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 18789);
        assert!(config.heartbeat.enabled);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "bind: \"0.0.0.0:9000\"\nhub:\n  primary: desk\n  outbound_capacity: 16\nheartbeat:\n  enabled: false\n",
        );

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.hub.primary, "desk");
        assert_eq!(config.hub.outbound_capacity, 16);
        assert_eq!(config.hub.call_timeout_secs, 120);
        assert!(!config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval_secs, 300);
    }

    #[test]
    fn test_missing_file() {
        match DaemonConfig::load(Path::new("/nonexistent/clawd.yaml")) {
            Err(ConfigError::NotFound(path)) => assert!(path.contains("clawd.yaml")),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "  \n");
        assert!(matches!(DaemonConfig::load(&path), Err(ConfigError::Empty(_))));
    }

    #[test]
    fn test_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "hub: [unclosed");
        assert!(matches!(
            DaemonConfig::load(&path),
            Err(ConfigError::InvalidYaml(_))
        ));
    }

    #[test]
    fn test_resolution_order() {
        let dir = TempDir::new().unwrap();
        let flagged = write(&dir, "bind: \"127.0.0.1:1111\"\n");
        let env_path = dir.path().join("env.yaml");
        fs::write(&env_path, "bind: \"127.0.0.1:2222\"\n").unwrap();

        let config = DaemonConfig::resolve_with(Some(&flagged), Some(&env_path), None).unwrap();
        assert_eq!(config.bind, "127.0.0.1:1111");

        let config = DaemonConfig::resolve_with(None, Some(&env_path), None).unwrap();
        assert_eq!(config.bind, "127.0.0.1:2222");

        let config = DaemonConfig::resolve_with(None, None, None).unwrap();
        assert_eq!(config, DaemonConfig::default());

        let config =
            DaemonConfig::resolve_with(Some(&flagged), None, Some("127.0.0.1:3333".to_string()))
                .unwrap();
        assert_eq!(config.bind, "127.0.0.1:3333");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DaemonConfig {
            bind: "not an address".to_string(),
            ..DaemonConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.bind = "127.0.0.1:0".to_string();
        config.hub.outbound_capacity = 0;
        assert!(config.validate().is_err());

        config.hub.outbound_capacity = 8;
        config.heartbeat.interval_secs = 0;
        assert!(config.validate().is_err());
        config.heartbeat.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_lane_overrides_merge() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "lanes:\n  main:\n    concurrency: 2\n  subagent:\n    concurrency: 50\n  research:\n    concurrency: 6\n    hard_cap: 8\n    watchdog_secs: 60\n",
        );
        let table = DaemonConfig::load(&path).unwrap().lane_table();

        assert_eq!(table.spec_for(lanes::MAIN).concurrency, 2);
        // Keeps the built-in hard cap and clamps to it.
        let subagent = table.spec_for(lanes::SUBAGENT);
        assert_eq!(subagent.hard_cap, Some(10));
        assert_eq!(subagent.concurrency, 10);

        let research = table.spec_for("research");
        assert_eq!(research.concurrency, 6);
        assert_eq!(research.hard_cap, Some(8));
        assert_eq!(research.watchdog, Some(Duration::from_secs(60)));

        assert_eq!(table.spec_for(lanes::NESTED).hard_cap, Some(3));
    }
}
