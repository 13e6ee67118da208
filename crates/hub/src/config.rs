use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hub and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HubConfig {
    /// Connection name that `call_sync` targets.
    pub primary: String,
    /// Route `send_to_id` for unknown ids to the primary connection.
    /// Off by default: with several agents live it silently misroutes.
    pub fallback_to_primary: bool,
    /// Outbound queue slots per connection.
    pub outbound_capacity: usize,
    pub max_message_bytes: usize,
    pub idle_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            primary: "main".to_string(),
            fallback_to_primary: false,
            outbound_capacity: 256,
            max_message_bytes: 4 * 1024 * 1024,
            idle_timeout_secs: 90,
            ping_interval_secs: 30,
            call_timeout_secs: 120,
        }
    }
}

impl HubConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.primary, "main");
        assert!(!config.fallback_to_primary);
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_override() {
        let config: HubConfig =
            serde_json::from_str(r#"{"primary": "desk", "call_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.primary, "desk");
        assert_eq!(config.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_timeout_secs, 90);
    }
}
