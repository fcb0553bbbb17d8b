//! Configuration schema.
//!
//! Hierarchy: `Config` → `DiscordConfig`, `RegistryConfig`, `ScanConfig`,
//! `CountdownConfig`, `TriggerConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::ZeroPolicy;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.roomwarden/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub discord: DiscordConfig,
    pub registry: RegistryConfig,
    pub scan: ScanConfig,
    pub countdown: CountdownConfig,
    pub trigger: TriggerConfig,
}

// ─────────────────────────────────────────────
// Discord
// ─────────────────────────────────────────────

/// Discord bot credentials and endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordConfig {
    /// Bot token from the Developer Portal.
    pub token: String,
    /// Application (client) id, used to build invite links.
    pub application_id: String,
    /// REST base URL (overridable for tests and proxies).
    pub api_base: String,
    /// Gateway websocket URL.
    pub gateway_url: String,
}

impl DiscordConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty()
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            application_id: String::new(),
            api_base: "https://discord.com/api/v10".to_string(),
            gateway_url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Where the registry document lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    pub path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: "~/.roomwarden/registry.json".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Scan intervals
// ─────────────────────────────────────────────

/// Per-job scan intervals in seconds. Read once at job registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub room_instance_secs: u64,
    pub tmp_channel_secs: u64,
    pub countdown_secs: u64,
    pub recall_secs: u64,
    pub settings_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            room_instance_secs: 60,
            tmp_channel_secs: 300,
            countdown_secs: 300,
            recall_secs: 300,
            settings_secs: 300,
        }
    }
}

impl ScanConfig {
    /// Interval as a `Duration`, never shorter than one second.
    pub fn interval(secs: u64) -> Duration {
        Duration::from_secs(secs.max(1))
    }
}

// ─────────────────────────────────────────────
// Countdown
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CountdownConfig {
    /// Keep or delete countdown channels that reach zero.
    pub at_zero: ZeroPolicy,
}

// ─────────────────────────────────────────────
// Trigger
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerConfig {
    /// Occupancy event bus capacity.
    pub event_buffer: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scan.room_instance_secs, 60);
        assert_eq!(config.scan.tmp_channel_secs, 300);
        assert_eq!(config.countdown.at_zero, ZeroPolicy::Persist);
        assert_eq!(config.trigger.event_buffer, 256);
        assert!(!config.discord.is_configured());
    }

    #[test]
    fn test_config_from_json_camel_case() {
        let json = serde_json::json!({
            "discord": { "token": "abc.def" },
            "scan": { "roomInstanceSecs": 15, "recallSecs": 30 },
            "countdown": { "atZero": "delete" }
        });

        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.discord.token, "abc.def");
        assert_eq!(config.scan.room_instance_secs, 15);
        assert_eq!(config.scan.recall_secs, 30);
        assert_eq!(config.countdown.at_zero, ZeroPolicy::Delete);
        // Defaults preserved for missing fields
        assert_eq!(config.scan.countdown_secs, 300);
        assert_eq!(config.discord.api_base, "https://discord.com/api/v10");
    }

    #[test]
    fn test_config_json_uses_camel_case() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert!(json["scan"].get("roomInstanceSecs").is_some());
        assert!(json["countdown"].get("atZero").is_some());
        assert!(json["scan"].get("room_instance_secs").is_none());
    }

    #[test]
    fn test_interval_floor() {
        assert_eq!(ScanConfig::interval(0), Duration::from_secs(1));
        assert_eq!(ScanConfig::interval(42), Duration::from_secs(42));
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.registry.path, "~/.roomwarden/registry.json");
        assert_eq!(config.scan, ScanConfig::default());
    }
}
