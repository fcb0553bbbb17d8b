//! Config loader — reads `~/.roomwarden/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.roomwarden/config.json`
//! 3. Environment variables `ROOMWARDEN_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;
use crate::types::ZeroPolicy;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `ROOMWARDEN_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `ROOMWARDEN_DISCORD__TOKEN` → `discord.token`
/// - `ROOMWARDEN_DISCORD__API_BASE` → `discord.api_base`
/// - `ROOMWARDEN_REGISTRY__PATH` → `registry.path`
/// - `ROOMWARDEN_SCAN__<JOB>_SECS` → `scan.<job>_secs`
/// - `ROOMWARDEN_COUNTDOWN__AT_ZERO` → `countdown.at_zero` (`persist|delete`)
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(val) = std::env::var("ROOMWARDEN_DISCORD__TOKEN") {
        config.discord.token = val;
    }
    if let Ok(val) = std::env::var("ROOMWARDEN_DISCORD__API_BASE") {
        config.discord.api_base = val;
    }
    if let Ok(val) = std::env::var("ROOMWARDEN_REGISTRY__PATH") {
        config.registry.path = val;
    }

    apply_secs_env(&mut config.scan.room_instance_secs, "ROOM_INSTANCE");
    apply_secs_env(&mut config.scan.tmp_channel_secs, "TMP_CHANNEL");
    apply_secs_env(&mut config.scan.countdown_secs, "COUNTDOWN");
    apply_secs_env(&mut config.scan.recall_secs, "RECALL");
    apply_secs_env(&mut config.scan.settings_secs, "SETTINGS");

    if let Ok(val) = std::env::var("ROOMWARDEN_COUNTDOWN__AT_ZERO") {
        match val.parse::<ZeroPolicy>() {
            Ok(policy) => config.countdown.at_zero = policy,
            Err(e) => warn!("Ignoring ROOMWARDEN_COUNTDOWN__AT_ZERO: {}", e),
        }
    }

    config
}

/// Apply an env var override for a single scan interval.
fn apply_secs_env(field: &mut u64, job: &str) {
    if let Ok(val) = std::env::var(format!("ROOMWARDEN_SCAN__{job}_SECS")) {
        if let Ok(n) = val.parse::<u64>() {
            *field = n;
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
