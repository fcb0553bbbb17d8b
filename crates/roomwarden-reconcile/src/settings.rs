//! Per-guild settings cache.
//!
//! Read-mostly view of the registry's `GuildSettings` rows. Consumers hold
//! an `Arc<SettingsCache>`; the `settings-refresh` job re-reads the registry
//! file and reloads the cache, so edits made by other processes (the admin
//! CLI) show up within one refresh interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use roomwarden_core::error::RegistryError;
use roomwarden_core::ids::GuildId;
use roomwarden_core::registry::Registry;
use roomwarden_core::types::GuildSettings;

use crate::scan::ScanError;
use crate::scheduler::ScanJob;
use crate::types::{ScanReport, SETTINGS_REFRESH};

pub struct SettingsCache {
    registry: Arc<Registry>,
    cache: RwLock<HashMap<GuildId, GuildSettings>>,
}

impl SettingsCache {
    /// An empty cache; entries are read through on first use.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// A cache primed with every guild's settings.
    pub async fn load(registry: Arc<Registry>) -> Self {
        let cache = Self::new(registry);
        if let Err(e) = cache.refresh().await {
            warn!(error = %e, "settings cache starts from the last loaded registry");
        }
        cache
    }

    /// Pick up registry file changes, then replace the cache contents with
    /// the current rows. Returns the number of guilds loaded.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        self.registry.reload().await?;
        let state = self.registry.snapshot().await;
        let fresh: HashMap<GuildId, GuildSettings> = state
            .guild_settings
            .into_iter()
            .map(|s| (s.guild_id, s))
            .collect();
        let count = fresh.len();
        *self.cache.write().await = fresh;
        debug!(guilds = count, "settings cache refreshed");
        Ok(count)
    }

    /// Drop one guild's entry so the next read goes to the registry.
    pub async fn invalidate(&self, guild_id: GuildId) {
        self.cache.write().await.remove(&guild_id);
    }

    /// Settings for a guild, defaults if it has none.
    pub async fn get(&self, guild_id: GuildId) -> GuildSettings {
        if let Some(settings) = self.cache.read().await.get(&guild_id) {
            return settings.clone();
        }

        let settings = self
            .registry
            .snapshot()
            .await
            .guild_settings(guild_id)
            .cloned()
            .unwrap_or_else(|| GuildSettings {
                guild_id,
                ..Default::default()
            });
        self.cache.write().await.insert(guild_id, settings.clone());
        settings
    }

    /// The guild's UTC offset in minutes.
    pub async fn utc_offset(&self, guild_id: GuildId) -> i32 {
        self.get(guild_id).await.utc_offset_minutes
    }
}

/// Periodically reloads a `SettingsCache`.
pub struct SettingsRefreshJob {
    cache: Arc<SettingsCache>,
    interval: Duration,
}

impl SettingsRefreshJob {
    pub fn new(cache: Arc<SettingsCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }
}

#[async_trait]
impl ScanJob for SettingsRefreshJob {
    fn name(&self) -> &str {
        SETTINGS_REFRESH
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<ScanReport, ScanError> {
        let seen = self.cache.refresh().await.map_err(ScanError::Reload)?;
        Ok(ScanReport {
            seen,
            ..Default::default()
        })
    }
}
