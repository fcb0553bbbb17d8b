//! The registry document — every record the bot has committed to.

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, GuildId, UserId};
use crate::types::{
    CountDownChannel, ExpireExtendSession, ExtensionTarget, GuildSettings, RecallIntent,
    RecordId, RoomConfig, RoomInstance, TmpChannel,
};

/// Current on-disk format version.
pub const REGISTRY_VERSION: u32 = 1;

fn default_version() -> u32 {
    REGISTRY_VERSION
}

/// Full registry contents, persisted as one JSON document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryState {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Last id handed out. Ids are never reused.
    #[serde(default)]
    pub last_id: RecordId,
    #[serde(default)]
    pub room_configs: Vec<RoomConfig>,
    #[serde(default)]
    pub room_instances: Vec<RoomInstance>,
    #[serde(default)]
    pub tmp_channels: Vec<TmpChannel>,
    #[serde(default)]
    pub countdowns: Vec<CountDownChannel>,
    #[serde(default)]
    pub recalls: Vec<RecallIntent>,
    #[serde(default)]
    pub extensions: Vec<ExpireExtendSession>,
    #[serde(default)]
    pub guild_settings: Vec<GuildSettings>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self {
            version: REGISTRY_VERSION,
            ..Default::default()
        }
    }

    pub(crate) fn allocate_id(&mut self) -> RecordId {
        self.last_id += 1;
        self.last_id
    }

    pub fn room_config(&self, id: RecordId) -> Option<&RoomConfig> {
        self.room_configs.iter().find(|c| c.id == id)
    }

    /// Enabled configs whose lobby is the given channel.
    pub fn configs_for_lobby(&self, guild_id: GuildId, lobby: ChannelId) -> Vec<&RoomConfig> {
        self.room_configs
            .iter()
            .filter(|c| c.enabled && c.guild_id == guild_id && c.lobby_channel_id == lobby)
            .collect()
    }

    pub fn room_instance_for(&self, config_id: RecordId, creator_id: UserId) -> Option<&RoomInstance> {
        self.room_instances
            .iter()
            .find(|r| r.config_id == config_id && r.creator_id == creator_id)
    }

    pub fn tmp_channel(&self, id: RecordId) -> Option<&TmpChannel> {
        self.tmp_channels.iter().find(|c| c.id == id)
    }

    pub fn countdown(&self, id: RecordId) -> Option<&CountDownChannel> {
        self.countdowns.iter().find(|c| c.id == id)
    }

    pub fn recall(&self, id: RecordId) -> Option<&RecallIntent> {
        self.recalls.iter().find(|r| r.id == id)
    }

    /// Pending extensions for one target, oldest first.
    pub fn extensions_for(&self, target: ExtensionTarget) -> Vec<&ExpireExtendSession> {
        let mut found: Vec<&ExpireExtendSession> =
            self.extensions.iter().filter(|e| e.target == target).collect();
        found.sort_by_key(|e| (e.created_at, e.id));
        found
    }

    pub fn guild_settings(&self, guild_id: GuildId) -> Option<&GuildSettings> {
        self.guild_settings.iter().find(|s| s.guild_id == guild_id)
    }

    /// Total number of records across all kinds.
    pub fn record_count(&self) -> usize {
        self.room_configs.len()
            + self.room_instances.len()
            + self.tmp_channels.len()
            + self.countdowns.len()
            + self.recalls.len()
            + self.extensions.len()
            + self.guild_settings.len()
    }
}
