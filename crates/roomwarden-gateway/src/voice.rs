//! Voice state cache — who is connected to which voice channel.
//!
//! Discord has no REST endpoint for voice occupancy, so the listener keeps
//! this cache current from gateway dispatches and `DiscordGateway` answers
//! `occupant_count` from it.
//!
//! A guild only counts as known once a full snapshot (`GUILD_CREATE`) has
//! been applied. Until then occupancy is unknown, never zero, so scans do
//! not reap rooms the bot simply has not heard about yet.

use std::collections::{HashMap, HashSet};

use roomwarden_core::ids::{ChannelId, GuildId, UserId};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct VoiceState {
    /// Current voice channel per member, per guild.
    members: HashMap<GuildId, HashMap<UserId, ChannelId>>,
    /// Guilds with a complete snapshot.
    synced: HashSet<GuildId>,
}

/// Shared, concurrently readable voice occupancy map.
#[derive(Debug, Default)]
pub struct VoiceStateCache {
    state: RwLock<VoiceState>,
}

impl VoiceStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about a guild with a full snapshot.
    pub async fn replace_guild(
        &self,
        guild_id: GuildId,
        states: impl IntoIterator<Item = (UserId, ChannelId)>,
    ) {
        let mut state = self.state.write().await;
        state.members.insert(guild_id, states.into_iter().collect());
        state.synced.insert(guild_id);
    }

    /// Drop a guild (bot removed or guild unavailable).
    pub async fn forget_guild(&self, guild_id: GuildId) {
        let mut state = self.state.write().await;
        state.members.remove(&guild_id);
        state.synced.remove(&guild_id);
    }

    /// Record a member's new voice channel (`None` = disconnected).
    ///
    /// Returns the channel they were in before, if any.
    pub async fn update(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel: Option<ChannelId>,
    ) -> Option<ChannelId> {
        let mut state = self.state.write().await;
        let guild = state.members.entry(guild_id).or_default();
        match channel {
            Some(channel) => guild.insert(user_id, channel),
            None => guild.remove(&user_id),
        }
    }

    /// Members connected to `channel_id`, or `None` if the guild has not
    /// been synced yet.
    pub async fn occupant_count(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<usize> {
        let state = self.state.read().await;
        if !state.synced.contains(&guild_id) {
            return None;
        }
        let count = state
            .members
            .get(&guild_id)
            .map_or(0, |m| m.values().filter(|c| **c == channel_id).count());
        Some(count)
    }

    /// The voice channel a member is in right now.
    pub async fn channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let state = self.state.read().await;
        state.members.get(&guild_id)?.get(&user_id).copied()
    }
}
