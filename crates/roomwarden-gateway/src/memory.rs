//! In-memory gateway — a scriptable stand-in for the chat platform.
//!
//! Used by tests and by `run --dry-run`. Every mutation is counted so
//! callers can assert that a pass issued no platform writes, and any
//! operation can be told to fail to exercise error paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use roomwarden_core::ids::{ChannelId, GuildId, MessageId, UserId};
use tracing::debug;

use crate::base::{ChannelInfo, ChannelKind, Gateway, GuildInfo, VoiceChannelSpec};
use crate::error::GatewayError;

/// First id handed out for channels created through the gateway.
const FIRST_CREATED_ID: u64 = 1_000_000;

/// Gateway operations, for failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    Guild,
    Channel,
    OccupantCount,
    CreateVoiceChannel,
    RenameChannel,
    DeleteChannel,
    DeleteMessage,
    MoveMember,
}

/// Mutation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub creates: usize,
    pub renames: usize,
    pub channel_deletes: usize,
    pub message_deletes: usize,
    pub moves: usize,
}

impl GatewayStats {
    /// Total mutating calls, successful or not.
    pub fn mutations(&self) -> usize {
        self.creates + self.renames + self.channel_deletes + self.message_deletes + self.moves
    }
}

#[derive(Debug)]
enum Failure {
    Always,
    Times(usize),
}

#[derive(Debug, Default)]
struct MemoryState {
    guilds: HashMap<GuildId, String>,
    channels: HashMap<ChannelId, ChannelInfo>,
    occupants: HashMap<ChannelId, usize>,
    members: HashMap<(GuildId, UserId), ChannelId>,
    messages: HashSet<(ChannelId, MessageId)>,
    failures: HashMap<GatewayOp, Failure>,
    stats: GatewayStats,
    next_id: u64,
}

impl MemoryState {
    /// Consume one injected failure for `op`, if any.
    fn take_failure(&mut self, op: GatewayOp) -> Result<(), GatewayError> {
        let fail = match self.failures.get_mut(&op) {
            None => false,
            Some(Failure::Always) => true,
            Some(Failure::Times(n)) => {
                *n -= 1;
                if *n == 0 {
                    self.failures.remove(&op);
                }
                true
            }
        };
        if fail {
            return Err(GatewayError::Transient(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> ChannelId {
        if self.next_id < FIRST_CREATED_ID {
            self.next_id = FIRST_CREATED_ID;
        }
        self.next_id += 1;
        ChannelId(self.next_id)
    }
}

fn unknown_channel(channel_id: ChannelId) -> GatewayError {
    GatewayError::Http {
        status: 404,
        body: format!("unknown channel {channel_id}"),
    }
}

/// A fake platform held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    /// Artificial latency for `create_voice_channel`, to widen race windows.
    create_latency: Mutex<Option<Duration>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── world setup ──

    pub fn add_guild(&self, guild_id: GuildId, name: &str) {
        self.lock().guilds.insert(guild_id, name.to_string());
    }

    /// Remove a guild and every channel in it.
    pub fn remove_guild(&self, guild_id: GuildId) {
        let mut state = self.lock();
        state.guilds.remove(&guild_id);
        state.channels.retain(|_, c| c.guild_id != guild_id);
    }

    /// Add a channel with a known id. The guild is added if missing.
    pub fn add_channel(&self, guild_id: GuildId, channel_id: ChannelId, name: &str, kind: ChannelKind) {
        let mut state = self.lock();
        state
            .guilds
            .entry(guild_id)
            .or_insert_with(|| format!("guild-{guild_id}"));
        state.channels.insert(
            channel_id,
            ChannelInfo {
                id: channel_id,
                guild_id,
                name: name.to_string(),
                kind,
            },
        );
    }

    /// Delete a channel behind the bot's back.
    pub fn remove_channel(&self, channel_id: ChannelId) {
        let mut state = self.lock();
        state.channels.remove(&channel_id);
        state.occupants.remove(&channel_id);
    }

    pub fn set_occupants(&self, channel_id: ChannelId, count: usize) {
        self.lock().occupants.insert(channel_id, count);
    }

    pub fn add_message(&self, channel_id: ChannelId, message_id: MessageId) {
        self.lock().messages.insert((channel_id, message_id));
    }

    /// Make every call to `op` fail until cleared.
    pub fn fail(&self, op: GatewayOp) {
        self.lock().failures.insert(op, Failure::Always);
    }

    /// Make the next `times` calls to `op` fail.
    pub fn fail_times(&self, op: GatewayOp, times: usize) {
        if times > 0 {
            self.lock().failures.insert(op, Failure::Times(times));
        }
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn set_create_latency(&self, latency: Duration) {
        *self.create_latency.lock().unwrap_or_else(|e| e.into_inner()) = Some(latency);
    }

    // ── inspection ──

    pub fn stats(&self) -> GatewayStats {
        self.lock().stats
    }

    pub fn has_channel(&self, channel_id: ChannelId) -> bool {
        self.lock().channels.contains_key(&channel_id)
    }

    pub fn channel_name(&self, channel_id: ChannelId) -> Option<String> {
        self.lock().channels.get(&channel_id).map(|c| c.name.clone())
    }

    pub fn has_message(&self, channel_id: ChannelId, message_id: MessageId) -> bool {
        self.lock().messages.contains(&(channel_id, message_id))
    }

    /// Voice channel a member was last moved into.
    pub fn member_channel(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.lock().members.get(&(guild_id, user_id)).copied()
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    fn name(&self) -> &str {
        "memory"
    }

    async fn guild(&self, guild_id: GuildId) -> Result<Option<GuildInfo>, GatewayError> {
        let mut state = self.lock();
        state.take_failure(GatewayOp::Guild)?;
        Ok(state.guilds.get(&guild_id).map(|name| GuildInfo {
            id: guild_id,
            name: name.clone(),
        }))
    }

    async fn channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelInfo>, GatewayError> {
        let mut state = self.lock();
        state.take_failure(GatewayOp::Channel)?;
        Ok(state
            .channels
            .get(&channel_id)
            .filter(|c| c.guild_id == guild_id)
            .cloned())
    }

    async fn occupant_count(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<usize, GatewayError> {
        let mut state = self.lock();
        state.take_failure(GatewayOp::OccupantCount)?;
        Ok(state.occupants.get(&channel_id).copied().unwrap_or(0))
    }

    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        spec: &VoiceChannelSpec,
    ) -> Result<ChannelId, GatewayError> {
        let latency = *self.create_latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.stats.creates += 1;
        state.take_failure(GatewayOp::CreateVoiceChannel)?;
        if !state.guilds.contains_key(&guild_id) {
            return Err(GatewayError::Http {
                status: 404,
                body: format!("unknown guild {guild_id}"),
            });
        }

        let id = state.allocate_id();
        state.channels.insert(
            id,
            ChannelInfo {
                id,
                guild_id,
                name: spec.name.clone(),
                kind: ChannelKind::Voice,
            },
        );
        debug!(guild = %guild_id, channel = %id, name = %spec.name, "memory gateway created voice channel");
        Ok(id)
    }

    async fn rename_channel(&self, channel_id: ChannelId, name: &str) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.stats.renames += 1;
        state.take_failure(GatewayOp::RenameChannel)?;
        match state.channels.get_mut(&channel_id) {
            Some(channel) => {
                channel.name = name.to_string();
                Ok(())
            }
            None => Err(unknown_channel(channel_id)),
        }
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.stats.channel_deletes += 1;
        state.take_failure(GatewayOp::DeleteChannel)?;
        state.channels.remove(&channel_id);
        state.occupants.remove(&channel_id);
        state.messages.retain(|(c, _)| *c != channel_id);
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.stats.message_deletes += 1;
        state.take_failure(GatewayOp::DeleteMessage)?;
        state.messages.remove(&(channel_id, message_id));
        Ok(())
    }

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.stats.moves += 1;
        state.take_failure(GatewayOp::MoveMember)?;
        if !state.channels.contains_key(&channel_id) {
            return Err(unknown_channel(channel_id));
        }

        if let Some(previous) = state.members.insert((guild_id, user_id), channel_id) {
            if let Some(count) = state.occupants.get_mut(&previous) {
                *count = count.saturating_sub(1);
            }
        }
        *state.occupants.entry(channel_id).or_insert(0) += 1;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn spec(name: &str) -> VoiceChannelSpec {
        VoiceChannelSpec {
            name: name.into(),
            bitrate: 64_000,
            user_limit: NonZeroU32::new(5).unwrap(),
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn test_lookups_return_none_when_gone() {
        let gw = MemoryGateway::new();
        gw.add_channel(GuildId(1), ChannelId(10), "general", ChannelKind::Text);

        assert!(gw.guild(GuildId(1)).await.unwrap().is_some());
        assert!(gw.guild(GuildId(2)).await.unwrap().is_none());
        assert!(gw.channel(GuildId(1), ChannelId(10)).await.unwrap().is_some());
        // Wrong guild is the same as missing
        assert!(gw.channel(GuildId(2), ChannelId(10)).await.unwrap().is_none());

        gw.remove_channel(ChannelId(10));
        assert!(gw.channel(GuildId(1), ChannelId(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_and_move() {
        let gw = MemoryGateway::new();
        gw.add_guild(GuildId(1), "home");

        let id = gw.create_voice_channel(GuildId(1), &spec("room")).await.unwrap();
        assert_eq!(gw.channel_name(id).as_deref(), Some("room"));
        assert_eq!(gw.occupant_count(GuildId(1), id).await.unwrap(), 0);

        gw.move_member(GuildId(1), UserId(7), id).await.unwrap();
        assert_eq!(gw.occupant_count(GuildId(1), id).await.unwrap(), 1);
        assert_eq!(gw.member_channel(GuildId(1), UserId(7)), Some(id));

        let stats = gw.stats();
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.moves, 1);
        assert_eq!(stats.mutations(), 2);
    }

    #[tokio::test]
    async fn test_move_decrements_previous_channel() {
        let gw = MemoryGateway::new();
        gw.add_channel(GuildId(1), ChannelId(1), "a", ChannelKind::Voice);
        gw.add_channel(GuildId(1), ChannelId(2), "b", ChannelKind::Voice);

        gw.move_member(GuildId(1), UserId(3), ChannelId(1)).await.unwrap();
        gw.move_member(GuildId(1), UserId(3), ChannelId(2)).await.unwrap();
        assert_eq!(gw.occupant_count(GuildId(1), ChannelId(1)).await.unwrap(), 0);
        assert_eq!(gw.occupant_count(GuildId(1), ChannelId(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_in_unknown_guild_fails() {
        let gw = MemoryGateway::new();
        let err = gw.create_voice_channel(GuildId(9), &spec("x")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let gw = MemoryGateway::new();
        gw.add_message(ChannelId(5), MessageId(6));

        gw.delete_message(ChannelId(5), MessageId(6)).await.unwrap();
        assert!(!gw.has_message(ChannelId(5), MessageId(6)));
        gw.delete_message(ChannelId(5), MessageId(6)).await.unwrap();
        gw.delete_channel(ChannelId(77)).await.unwrap();
        assert_eq!(gw.stats().message_deletes, 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let gw = MemoryGateway::new();
        gw.add_message(ChannelId(5), MessageId(6));

        gw.fail_times(GatewayOp::DeleteMessage, 1);
        assert!(gw.delete_message(ChannelId(5), MessageId(6)).await.is_err());
        assert!(gw.has_message(ChannelId(5), MessageId(6)));
        assert!(gw.delete_message(ChannelId(5), MessageId(6)).await.is_ok());

        gw.fail(GatewayOp::Guild);
        assert!(gw.guild(GuildId(1)).await.is_err());
        assert!(gw.guild(GuildId(1)).await.is_err());
        gw.clear_failures();
        assert!(gw.guild(GuildId(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_missing_channel_is_error() {
        let gw = MemoryGateway::new();
        let err = gw.rename_channel(ChannelId(1), "new").await.unwrap_err();
        assert!(matches!(err, GatewayError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_remove_guild_drops_channels() {
        let gw = MemoryGateway::new();
        gw.add_channel(GuildId(1), ChannelId(2), "x", ChannelKind::Text);
        gw.remove_guild(GuildId(1));
        assert!(!gw.has_channel(ChannelId(2)));
        assert!(gw.channel(GuildId(1), ChannelId(2)).await.unwrap().is_none());
    }
}
