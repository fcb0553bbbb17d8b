//! Gateway trait — the narrow slice of the chat platform the reconciler
//! depends on.
//!
//! Every implementation (Discord REST, in-memory fake) provides:
//! - lookups that answer `Ok(None)` when the resource is gone
//! - mutations that either succeed or return a typed `GatewayError`
//!
//! "Not found" is never an error. Callers use `Ok(None)` as control flow
//! (the record is stale) and reserve `Err` for failures worth retrying.

use async_trait::async_trait;
use roomwarden_core::ids::{ChannelId, GuildId, MessageId, UserId};
use std::num::NonZeroU32;

use crate::error::GatewayError;

// ─────────────────────────────────────────────
// Resolved platform objects
// ─────────────────────────────────────────────

/// A guild the bot can see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuildInfo {
    pub id: GuildId,
    pub name: String,
}

/// Channel flavour as far as the reconciler cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Voice,
    Text,
    Category,
    Other,
}

impl ChannelKind {
    /// Map a Discord channel `type` code.
    pub fn from_discord_type(code: u64) -> Self {
        match code {
            0 | 5 => ChannelKind::Text,
            2 | 13 => ChannelKind::Voice,
            4 => ChannelKind::Category,
            _ => ChannelKind::Other,
        }
    }
}

/// A channel as currently seen on the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    pub kind: ChannelKind,
}

/// Parameters for a voice channel the trigger handler creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceChannelSpec {
    pub name: String,
    pub bitrate: u32,
    pub user_limit: NonZeroU32,
    pub parent_id: Option<ChannelId>,
}

// ─────────────────────────────────────────────
// Gateway trait
// ─────────────────────────────────────────────

/// External resource gateway.
///
/// Implementations are shared as `Arc<dyn Gateway>` between the trigger
/// handler and every scan job, so all methods take `&self`.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Short implementation name for logs (e.g. "discord", "memory").
    fn name(&self) -> &str;

    /// Resolve a guild. `Ok(None)` when the bot is no longer in it.
    async fn guild(&self, guild_id: GuildId) -> Result<Option<GuildInfo>, GatewayError>;

    /// Resolve a channel inside a guild. `Ok(None)` when it no longer exists.
    async fn channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelInfo>, GatewayError>;

    /// Number of members currently connected to a voice channel.
    async fn occupant_count(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<usize, GatewayError>;

    /// Create a voice channel and return its id.
    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        spec: &VoiceChannelSpec,
    ) -> Result<ChannelId, GatewayError>;

    async fn rename_channel(&self, channel_id: ChannelId, name: &str) -> Result<(), GatewayError>;

    /// Delete a channel. A channel that is already gone counts as deleted.
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), GatewayError>;

    /// Delete a message. An unknown message counts as deleted.
    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), GatewayError>;

    /// Move a connected member into a voice channel.
    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), GatewayError>;
}
