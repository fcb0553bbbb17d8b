//! Bus event types.

use chrono::{DateTime, Utc};

use crate::ids::{ChannelId, GuildId, UserId};

/// A member's voice channel changed.
///
/// `joined` is the channel the member is in now (`None` if they
/// disconnected); `left` is the channel they were in before, when known.
#[derive(Clone, Debug, PartialEq)]
pub struct OccupancyEvent {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Display name, used to name created rooms.
    pub member_name: Option<String>,
    pub joined: Option<ChannelId>,
    pub left: Option<ChannelId>,
    pub timestamp: DateTime<Utc>,
}

impl OccupancyEvent {
    /// A member connected to (or moved into) `channel`.
    pub fn joined(guild_id: GuildId, user_id: UserId, channel: ChannelId) -> Self {
        Self {
            guild_id,
            user_id,
            member_name: None,
            joined: Some(channel),
            left: None,
            timestamp: Utc::now(),
        }
    }

    /// A member disconnected from `channel`.
    pub fn left(guild_id: GuildId, user_id: UserId, channel: ChannelId) -> Self {
        Self {
            guild_id,
            user_id,
            member_name: None,
            joined: None,
            left: Some(channel),
            timestamp: Utc::now(),
        }
    }

    pub fn with_member_name(mut self, name: impl Into<String>) -> Self {
        self.member_name = Some(name.into());
        self
    }

    /// Name to show for the member: display name, else the raw id.
    pub fn display_name(&self) -> String {
        match &self.member_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self.user_id.to_string(),
        }
    }
}
