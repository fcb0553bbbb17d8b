//! Registry record types.
//!
//! Every record carries a registry-assigned `id`. Records handed to
//! `Mutation::Insert*` may carry any id; the registry overwrites it with the
//! next free one at commit time.
//!
//! All types derive `Serialize`/`Deserialize` with `camelCase` keys.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, GuildId, MessageId, UserId};
use crate::utils::truncate_chars;

/// Registry-local record id.
pub type RecordId = u64;

// ─────────────────────────────────────────────
// Resource kinds
// ─────────────────────────────────────────────

/// The kinds of ephemeral resource the registry tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    RoomInstance,
    TmpChannel,
    CountDownChannel,
    RecallIntent,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::RoomInstance => "room-instance",
            ResourceKind::TmpChannel => "tmp-channel",
            ResourceKind::CountDownChannel => "countdown",
            ResourceKind::RecallIntent => "recall",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────
// Voice rooms
// ─────────────────────────────────────────────

/// Template for on-demand voice rooms.
///
/// Joining `lobby_channel_id` creates a personal room for the joining member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    pub id: RecordId,
    pub name: String,
    pub guild_id: GuildId,
    pub lobby_channel_id: ChannelId,
    /// Target voice quality in bits per second.
    pub bitrate: u32,
    pub member_limit: NonZeroU32,
    /// Parent category for created rooms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<ChannelId>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// A live on-demand voice room.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInstance {
    pub id: RecordId,
    pub config_id: RecordId,
    pub channel_id: ChannelId,
    pub creator_id: UserId,
    pub member_limit: NonZeroU32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoomInstance {
    /// Create an instance for a freshly created external channel.
    pub fn new(
        config_id: RecordId,
        channel_id: ChannelId,
        creator_id: UserId,
        member_limit: NonZeroU32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            config_id,
            channel_id,
            creator_id,
            member_limit,
            created_at: now,
            updated_at: now,
        }
    }
}

// ─────────────────────────────────────────────
// Temporary text channels
// ─────────────────────────────────────────────

/// A text channel that goes away on expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmpChannel {
    pub id: RecordId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub name: String,
    pub creator_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TmpChannel {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| now >= at)
    }
}

// ─────────────────────────────────────────────
// Countdown channels
// ─────────────────────────────────────────────

/// Placeholder substituted with the remaining day count.
pub const DAYS_PLACEHOLDER: &str = "{days}";

/// Maximum channel name length accepted by the platform.
pub const MAX_CHANNEL_NAME_LEN: usize = 100;

/// A channel whose name counts down the days to `due_date`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountDownChannel {
    pub id: RecordId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub name_pattern: String,
    pub due_date: NaiveDate,
    /// Last name pushed to the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CountDownChannel {
    /// Days from `today` until the due date (negative once passed).
    pub fn days_until(&self, today: NaiveDate) -> i64 {
        (self.due_date - today).num_days()
    }

    /// Render the channel name for a given day count.
    pub fn render(&self, days: i64) -> String {
        let days = days.max(0).to_string();
        let name = if self.name_pattern.contains(DAYS_PLACEHOLDER) {
            self.name_pattern.replace(DAYS_PLACEHOLDER, &days)
        } else {
            format!("{} {}", self.name_pattern.trim_end(), days)
        };
        truncate_chars(&name, MAX_CHANNEL_NAME_LEN)
    }
}

/// What happens to a countdown channel once it reaches zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroPolicy {
    /// Keep the channel showing zero.
    #[default]
    Persist,
    /// Delete the channel and its record.
    Delete,
}

impl FromStr for ZeroPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "persist" => Ok(ZeroPolicy::Persist),
            "delete" => Ok(ZeroPolicy::Delete),
            other => Err(format!("unknown zero policy '{other}' (expected persist|delete)")),
        }
    }
}

// ─────────────────────────────────────────────
// Recall intents
// ─────────────────────────────────────────────

/// A message that must eventually not exist on the platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallIntent {
    pub id: RecordId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    /// Not before this instant. `None` recalls on the next scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall_at: Option<DateTime<Utc>>,
    /// Failed deletion attempts so far.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl RecallIntent {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.recall_at.map_or(true, |at| now >= at)
    }
}

// ─────────────────────────────────────────────
// Expiry extensions
// ─────────────────────────────────────────────

/// Record kinds that carry an expiry and can be extended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    TmpChannel,
    RecallIntent,
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "tmpchannel" | "tmp" => Ok(TargetKind::TmpChannel),
            "recallintent" | "recall" => Ok(TargetKind::RecallIntent),
            other => Err(format!("unknown extension target '{other}'")),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::TmpChannel => "tmp-channel",
            TargetKind::RecallIntent => "recall",
        })
    }
}

/// Reference to the record an extension applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionTarget {
    pub kind: TargetKind,
    pub id: RecordId,
}

/// Unit for extension amounts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    pub fn duration(self, amount: NonZeroU32) -> Duration {
        let n = i64::from(amount.get());
        match self {
            TimeUnit::Minute => Duration::minutes(n),
            TimeUnit::Hour => Duration::hours(n),
            TimeUnit::Day => Duration::days(n),
            TimeUnit::Week => Duration::weeks(n),
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_end_matches('s') {
            "minute" | "min" | "m" => Ok(TimeUnit::Minute),
            "hour" | "h" => Ok(TimeUnit::Hour),
            "day" | "d" => Ok(TimeUnit::Day),
            "week" | "w" => Ok(TimeUnit::Week),
            other => Err(format!("unknown time unit '{other}'")),
        }
    }
}

/// Single-use request to push back a target's expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireExtendSession {
    pub id: RecordId,
    pub target: ExtensionTarget,
    pub amount: NonZeroU32,
    pub unit: TimeUnit,
    pub created_at: DateTime<Utc>,
}

impl ExpireExtendSession {
    pub fn extension(&self) -> Duration {
        self.unit.duration(self.amount)
    }
}

// ─────────────────────────────────────────────
// Guild settings
// ─────────────────────────────────────────────

/// Default voice room name when a guild has no template.
pub const DEFAULT_ROOM_NAME_TEMPLATE: &str = "{room} · {user}";

/// Per-guild settings read through the settings cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildSettings {
    pub guild_id: GuildId,
    /// Offset from UTC in minutes, used for "today" in countdowns.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Room name template with `{room}` and `{user}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name_template: Option<String>,
}

impl GuildSettings {
    pub fn room_name(&self, room: &str, user: &str) -> String {
        let template = self
            .room_name_template
            .as_deref()
            .unwrap_or(DEFAULT_ROOM_NAME_TEMPLATE);
        let name = template.replace("{room}", room).replace("{user}", user);
        truncate_chars(&name, MAX_CHANNEL_NAME_LEN)
    }
}
