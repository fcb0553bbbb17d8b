//! `roomwarden rooms` and `roomwarden guild` — voice room configs and guild settings.
//!
//! - `roomwarden rooms list` — list room configs
//! - `roomwarden rooms add --name NAME --guild ID --lobby ID [--bitrate N] [--limit N] [--category ID]`
//! - `roomwarden rooms enable <ID>` / `roomwarden rooms disable <ID>`
//! - `roomwarden guild set <GUILD> [--utc-offset MIN] [--template TPL | --clear-template]`
//! - `roomwarden guild list`

use std::num::NonZeroU32;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;

use roomwarden_core::config::load_config;
use roomwarden_core::ids::{ChannelId, GuildId};
use roomwarden_core::types::{GuildSettings, RecordId, RoomConfig};
use roomwarden_core::utils::truncate_chars;
use roomwarden_core::{Mutation, Registry, RegistryError};

use crate::helpers::{self, fail_mark, ok_mark};

/// Platform bitrate bounds for voice channels (bits per second).
const MIN_BITRATE: u32 = 8_000;
const MAX_BITRATE: u32 = 384_000;

/// Platform cap on voice channel members.
const MAX_MEMBER_LIMIT: u32 = 99;

/// Widest real-world UTC offsets, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

// ─────────────────────────────────────────────
// Subcommand enums
// ─────────────────────────────────────────────

#[derive(Subcommand)]
pub enum RoomsCommands {
    /// List room configs
    List,

    /// Add a room config
    Add {
        /// Display name used in created rooms
        #[arg(short, long)]
        name: String,

        /// Guild id
        #[arg(short, long)]
        guild: GuildId,

        /// Lobby voice channel id; joining it creates a room
        #[arg(short, long)]
        lobby: ChannelId,

        /// Voice bitrate in bits per second
        #[arg(long, default_value_t = 64_000)]
        bitrate: u32,

        /// Member limit of created rooms
        #[arg(long, default_value_t = 4)]
        limit: u32,

        /// Category to create rooms under
        #[arg(long)]
        category: Option<ChannelId>,
    },

    /// Enable a room config
    Enable {
        /// Room config id
        id: RecordId,
    },

    /// Disable a room config (living rooms stay until empty)
    Disable {
        /// Room config id
        id: RecordId,
    },
}

#[derive(Subcommand)]
pub enum GuildCommands {
    /// List guild settings
    List,

    /// Create or update a guild's settings
    Set {
        /// Guild id
        guild: GuildId,

        /// Offset from UTC in minutes (e.g. 60, -300)
        #[arg(long, allow_hyphen_values = true)]
        utc_offset: Option<i32>,

        /// Room name template with {room} and {user} placeholders
        #[arg(long, conflicts_with = "clear_template")]
        template: Option<String>,

        /// Go back to the default room name template
        #[arg(long, default_value_t = false)]
        clear_template: bool,
    },
}

// ─────────────────────────────────────────────
// Dispatchers
// ─────────────────────────────────────────────

pub async fn dispatch_rooms(cmd: RoomsCommands) -> Result<()> {
    let config = load_config(None);
    let registry = helpers::open_registry(&config).await?;

    match cmd {
        RoomsCommands::List => list_rooms(&registry).await,
        RoomsCommands::Add {
            name,
            guild,
            lobby,
            bitrate,
            limit,
            category,
        } => {
            let room = new_room_config(name, guild, lobby, bitrate, limit, category)?;
            let id = add_room(&registry, room).await?;
            println!("  {} Added room config {}", ok_mark(), id.to_string().cyan());
            Ok(())
        }
        RoomsCommands::Enable { id } => set_enabled(&registry, id, true).await,
        RoomsCommands::Disable { id } => set_enabled(&registry, id, false).await,
    }
}

pub async fn dispatch_guild(cmd: GuildCommands) -> Result<()> {
    let config = load_config(None);
    let registry = helpers::open_registry(&config).await?;

    match cmd {
        GuildCommands::List => list_guilds(&registry).await,
        GuildCommands::Set {
            guild,
            utc_offset,
            template,
            clear_template,
        } => {
            let settings = set_guild(&registry, guild, utc_offset, template, clear_template).await?;
            println!(
                "  {} Guild {} (utc offset {}m, template {})",
                ok_mark(),
                guild.to_string().cyan(),
                settings.utc_offset_minutes,
                settings.room_name_template.as_deref().unwrap_or("default")
            );
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────
// Room configs
// ─────────────────────────────────────────────

fn new_room_config(
    name: String,
    guild_id: GuildId,
    lobby_channel_id: ChannelId,
    bitrate: u32,
    limit: u32,
    category_id: Option<ChannelId>,
) -> Result<RoomConfig> {
    if name.trim().is_empty() {
        bail!("room name must not be empty");
    }
    if !(MIN_BITRATE..=MAX_BITRATE).contains(&bitrate) {
        bail!("bitrate must be between {MIN_BITRATE} and {MAX_BITRATE}");
    }
    let member_limit = NonZeroU32::new(limit)
        .filter(|l| l.get() <= MAX_MEMBER_LIMIT)
        .ok_or_else(|| anyhow!("member limit must be between 1 and {MAX_MEMBER_LIMIT}"))?;

    Ok(RoomConfig {
        id: 0,
        name: name.trim().to_string(),
        guild_id,
        lobby_channel_id,
        bitrate,
        member_limit,
        category_id,
        enabled: true,
        created_at: Utc::now(),
    })
}

async fn add_room(registry: &Registry, room: RoomConfig) -> Result<RecordId> {
    let ids = registry
        .commit(Mutation::InsertRoomConfig(room).into())
        .await
        .context("failed to add room config")?;
    ids.first()
        .copied()
        .ok_or_else(|| anyhow!("registry assigned no id"))
}

/// Returns whether the config existed.
async fn toggle_room(registry: &Registry, id: RecordId, enabled: bool) -> Result<bool> {
    match registry
        .commit(Mutation::SetRoomConfigEnabled { id, enabled }.into())
        .await
    {
        Ok(_) => Ok(true),
        Err(RegistryError::UnknownRoomConfig(_)) => Ok(false),
        Err(e) => Err(e).context("failed to update room config"),
    }
}

async fn set_enabled(registry: &Registry, id: RecordId, enabled: bool) -> Result<()> {
    if toggle_room(registry, id, enabled).await? {
        let label = if enabled { "Enabled" } else { "Disabled" };
        println!("  {} {} room config {}", ok_mark(), label, id.to_string().cyan());
    } else {
        println!("  {} Room config {} not found", fail_mark(), id);
    }
    Ok(())
}

async fn list_rooms(registry: &Registry) -> Result<()> {
    let state = registry.snapshot().await;
    if state.room_configs.is_empty() {
        println!("  No room configs. Add one with `roomwarden rooms add`.");
        return Ok(());
    }

    println!();
    println!("{}", "  Room Configs".cyan().bold());
    println!();
    println!(
        "  {:<6} {:<20} {:<20} {:<20} {:<6} {:<10} {}",
        "ID".bold(),
        "Name".bold(),
        "Guild".bold(),
        "Lobby".bold(),
        "Limit".bold(),
        "Status".bold(),
        "Live".bold(),
    );
    println!("  {}", "─".repeat(96));

    for room in &state.room_configs {
        let live = state
            .room_instances
            .iter()
            .filter(|r| r.config_id == room.id)
            .count();
        let status = if room.enabled {
            "enabled".green().to_string()
        } else {
            "disabled".dimmed().to_string()
        };
        println!(
            "  {:<6} {:<20} {:<20} {:<20} {:<6} {:<10} {}",
            room.id,
            truncate_chars(&room.name, 20),
            room.guild_id,
            room.lobby_channel_id,
            room.member_limit,
            status,
            live
        );
    }

    println!();
    Ok(())
}

// ─────────────────────────────────────────────
// Guild settings
// ─────────────────────────────────────────────

async fn set_guild(
    registry: &Registry,
    guild_id: GuildId,
    utc_offset: Option<i32>,
    template: Option<String>,
    clear_template: bool,
) -> Result<GuildSettings> {
    let mut settings = registry
        .snapshot()
        .await
        .guild_settings(guild_id)
        .cloned()
        .unwrap_or(GuildSettings {
            guild_id,
            ..GuildSettings::default()
        });

    if let Some(offset) = utc_offset {
        if offset.abs() > MAX_UTC_OFFSET_MINUTES {
            bail!("utc offset must be within ±{MAX_UTC_OFFSET_MINUTES} minutes");
        }
        settings.utc_offset_minutes = offset;
    }
    if clear_template {
        settings.room_name_template = None;
    } else if let Some(template) = template {
        if template.trim().is_empty() {
            bail!("template must not be empty (use --clear-template for the default)");
        }
        settings.room_name_template = Some(template);
    }

    registry
        .commit(Mutation::UpsertGuildSettings(settings.clone()).into())
        .await
        .context("failed to save guild settings")?;
    Ok(settings)
}

async fn list_guilds(registry: &Registry) -> Result<()> {
    let state = registry.snapshot().await;
    if state.guild_settings.is_empty() {
        println!("  No guild settings. Guilds use UTC and the default room name.");
        return Ok(());
    }

    println!();
    println!("{}", "  Guild Settings".cyan().bold());
    println!();
    println!(
        "  {:<20} {:<12} {}",
        "Guild".bold(),
        "UTC offset".bold(),
        "Room name template".bold(),
    );
    println!("  {}", "─".repeat(60));

    for settings in &state.guild_settings {
        println!(
            "  {:<20} {:<12} {}",
            settings.guild_id,
            format!("{}m", settings.utc_offset_minutes),
            settings
                .room_name_template
                .as_deref()
                .unwrap_or("—")
        );
    }

    println!();
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lounge() -> RoomConfig {
        new_room_config("  Lounge ".into(), GuildId(1), ChannelId(10), 64_000, 4, None).unwrap()
    }

    #[test]
    fn test_new_room_config_validates() {
        assert_eq!(lounge().name, "Lounge");
        assert!(new_room_config(" ".into(), GuildId(1), ChannelId(10), 64_000, 4, None).is_err());
        assert!(new_room_config("x".into(), GuildId(1), ChannelId(10), 1_000, 4, None).is_err());
        assert!(new_room_config("x".into(), GuildId(1), ChannelId(10), 64_000, 0, None).is_err());
        assert!(new_room_config("x".into(), GuildId(1), ChannelId(10), 64_000, 100, None).is_err());
    }

    #[tokio::test]
    async fn test_add_and_toggle_room() {
        let registry = Registry::in_memory();
        let id = add_room(&registry, lounge()).await.unwrap();
        assert_eq!(id, 1);

        assert!(toggle_room(&registry, id, false).await.unwrap());
        assert!(!registry.snapshot().await.room_configs[0].enabled);
        assert!(!toggle_room(&registry, 99, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_guild_merges_existing() {
        let registry = Registry::in_memory();
        set_guild(&registry, GuildId(5), Some(120), Some("{user}'s den".into()), false)
            .await
            .unwrap();
        let settings = set_guild(&registry, GuildId(5), Some(-300), None, false)
            .await
            .unwrap();
        assert_eq!(settings.utc_offset_minutes, -300);
        assert_eq!(settings.room_name_template.as_deref(), Some("{user}'s den"));

        let cleared = set_guild(&registry, GuildId(5), None, None, true).await.unwrap();
        assert!(cleared.room_name_template.is_none());
        assert_eq!(registry.snapshot().await.guild_settings.len(), 1);
    }

    #[tokio::test]
    async fn test_set_guild_rejects_bad_offset() {
        let registry = Registry::in_memory();
        assert!(set_guild(&registry, GuildId(5), Some(15 * 60), None, false).await.is_err());
        assert!(registry.snapshot().await.guild_settings.is_empty());
    }
}
