//! Shared CLI helpers — argument parsing, formatting, registry and gateway setup.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use colored::Colorize;

use roomwarden_core::config::Config;
use roomwarden_core::registry::{Registry, RegistryState};
use roomwarden_core::types::TimeUnit;
use roomwarden_core::utils::registry_path;
use roomwarden_gateway::{ChannelKind, Gateway, MemoryGateway, VoiceStateCache};

// ─────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────

/// Parse a span like `90m`, `2d`, `1 week`.
pub fn parse_span(s: &str) -> Result<(NonZeroU32, TimeUnit)> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("missing unit in '{s}' (e.g. 90m, 2d)"))?;
    let (amount, unit) = s.split_at(split);
    let amount: u32 = amount
        .parse()
        .map_err(|_| anyhow!("invalid amount in '{s}'"))?;
    let amount = NonZeroU32::new(amount).ok_or_else(|| anyhow!("amount must be greater than zero"))?;
    let unit: TimeUnit = unit.trim().parse().map_err(|e: String| anyhow!(e))?;
    Ok((amount, unit))
}

/// Parse a span into a duration.
pub fn parse_span_duration(s: &str) -> Result<Duration> {
    let (amount, unit) = parse_span(s)?;
    Ok(unit.duration(amount))
}

/// Parse an instant: RFC 3339, or a local `YYYY-MM-DD[T ]HH:MM[:SS]`.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .map_err(|e| anyhow!("invalid datetime '{s}': {e} (expected e.g. 2026-03-01T09:00)"))?;
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        _ => bail!("ambiguous or invalid local time: {s}"),
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}' (expected YYYY-MM-DD)"))
}

/// Resolve `--at` / `--in` into an optional instant.
pub fn instant_from(at: Option<&str>, span: Option<&str>, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match (at, span) {
        (Some(_), Some(_)) => bail!("use either an absolute time or a span, not both"),
        (Some(at), None) => parse_datetime(at).map(Some),
        (None, Some(span)) => Ok(Some(now + parse_span_duration(span)?)),
        (None, None) => Ok(None),
    }
}

// ─────────────────────────────────────────────
// Formatting
// ─────────────────────────────────────────────

/// Format a timestamp in local time, or "—".
pub fn format_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => "—".to_string(),
    }
}

/// Format an interval as a short human-readable string.
pub fn format_interval(d: StdDuration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

pub fn ok_mark() -> String {
    "✓".green().to_string()
}

pub fn fail_mark() -> String {
    "✗".red().to_string()
}

/// Print the banner shown when the service starts.
pub fn print_banner(mode: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "Roomwarden".cyan().bold(), version.dimmed());
    println!("  Mode: {mode}");
    println!();
}

// ─────────────────────────────────────────────
// Registry and gateway setup
// ─────────────────────────────────────────────

/// Open the configured registry file.
pub async fn open_registry(config: &Config) -> Result<Registry> {
    let path = registry_path(&config.registry.path);
    Registry::open(&path)
        .await
        .with_context(|| format!("failed to open registry {}", path.display()))
}

/// A memory platform mirroring what the registry believes exists.
///
/// Rooms get one occupant so a dry run never reaps them; every other record
/// gets its channel (and recall message) so only time-driven changes show.
pub fn seed_memory_gateway(state: &RegistryState) -> MemoryGateway {
    let gw = MemoryGateway::new();

    for config in &state.room_configs {
        gw.add_channel(config.guild_id, config.lobby_channel_id, &config.name, ChannelKind::Voice);
    }
    for room in &state.room_instances {
        if let Some(config) = state.room_config(room.config_id) {
            gw.add_channel(config.guild_id, room.channel_id, &config.name, ChannelKind::Voice);
            gw.set_occupants(room.channel_id, 1);
        }
    }
    for tmp in &state.tmp_channels {
        gw.add_channel(tmp.guild_id, tmp.channel_id, &tmp.name, ChannelKind::Text);
    }
    for countdown in &state.countdowns {
        let name = countdown
            .rendered
            .clone()
            .unwrap_or_else(|| countdown.name_pattern.clone());
        gw.add_channel(countdown.guild_id, countdown.channel_id, &name, ChannelKind::Text);
    }
    for recall in &state.recalls {
        gw.add_channel(recall.guild_id, recall.channel_id, "recall", ChannelKind::Text);
        gw.add_message(recall.channel_id, recall.message_id);
    }
    gw
}

/// The platform gateway to reconcile against, plus the voice cache a
/// listener should feed (none in dry-run mode).
pub fn build_gateway(
    config: &Config,
    dry_run: bool,
    snapshot: &RegistryState,
) -> Result<(Arc<dyn Gateway>, Option<Arc<VoiceStateCache>>)> {
    if dry_run {
        return Ok((Arc::new(seed_memory_gateway(snapshot)), None));
    }
    discord_gateway(config)
}

#[cfg(feature = "discord")]
fn discord_gateway(config: &Config) -> Result<(Arc<dyn Gateway>, Option<Arc<VoiceStateCache>>)> {
    use roomwarden_core::config::get_config_path;
    use roomwarden_gateway::discord::DiscordGateway;

    if !config.discord.is_configured() {
        bail!(
            "no discord token configured (set discord.token in {} or ROOMWARDEN_DISCORD__TOKEN), or use --dry-run",
            get_config_path().display()
        );
    }
    let voice = Arc::new(VoiceStateCache::new());
    let gateway = DiscordGateway::new(&config.discord.token, &config.discord.api_base)
        .context("failed to create discord client")?
        .with_voice_cache(voice.clone());
    Ok((Arc::new(gateway), Some(voice)))
}

#[cfg(not(feature = "discord"))]
fn discord_gateway(_config: &Config) -> Result<(Arc<dyn Gateway>, Option<Arc<VoiceStateCache>>)> {
    bail!("roomwarden was built without the `discord` feature; use --dry-run")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
