//! `roomwarden tmp|countdown|recall|extend` — time-driven registry records.
//!
//! - `roomwarden tmp add --guild ID --channel ID --name NAME --creator ID [--at TIME | --in SPAN]`
//! - `roomwarden countdown add --guild ID --channel ID --pattern PATTERN --due YYYY-MM-DD`
//! - `roomwarden recall add --guild ID --channel ID --message ID [--at TIME | --in SPAN]`
//! - `roomwarden <kind> list`
//! - `roomwarden extend <tmp|recall> <ID> <AMOUNT> <UNIT>`
//!
//! Records are picked up by the next scan of their kind.

use std::num::NonZeroU32;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Subcommand;
use colored::Colorize;

use roomwarden_core::config::load_config;
use roomwarden_core::ids::{ChannelId, GuildId, MessageId, UserId};
use roomwarden_core::types::{
    CountDownChannel, ExpireExtendSession, ExtensionTarget, RecallIntent, RecordId, TargetKind,
    TimeUnit, TmpChannel,
};
use roomwarden_core::utils::truncate_chars;
use roomwarden_core::{Mutation, Registry, RegistryState};

use crate::helpers::{self, format_time, ok_mark};

// ─────────────────────────────────────────────
// Subcommand enums
// ─────────────────────────────────────────────

#[derive(Subcommand)]
pub enum TmpCommands {
    /// List temporary channels
    List,

    /// Track an existing text channel as temporary
    Add {
        #[arg(short, long)]
        guild: GuildId,

        #[arg(short, long)]
        channel: ChannelId,

        /// Channel name as created
        #[arg(short, long)]
        name: String,

        /// Member who owns the channel
        #[arg(long)]
        creator: UserId,

        /// Expire at a specific time (e.g. "2026-03-01T09:00")
        #[arg(long)]
        at: Option<String>,

        /// Expire after a span from now (e.g. "2d", "90m")
        #[arg(long = "in")]
        span: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CountdownCommands {
    /// List countdown channels
    List,

    /// Track a channel whose name counts down to a date
    Add {
        #[arg(short, long)]
        guild: GuildId,

        #[arg(short, long)]
        channel: ChannelId,

        /// Name pattern; `{days}` is replaced with the days left
        #[arg(short, long)]
        pattern: String,

        /// Due date (YYYY-MM-DD)
        #[arg(short, long)]
        due: String,
    },
}

#[derive(Subcommand)]
pub enum RecallCommands {
    /// List pending recalls
    List,

    /// Schedule a message for deletion
    Add {
        #[arg(short, long)]
        guild: GuildId,

        #[arg(short, long)]
        channel: ChannelId,

        #[arg(short, long)]
        message: MessageId,

        /// Recall at a specific time; omit both for the next scan
        #[arg(long)]
        at: Option<String>,

        /// Recall after a span from now
        #[arg(long = "in")]
        span: Option<String>,
    },
}

// ─────────────────────────────────────────────
// Dispatchers
// ─────────────────────────────────────────────

async fn registry() -> Result<Registry> {
    let config = load_config(None);
    helpers::open_registry(&config).await
}

pub async fn dispatch_tmp(cmd: TmpCommands) -> Result<()> {
    let registry = registry().await?;
    match cmd {
        TmpCommands::List => {
            list_tmp(&registry.snapshot().await);
            Ok(())
        }
        TmpCommands::Add {
            guild,
            channel,
            name,
            creator,
            at,
            span,
        } => {
            let now = Utc::now();
            let expire_at = helpers::instant_from(at.as_deref(), span.as_deref(), now)?;
            let tmp = new_tmp_channel(guild, channel, name, creator, expire_at, now)?;
            let id = insert(&registry, Mutation::InsertTmpChannel(tmp)).await?;
            println!(
                "  {} Added temp channel {} (expires {})",
                ok_mark(),
                id.to_string().cyan(),
                format_time(expire_at)
            );
            Ok(())
        }
    }
}

pub async fn dispatch_countdown(cmd: CountdownCommands) -> Result<()> {
    let registry = registry().await?;
    match cmd {
        CountdownCommands::List => {
            list_countdowns(&registry.snapshot().await);
            Ok(())
        }
        CountdownCommands::Add {
            guild,
            channel,
            pattern,
            due,
        } => {
            let due = helpers::parse_date(&due)?;
            let countdown = new_countdown(guild, channel, pattern, due, Utc::now())?;
            let preview = countdown.render(countdown.days_until(Utc::now().date_naive()));
            let id = insert(&registry, Mutation::InsertCountDown(countdown)).await?;
            println!(
                "  {} Added countdown {} (\"{}\")",
                ok_mark(),
                id.to_string().cyan(),
                preview
            );
            Ok(())
        }
    }
}

pub async fn dispatch_recall(cmd: RecallCommands) -> Result<()> {
    let registry = registry().await?;
    match cmd {
        RecallCommands::List => {
            list_recalls(&registry.snapshot().await);
            Ok(())
        }
        RecallCommands::Add {
            guild,
            channel,
            message,
            at,
            span,
        } => {
            let now = Utc::now();
            let recall_at = helpers::instant_from(at.as_deref(), span.as_deref(), now)?;
            let recall = RecallIntent {
                id: 0,
                guild_id: guild,
                channel_id: channel,
                message_id: message,
                recall_at,
                attempts: 0,
                created_at: now,
            };
            let id = insert(&registry, Mutation::InsertRecall(recall)).await?;
            let when = match recall_at {
                Some(at) => format_time(Some(at)),
                None => "next scan".to_string(),
            };
            println!("  {} Added recall {} ({})", ok_mark(), id.to_string().cyan(), when);
            Ok(())
        }
    }
}

/// `roomwarden extend <kind> <id> <amount> <unit>`
pub async fn extend(kind: &str, id: RecordId, amount: u32, unit: &str) -> Result<()> {
    let registry = registry().await?;
    let session = new_extension(&registry.snapshot().await, kind, id, amount, unit, Utc::now())?;
    let target = session.target;
    let by = session.extension();
    let session_id = insert(&registry, Mutation::InsertExtension(session)).await?;
    println!(
        "  {} Queued extension {} for {} {} (+{}m, applied at the next scan)",
        ok_mark(),
        session_id.to_string().cyan(),
        target.kind,
        target.id,
        by.num_minutes()
    );
    Ok(())
}

// ─────────────────────────────────────────────
// Record builders
// ─────────────────────────────────────────────

async fn insert(registry: &Registry, mutation: Mutation) -> Result<RecordId> {
    let label = mutation.label();
    let ids = registry
        .commit(mutation.into())
        .await
        .with_context(|| format!("registry commit failed ({label})"))?;
    ids.first()
        .copied()
        .ok_or_else(|| anyhow!("registry assigned no id"))
}

fn new_tmp_channel(
    guild_id: GuildId,
    channel_id: ChannelId,
    name: String,
    creator_id: UserId,
    expire_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<TmpChannel> {
    if name.trim().is_empty() {
        bail!("channel name must not be empty");
    }
    if expire_at.is_some_and(|at| at <= now) {
        bail!("expiry must be in the future");
    }
    Ok(TmpChannel {
        id: 0,
        guild_id,
        channel_id,
        name: name.trim().to_string(),
        creator_id,
        expire_at,
        created_at: now,
    })
}

fn new_countdown(
    guild_id: GuildId,
    channel_id: ChannelId,
    pattern: String,
    due_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<CountDownChannel> {
    if pattern.trim().is_empty() {
        bail!("name pattern must not be empty");
    }
    Ok(CountDownChannel {
        id: 0,
        guild_id,
        channel_id,
        name_pattern: pattern,
        due_date,
        rendered: None,
        created_at: now,
    })
}

/// Validate an extension request against the current registry.
fn new_extension(
    state: &RegistryState,
    kind: &str,
    id: RecordId,
    amount: u32,
    unit: &str,
    now: DateTime<Utc>,
) -> Result<ExpireExtendSession> {
    let kind: TargetKind = kind.parse().map_err(|e: String| anyhow!(e))?;
    let unit: TimeUnit = unit.parse().map_err(|e: String| anyhow!(e))?;
    let amount = NonZeroU32::new(amount).ok_or_else(|| anyhow!("amount must be greater than zero"))?;

    let exists = match kind {
        TargetKind::TmpChannel => state.tmp_channel(id).is_some(),
        TargetKind::RecallIntent => state.recall(id).is_some(),
    };
    if !exists {
        bail!("no {kind} with id {id}");
    }

    Ok(ExpireExtendSession {
        id: 0,
        target: ExtensionTarget { kind, id },
        amount,
        unit,
        created_at: now,
    })
}

// ─────────────────────────────────────────────
// Listings
// ─────────────────────────────────────────────

fn pending_extensions(state: &RegistryState, kind: TargetKind, id: RecordId) -> usize {
    state.extensions_for(ExtensionTarget { kind, id }).len()
}

fn list_tmp(state: &RegistryState) {
    if state.tmp_channels.is_empty() {
        println!("  No temporary channels.");
        return;
    }

    println!();
    println!("{}", "  Temporary Channels".cyan().bold());
    println!();
    println!(
        "  {:<6} {:<20} {:<20} {:<18} {}",
        "ID".bold(),
        "Name".bold(),
        "Channel".bold(),
        "Expires".bold(),
        "Pending".bold(),
    );
    println!("  {}", "─".repeat(76));

    for tmp in &state.tmp_channels {
        println!(
            "  {:<6} {:<20} {:<20} {:<18} {}",
            tmp.id,
            truncate_chars(&tmp.name, 20),
            tmp.channel_id,
            format_time(tmp.expire_at),
            pending_extensions(state, TargetKind::TmpChannel, tmp.id)
        );
    }
    println!();
}

fn list_countdowns(state: &RegistryState) {
    if state.countdowns.is_empty() {
        println!("  No countdown channels.");
        return;
    }

    println!();
    println!("{}", "  Countdown Channels".cyan().bold());
    println!();
    println!(
        "  {:<6} {:<20} {:<12} {}",
        "ID".bold(),
        "Channel".bold(),
        "Due".bold(),
        "Name".bold(),
    );
    println!("  {}", "─".repeat(76));

    for countdown in &state.countdowns {
        let name = countdown
            .rendered
            .clone()
            .unwrap_or_else(|| format!("{} {}", countdown.name_pattern, "(not rendered)".dimmed()));
        println!(
            "  {:<6} {:<20} {:<12} {}",
            countdown.id,
            countdown.channel_id,
            countdown.due_date.format("%Y-%m-%d").to_string(),
            name
        );
    }
    println!();
}

fn list_recalls(state: &RegistryState) {
    if state.recalls.is_empty() {
        println!("  No pending recalls.");
        return;
    }

    println!();
    println!("{}", "  Pending Recalls".cyan().bold());
    println!();
    println!(
        "  {:<6} {:<20} {:<20} {:<18} {:<9} {}",
        "ID".bold(),
        "Channel".bold(),
        "Message".bold(),
        "Recall at".bold(),
        "Attempts".bold(),
        "Pending".bold(),
    );
    println!("  {}", "─".repeat(84));

    for recall in &state.recalls {
        let attempts = if recall.attempts > 0 {
            recall.attempts.to_string().yellow().to_string()
        } else {
            "0".to_string()
        };
        println!(
            "  {:<6} {:<20} {:<20} {:<18} {:<9} {}",
            recall.id,
            recall.channel_id,
            recall.message_id,
            format_time(recall.recall_at),
            attempts,
            pending_extensions(state, TargetKind::RecallIntent, recall.id)
        );
    }
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
