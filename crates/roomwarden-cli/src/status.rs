//! `roomwarden status` — show configuration and registry status.

use anyhow::Result;
use colored::Colorize;

use roomwarden_core::config::{get_config_path, load_config, ScanConfig};
use roomwarden_core::types::ZeroPolicy;
use roomwarden_core::utils::registry_path;
use roomwarden_core::RegistryState;
use roomwarden_reconcile::types::{
    COUNTDOWN_SCAN, RECALL_SCAN, ROOM_INSTANCE_SCAN, SETTINGS_REFRESH, TMP_CHANNEL_SCAN,
};

use crate::helpers::{self, format_interval};

/// Run the status command.
pub async fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "Roomwarden Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found, run `roomwarden init`)".red().to_string()
        }
    );

    let registry_file = registry_path(&config.registry.path);
    println!(
        "  {:<18} {} {}",
        "Registry:".bold(),
        registry_file.display(),
        if registry_file.exists() {
            "✓".green().to_string()
        } else {
            "(empty)".dimmed().to_string()
        }
    );

    let discord = if config.discord.is_configured() {
        format!("{} (token set)", "✓".green())
    } else {
        format!("{}", "· not configured".dimmed())
    };
    println!("  {:<18} {}", "Discord:".bold(), discord);
    if config.discord.is_configured() && !config.discord.application_id.is_empty() {
        println!(
            "  {:<18} {}",
            "Invite:".bold(),
            invite_url(&config.discord.application_id).dimmed()
        );
    }

    let at_zero = match config.countdown.at_zero {
        ZeroPolicy::Persist => "persist",
        ZeroPolicy::Delete => "delete",
    };
    println!("  {:<18} {}", "Countdown at 0:".bold(), at_zero);

    println!();
    println!("  {}", "Scan intervals:".bold());
    let scan = &config.scan;
    for (name, secs) in [
        (ROOM_INSTANCE_SCAN, scan.room_instance_secs),
        (TMP_CHANNEL_SCAN, scan.tmp_channel_secs),
        (COUNTDOWN_SCAN, scan.countdown_secs),
        (RECALL_SCAN, scan.recall_secs),
        (SETTINGS_REFRESH, scan.settings_secs),
    ] {
        println!("    {:<22} every {}", name, format_interval(ScanConfig::interval(secs)));
    }

    println!();
    println!("  {}", "Records:".bold());
    match helpers::open_registry(&config).await {
        Ok(registry) => {
            for (label, count) in record_counts(&registry.snapshot().await) {
                println!("    {:<22} {}", label, count);
            }
        }
        Err(e) => println!("    {} {:#}", "✗".red(), e),
    }

    println!();
    Ok(())
}

fn record_counts(state: &RegistryState) -> [(&'static str, usize); 7] {
    [
        ("Room configs", state.room_configs.len()),
        ("Live rooms", state.room_instances.len()),
        ("Temp channels", state.tmp_channels.len()),
        ("Countdowns", state.countdowns.len()),
        ("Recalls", state.recalls.len()),
        ("Pending extensions", state.extensions.len()),
        ("Guild settings", state.guild_settings.len()),
    ]
}

/// Bot invite link with the permissions the service needs.
fn invite_url(application_id: &str) -> String {
    // MANAGE_CHANNELS | VIEW_CHANNEL | MANAGE_MESSAGES | CONNECT | MOVE_MEMBERS
    const PERMISSIONS: u64 = (1 << 4) | (1 << 10) | (1 << 13) | (1 << 20) | (1 << 24);
    format!(
        "https://discord.com/oauth2/authorize?client_id={application_id}&scope=bot&permissions={PERMISSIONS}"
    )
}
