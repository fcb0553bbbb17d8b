//! `roomwarden run` — the long-running service.
//!
//! Startup sequence:
//! 1. Load config and the registry (a throwaway copy with `--dry-run`)
//! 2. Build the platform gateway and the settings cache
//! 3. Register every scan job on the scheduler and start it
//! 4. Spawn the trigger handler and, with a live gateway, the voice listener
//! 5. Wait for Ctrl+C, then stop everything

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing::info;

use roomwarden_core::bus::EventBus;
use roomwarden_core::config::load_config;
use roomwarden_core::{Clock, Registry, SystemClock};
use roomwarden_reconcile::{standard_jobs, JobContext, Scheduler, SettingsCache, TriggerHandler};

use crate::helpers;

/// Run the service until Ctrl+C.
pub async fn run(dry_run: bool) -> Result<()> {
    helpers::print_banner(if dry_run { "Run (dry run)" } else { "Run" });

    let config = load_config(None);
    let registry = helpers::open_registry(&config).await?;
    let snapshot = registry.snapshot().await;
    let registry = if dry_run {
        Arc::new(Registry::from_state(snapshot.clone()))
    } else {
        Arc::new(registry)
    };

    let (gateway, voice) = helpers::build_gateway(&config, dry_run, &snapshot)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = Arc::new(SettingsCache::load(registry.clone()).await);
    let bus = Arc::new(EventBus::new(config.trigger.event_buffer));

    let trigger = Arc::new(TriggerHandler::new(
        registry.clone(),
        gateway.clone(),
        settings.clone(),
        clock.clone(),
    ));

    let ctx = JobContext {
        registry: registry.clone(),
        gateway: gateway.clone(),
        settings,
        clock: clock.clone(),
    };
    let mut scheduler = Scheduler::new(clock);
    for job in standard_jobs(&config, &ctx) {
        scheduler.register(job);
    }

    info!(
        gateway = gateway.name(),
        records = snapshot.record_count(),
        jobs = ?scheduler.job_names(),
        dry_run,
        "roomwarden starting"
    );

    println!("  Gateway:   {}", gateway.name());
    println!("  Registry:  {} records", snapshot.record_count());
    for name in scheduler.job_names() {
        if let Some(interval) = scheduler.interval_of(&name) {
            println!("  {:<24} every {}", name, helpers::format_interval(interval));
        }
    }
    println!();
    println!("  Ctrl+C to stop");
    println!();

    scheduler.start().await;

    let shutdown = Arc::new(Notify::new());
    let trigger_task = tokio::spawn(trigger.run(bus.clone(), shutdown.clone()));

    #[cfg(feature = "discord")]
    let listener = voice.map(|voice| {
        use roomwarden_gateway::listener::VoiceListener;

        let listener = Arc::new(
            VoiceListener::new(config.discord.token.clone(), voice, bus.sender())
                .with_gateway_url(config.discord.gateway_url.clone()),
        );
        let task = {
            let listener = listener.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.run().await {
                    tracing::error!(error = %e, "voice listener exited");
                }
            })
        };
        (listener, task)
    });
    #[cfg(not(feature = "discord"))]
    {
        drop(voice);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }

    println!();
    println!("  Shutting down...");
    info!("received Ctrl+C, shutting down");

    #[cfg(feature = "discord")]
    {
        if let Some((listener, task)) = listener {
            listener.stop();
            let _ = task.await;
        }
    }
    shutdown.notify_one();
    let _ = trigger_task.await;
    scheduler.stop().await;

    println!("  Stopped.");
    Ok(())
}
