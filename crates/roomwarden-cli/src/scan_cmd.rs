//! `roomwarden scan <job>` — one immediate reconcile pass.
//!
//! The pass goes through the scheduler's failure boundary, so a failed or
//! panicking job is reported rather than aborting the command.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use colored::Colorize;

use roomwarden_core::config::{load_config, Config};
use roomwarden_core::{Clock, Registry, SystemClock};
use roomwarden_gateway::Gateway;
use roomwarden_reconcile::types::{resolve_job_name, ROOM_INSTANCE_SCAN};
use roomwarden_reconcile::{standard_jobs, JobContext, JobState, JobStatus, Scheduler, SettingsCache};

use crate::helpers::{self, fail_mark, format_time, ok_mark};

/// Run the scan command.
pub async fn run(alias: &str, dry_run: bool, json: bool) -> Result<()> {
    let job = resolve_job_name(alias).ok_or_else(|| {
        anyhow!("unknown job '{alias}' (expected rooms, tmp, countdown, recall or settings)")
    })?;

    let config = load_config(None);
    let registry = helpers::open_registry(&config).await?;
    let snapshot = registry.snapshot().await;
    let registry = if dry_run {
        Arc::new(Registry::from_state(snapshot.clone()))
    } else {
        Arc::new(registry)
    };
    let (gateway, _voice) = helpers::build_gateway(&config, dry_run, &snapshot)?;

    if job == ROOM_INSTANCE_SCAN && !dry_run {
        println!(
            "  {}",
            "Occupancy comes from the voice listener; outside `roomwarden run` rooms are left as is."
                .dimmed()
        );
    }

    let state = scan_once(&config, registry, gateway, Arc::new(SystemClock), job).await?;

    if json {
        let out = serde_json::to_string_pretty(&state).context("failed to serialize job state")?;
        println!("{out}");
        return Ok(());
    }
    print_state(job, &state, dry_run);
    Ok(())
}

/// Build the standard jobs and run `job` once.
async fn scan_once(
    config: &Config,
    registry: Arc<Registry>,
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
    job: &str,
) -> Result<JobState> {
    let settings = Arc::new(SettingsCache::load(registry.clone()).await);
    let ctx = JobContext {
        registry,
        gateway,
        settings,
        clock: clock.clone(),
    };
    let mut scheduler = Scheduler::new(clock);
    for scan in standard_jobs(config, &ctx) {
        scheduler.register(scan);
    }
    Ok(scheduler.run_now(job).await?)
}

fn print_state(job: &str, state: &JobState, dry_run: bool) {
    let suffix = if dry_run { " (dry run)" } else { "" };
    match state.last_status {
        Some(JobStatus::Ok) => {
            println!("  {} {}{}", ok_mark(), job.cyan(), suffix);
            if let Some(report) = &state.last_report {
                println!("    {report}");
                if report.is_noop() {
                    println!("    {}", "nothing to change".dimmed());
                }
            }
        }
        Some(JobStatus::Skipped) => {
            println!("  {} {} skipped (already running){}", "·".dimmed(), job.cyan(), suffix);
        }
        Some(JobStatus::Error) | None => {
            println!(
                "  {} {} failed{}: {}",
                fail_mark(),
                job.cyan(),
                suffix,
                state.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!("    {}", format!("finished {}", format_time(state.last_run_at)).dimmed());
}
