//! Built-in scan jobs, one per resource kind.

pub mod countdown;
pub mod recall;
pub mod rooms;
pub mod tmp_channels;

use std::sync::Arc;

use roomwarden_core::config::{Config, ScanConfig};
use roomwarden_core::registry::Registry;
use roomwarden_core::Clock;
use roomwarden_gateway::Gateway;

use crate::extension::ExtensionAppliers;
use crate::scan::ReconcileJob;
use crate::scheduler::ScanJob;
use crate::settings::{SettingsCache, SettingsRefreshJob};
use crate::types::{COUNTDOWN_SCAN, RECALL_SCAN, ROOM_INSTANCE_SCAN, TMP_CHANNEL_SCAN};

pub use countdown::CountdownScan;
pub use recall::RecallScan;
pub use rooms::{RoomInstanceScan, RoomRecord};
pub use tmp_channels::TmpChannelScan;

/// Shared collaborators for building jobs.
#[derive(Clone)]
pub struct JobContext {
    pub registry: Arc<Registry>,
    pub gateway: Arc<dyn Gateway>,
    pub settings: Arc<SettingsCache>,
    pub clock: Arc<dyn Clock>,
}

/// Every scan job plus the settings refresh, with intervals from `config`.
pub fn standard_jobs(config: &Config, ctx: &JobContext) -> Vec<Arc<dyn ScanJob>> {
    let scan = &config.scan;
    let appliers = Arc::new(ExtensionAppliers::standard());

    vec![
        Arc::new(ReconcileJob::new(
            ROOM_INSTANCE_SCAN,
            ScanConfig::interval(scan.room_instance_secs),
            RoomInstanceScan::new(ctx.gateway.clone()),
            ctx.registry.clone(),
            ctx.clock.clone(),
        )),
        Arc::new(ReconcileJob::new(
            TMP_CHANNEL_SCAN,
            ScanConfig::interval(scan.tmp_channel_secs),
            TmpChannelScan::new(ctx.gateway.clone(), appliers.clone()),
            ctx.registry.clone(),
            ctx.clock.clone(),
        )),
        Arc::new(ReconcileJob::new(
            COUNTDOWN_SCAN,
            ScanConfig::interval(scan.countdown_secs),
            CountdownScan::new(ctx.gateway.clone(), ctx.settings.clone(), config.countdown.at_zero),
            ctx.registry.clone(),
            ctx.clock.clone(),
        )),
        Arc::new(ReconcileJob::new(
            RECALL_SCAN,
            ScanConfig::interval(scan.recall_secs),
            RecallScan::new(ctx.gateway.clone(), appliers),
            ctx.registry.clone(),
            ctx.clock.clone(),
        )),
        Arc::new(SettingsRefreshJob::new(
            ctx.settings.clone(),
            ScanConfig::interval(scan.settings_secs),
        )),
    ]
}
