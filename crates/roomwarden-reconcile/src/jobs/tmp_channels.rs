//! Temporary channel scan: expiry first, then existence.
//!
//! Pending extensions are folded into the expiry before it is compared, so
//! a channel extended past `now` survives even if its stored expiry has
//! already passed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use roomwarden_core::registry::{Mutation, RegistryState};
use roomwarden_core::types::{ExtensionTarget, RecordId, ResourceKind, TargetKind, TmpChannel};
use roomwarden_gateway::{Gateway, GatewayError};

use crate::extension::ExtensionAppliers;
use crate::scan::{Reconcile, ScanCycle, Verdict};

pub struct TmpChannelScan {
    gateway: Arc<dyn Gateway>,
    appliers: Arc<ExtensionAppliers>,
}

impl TmpChannelScan {
    pub fn new(gateway: Arc<dyn Gateway>, appliers: Arc<ExtensionAppliers>) -> Self {
        Self { gateway, appliers }
    }

    fn target(id: RecordId) -> ExtensionTarget {
        ExtensionTarget {
            kind: TargetKind::TmpChannel,
            id,
        }
    }

    /// Expiry after any pending extensions.
    fn effective_expiry(&self, record: &TmpChannel, state: &RegistryState) -> Option<DateTime<Utc>> {
        match self.appliers.pending(state, Self::target(record.id)) {
            Some(pending) => pending.expiry,
            None => record.expire_at,
        }
    }
}

#[async_trait]
impl Reconcile for TmpChannelScan {
    type Record = TmpChannel;
    type Resolved = ();

    fn kind(&self) -> ResourceKind {
        ResourceKind::TmpChannel
    }

    fn records(&self, state: &RegistryState) -> Vec<TmpChannel> {
        state.tmp_channels.clone()
    }

    fn record_id(&self, record: &TmpChannel) -> RecordId {
        record.id
    }

    fn delete(&self, record: &TmpChannel) -> Mutation {
        Mutation::DeleteTmpChannel(record.id)
    }

    fn extension_target(&self, record: &TmpChannel) -> Option<ExtensionTarget> {
        Some(Self::target(record.id))
    }

    async fn precheck(&self, record: &TmpChannel, cycle: &mut ScanCycle) -> Option<Verdict> {
        let expire_at = self.effective_expiry(record, &cycle.state)?;
        if cycle.now < expire_at {
            return None;
        }

        debug!(tmp = record.id, channel = %record.channel_id, expire_at = %expire_at, "tmp channel expired");
        if let Err(e) = self.gateway.delete_channel(record.channel_id).await {
            warn!(
                tmp = record.id,
                channel = %record.channel_id,
                error = %e,
                "failed to delete expired tmp channel"
            );
        }
        Some(Verdict::Delete)
    }

    async fn resolve(
        &self,
        record: &TmpChannel,
        cycle: &mut ScanCycle,
    ) -> Result<Option<()>, GatewayError> {
        if !cycle.guild_present(self.gateway.as_ref(), record.guild_id).await? {
            return Ok(None);
        }
        let channel = self.gateway.channel(record.guild_id, record.channel_id).await?;
        Ok(channel.map(|_| ()))
    }

    async fn policy(&self, record: &TmpChannel, _resolved: (), cycle: &mut ScanCycle) -> Verdict {
        let Some(pending) = self.appliers.pending(&cycle.state, Self::target(record.id)) else {
            return Verdict::Keep;
        };

        debug!(
            tmp = record.id,
            sessions = pending.sessions.len(),
            expire_at = ?pending.expiry,
            "applying expiry extensions"
        );
        cycle.report.extensions_applied += pending.sessions.len();
        let mutations = self.appliers.commit(&pending);
        cycle.extend(mutations);
        Verdict::Updated
    }

    fn finish(&self, cycle: &mut ScanCycle) {
        let orphans = self.appliers.orphans(&cycle.state, TargetKind::TmpChannel);
        if !orphans.is_empty() {
            debug!(count = orphans.len(), "purging extensions for missing tmp channels");
            cycle.purge_sessions(orphans);
        }
    }
}
