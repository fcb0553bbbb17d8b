//! Recall scan: delete scheduled messages once they are due.
//!
//! An intent leaves the registry only after the platform confirmed the
//! message is gone. A failed delete bumps `attempts` and is retried on the
//! next cycle.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use roomwarden_core::registry::{Mutation, RegistryState};
use roomwarden_core::types::{ExtensionTarget, RecallIntent, RecordId, ResourceKind, TargetKind};
use roomwarden_gateway::{Gateway, GatewayError};

use crate::extension::{ExtensionAppliers, PendingExtension};
use crate::scan::{Reconcile, ScanCycle, Verdict};

pub struct RecallScan {
    gateway: Arc<dyn Gateway>,
    appliers: Arc<ExtensionAppliers>,
}

impl RecallScan {
    pub fn new(gateway: Arc<dyn Gateway>, appliers: Arc<ExtensionAppliers>) -> Self {
        Self { gateway, appliers }
    }

    fn target(id: RecordId) -> ExtensionTarget {
        ExtensionTarget {
            kind: TargetKind::RecallIntent,
            id,
        }
    }

    fn apply_pending(&self, pending: &PendingExtension, cycle: &mut ScanCycle) {
        cycle.report.extensions_applied += pending.sessions.len();
        let mutations = self.appliers.commit(pending);
        cycle.extend(mutations);
    }
}

/// Already-deleted messages count as deleted.
fn is_unknown_message(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Http { status: 404, .. })
}

#[async_trait]
impl Reconcile for RecallScan {
    type Record = RecallIntent;
    type Resolved = ();

    fn kind(&self) -> ResourceKind {
        ResourceKind::RecallIntent
    }

    fn records(&self, state: &RegistryState) -> Vec<RecallIntent> {
        state.recalls.clone()
    }

    fn record_id(&self, record: &RecallIntent) -> RecordId {
        record.id
    }

    fn delete(&self, record: &RecallIntent) -> Mutation {
        Mutation::DeleteRecall(record.id)
    }

    fn extension_target(&self, record: &RecallIntent) -> Option<ExtensionTarget> {
        Some(Self::target(record.id))
    }

    async fn precheck(&self, record: &RecallIntent, cycle: &mut ScanCycle) -> Option<Verdict> {
        let pending = self.appliers.pending(&cycle.state, Self::target(record.id));
        let recall_at = match &pending {
            Some(p) => p.expiry,
            None => record.recall_at,
        };

        match recall_at {
            Some(at) if cycle.now < at => {
                if let Some(pending) = &pending {
                    debug!(recall = record.id, recall_at = %at, "recall postponed");
                    self.apply_pending(pending, cycle);
                }
                Some(Verdict::Skipped)
            }
            _ => None,
        }
    }

    async fn resolve(
        &self,
        record: &RecallIntent,
        cycle: &mut ScanCycle,
    ) -> Result<Option<()>, GatewayError> {
        if !cycle.guild_present(self.gateway.as_ref(), record.guild_id).await? {
            return Ok(None);
        }
        let channel = self.gateway.channel(record.guild_id, record.channel_id).await?;
        Ok(channel.map(|_| ()))
    }

    async fn policy(&self, record: &RecallIntent, _resolved: (), cycle: &mut ScanCycle) -> Verdict {
        match self
            .gateway
            .delete_message(record.channel_id, record.message_id)
            .await
        {
            Ok(()) => Verdict::Delete,
            Err(e) if is_unknown_message(&e) => {
                debug!(recall = record.id, message = %record.message_id, "message already gone");
                Verdict::Delete
            }
            Err(e) => {
                warn!(
                    recall = record.id,
                    message = %record.message_id,
                    attempts = record.attempts + 1,
                    error = %e,
                    "message delete failed, will retry"
                );
                cycle.push(Mutation::RecordRecallFailure(record.id));
                if let Some(pending) = self.appliers.pending(&cycle.state, Self::target(record.id)) {
                    self.apply_pending(&pending, cycle);
                }
                Verdict::Failed
            }
        }
    }

    fn finish(&self, cycle: &mut ScanCycle) {
        let orphans = self.appliers.orphans(&cycle.state, TargetKind::RecallIntent);
        if !orphans.is_empty() {
            debug!(count = orphans.len(), "purging extensions for missing recalls");
            cycle.purge_sessions(orphans);
        }
    }
}
