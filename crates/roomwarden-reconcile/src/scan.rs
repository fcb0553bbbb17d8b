//! Scan-and-reconcile framework.
//!
//! One generic driver, `run_scan`, walks every registry record of a kind:
//! 1. `precheck` may decide without touching the platform (expiry, not due)
//! 2. `resolve` looks up the external counterpart; `Ok(None)` means gone
//! 3. `policy` applies the kind's rules to a live record
//!
//! Every decision lands in one `Changeset` committed at the end of the
//! cycle. A platform error on one record leaves that record untouched and
//! the walk continues. A failed commit loses the whole cycle's corrections;
//! the next cycle recomputes them from scratch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use roomwarden_core::error::RegistryError;
use roomwarden_core::ids::GuildId;
use roomwarden_core::registry::{Changeset, Mutation, Registry, RegistryState};
use roomwarden_core::types::{ExtensionTarget, RecordId, ResourceKind};
use roomwarden_core::Clock;
use roomwarden_gateway::{Gateway, GatewayError};

use crate::scheduler::ScanJob;
use crate::types::ScanReport;

// ─────────────────────────────────────────────
// Errors and verdicts
// ─────────────────────────────────────────────

/// A scan cycle that could not complete.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("registry commit failed: {0}")]
    Commit(#[from] RegistryError),

    #[error("registry reload failed: {0}")]
    Reload(#[source] RegistryError),
}

/// What a reconciler decided for one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to change.
    Keep,
    /// Mutations were queued for this record.
    Updated,
    /// Remove the record (and any extensions aimed at it).
    Delete,
    /// Not due yet.
    Skipped,
    /// A platform call failed; retry next cycle.
    Failed,
}

// ─────────────────────────────────────────────
// ScanCycle
// ─────────────────────────────────────────────

/// Working state of one cycle: the snapshot being walked and the
/// corrections accumulated so far.
pub struct ScanCycle {
    /// Instant the cycle started; every time comparison uses it.
    pub now: DateTime<Utc>,
    /// Registry snapshot taken at the start of the cycle.
    pub state: RegistryState,
    pub changes: Changeset,
    pub report: ScanReport,
    /// Guild lookups already made this cycle.
    guilds: HashMap<GuildId, bool>,
}

impl ScanCycle {
    pub fn new(now: DateTime<Utc>, state: RegistryState) -> Self {
        Self {
            now,
            state,
            changes: Changeset::new(),
            report: ScanReport::default(),
            guilds: HashMap::new(),
        }
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.changes.push(mutation);
    }

    pub fn extend(&mut self, mutations: impl IntoIterator<Item = Mutation>) {
        for mutation in mutations {
            self.changes.push(mutation);
        }
    }

    /// Whether a guild still exists, asking the gateway once per cycle.
    pub async fn guild_present(
        &mut self,
        gateway: &dyn Gateway,
        guild_id: GuildId,
    ) -> Result<bool, GatewayError> {
        if let Some(present) = self.guilds.get(&guild_id) {
            return Ok(*present);
        }
        let present = gateway.guild(guild_id).await?.is_some();
        self.guilds.insert(guild_id, present);
        Ok(present)
    }

    /// Queue deletion of every extension aimed at `target`.
    pub fn purge_extensions(&mut self, target: ExtensionTarget) {
        let ids: Vec<RecordId> = self
            .state
            .extensions_for(target)
            .iter()
            .map(|s| s.id)
            .collect();
        self.purge_sessions(ids);
    }

    /// Queue deletion of the given extension sessions.
    pub fn purge_sessions(&mut self, ids: Vec<RecordId>) {
        self.report.extensions_purged += ids.len();
        self.extend(ids.into_iter().map(Mutation::DeleteExtension));
    }
}

// ─────────────────────────────────────────────
// Reconcile trait
// ─────────────────────────────────────────────

/// Kind-specific half of a scan: how to list, resolve, and judge records.
#[async_trait]
pub trait Reconcile: Send + Sync {
    type Record: Send + Sync;
    type Resolved: Send;

    fn kind(&self) -> ResourceKind;

    /// Records of this kind in the snapshot.
    fn records(&self, state: &RegistryState) -> Vec<Self::Record>;

    fn record_id(&self, record: &Self::Record) -> RecordId;

    /// Mutation removing the record.
    fn delete(&self, record: &Self::Record) -> Mutation;

    /// Extension target for records that can be extended.
    fn extension_target(&self, _record: &Self::Record) -> Option<ExtensionTarget> {
        None
    }

    /// Decide before resolving. `None` continues to `resolve`.
    async fn precheck(&self, _record: &Self::Record, _cycle: &mut ScanCycle) -> Option<Verdict> {
        None
    }

    /// Look up the external counterpart. `Ok(None)` when it is gone.
    async fn resolve(
        &self,
        record: &Self::Record,
        cycle: &mut ScanCycle,
    ) -> Result<Option<Self::Resolved>, GatewayError>;

    /// Apply the kind's rules to a record whose counterpart exists.
    async fn policy(
        &self,
        record: &Self::Record,
        resolved: Self::Resolved,
        cycle: &mut ScanCycle,
    ) -> Verdict;

    /// Called once after every record was visited.
    fn finish(&self, _cycle: &mut ScanCycle) {}
}

/// Run one cycle of `reconciler` against the registry and commit once.
pub async fn run_scan<R: Reconcile>(
    reconciler: &R,
    registry: &Registry,
    now: DateTime<Utc>,
) -> Result<ScanReport, ScanError> {
    let state = registry.snapshot().await;
    let records = reconciler.records(&state);
    let kind = reconciler.kind();
    let mut cycle = ScanCycle::new(now, state);

    for record in &records {
        cycle.report.seen += 1;
        let id = reconciler.record_id(record);

        let verdict = match reconciler.precheck(record, &mut cycle).await {
            Some(verdict) => verdict,
            None => match reconciler.resolve(record, &mut cycle).await {
                Ok(Some(resolved)) => reconciler.policy(record, resolved, &mut cycle).await,
                Ok(None) => {
                    debug!(kind = %kind, id = id, "external resource gone");
                    Verdict::Delete
                }
                Err(e) if e.is_retryable() => {
                    warn!(kind = %kind, id = id, error = %e, "resolve failed, record left untouched");
                    Verdict::Failed
                }
                Err(e) => {
                    error!(kind = %kind, id = id, error = %e, "resolve rejected, record left untouched");
                    Verdict::Failed
                }
            },
        };

        match verdict {
            Verdict::Keep => {}
            Verdict::Updated => cycle.report.updated += 1,
            Verdict::Skipped => cycle.report.skipped += 1,
            Verdict::Failed => cycle.report.failures += 1,
            Verdict::Delete => {
                cycle.push(reconciler.delete(record));
                cycle.report.deleted += 1;
                if let Some(target) = reconciler.extension_target(record) {
                    cycle.purge_extensions(target);
                }
            }
        }
    }

    reconciler.finish(&mut cycle);

    let ScanCycle {
        changes,
        mut report,
        ..
    } = cycle;
    report.mutations = changes.len();
    registry.commit(changes).await?;
    Ok(report)
}

// ─────────────────────────────────────────────
// ReconcileJob
// ─────────────────────────────────────────────

/// Adapts a `Reconcile` impl into a schedulable `ScanJob`.
pub struct ReconcileJob<R> {
    name: &'static str,
    interval: Duration,
    reconciler: R,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
}

impl<R: Reconcile> ReconcileJob<R> {
    pub fn new(
        name: &'static str,
        interval: Duration,
        reconciler: R,
        registry: Arc<Registry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            interval,
            reconciler,
            registry,
            clock,
        }
    }
}

#[async_trait]
impl<R: Reconcile + 'static> ScanJob for ReconcileJob<R> {
    fn name(&self) -> &str {
        self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<ScanReport, ScanError> {
        let report = run_scan(&self.reconciler, &self.registry, self.clock.now()).await?;
        info!(
            job = %self.name,
            seen = report.seen,
            deleted = report.deleted,
            updated = report.updated,
            failures = report.failures,
            mutations = report.mutations,
            "scan complete"
        );
        Ok(report)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
