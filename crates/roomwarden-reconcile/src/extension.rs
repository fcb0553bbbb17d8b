//! Expiry extensions — folding pending `ExpireExtendSession`s into their
//! target's expiry.
//!
//! Each extensible record kind registers an `ExtensionApplier` in the
//! `ExtensionAppliers` table. Scans that evaluate a target's expiry ask the
//! table for the target's pending extension and commit it together with
//! their own changes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use roomwarden_core::registry::{Mutation, RegistryState};
use roomwarden_core::types::{ExtensionTarget, RecordId, TargetKind};

/// Expiry access for one extensible record kind.
pub trait ExtensionApplier: Send + Sync {
    fn kind(&self) -> TargetKind;

    /// The target's current expiry. Outer `None`: the record does not exist.
    fn expiry(&self, state: &RegistryState, id: RecordId) -> Option<Option<DateTime<Utc>>>;

    fn set_expiry(&self, id: RecordId, expiry: Option<DateTime<Utc>>) -> Mutation;
}

struct TmpChannelExpiry;

impl ExtensionApplier for TmpChannelExpiry {
    fn kind(&self) -> TargetKind {
        TargetKind::TmpChannel
    }

    fn expiry(&self, state: &RegistryState, id: RecordId) -> Option<Option<DateTime<Utc>>> {
        state.tmp_channel(id).map(|c| c.expire_at)
    }

    fn set_expiry(&self, id: RecordId, expire_at: Option<DateTime<Utc>>) -> Mutation {
        Mutation::SetTmpChannelExpiry { id, expire_at }
    }
}

struct RecallExpiry;

impl ExtensionApplier for RecallExpiry {
    fn kind(&self) -> TargetKind {
        TargetKind::RecallIntent
    }

    fn expiry(&self, state: &RegistryState, id: RecordId) -> Option<Option<DateTime<Utc>>> {
        state.recall(id).map(|r| r.recall_at)
    }

    fn set_expiry(&self, id: RecordId, recall_at: Option<DateTime<Utc>>) -> Mutation {
        Mutation::SetRecallAt { id, recall_at }
    }
}

/// Extensions waiting on one target, folded into a new expiry.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingExtension {
    pub target: ExtensionTarget,
    pub original: Option<DateTime<Utc>>,
    /// Expiry after applying every session. A target without an expiry
    /// keeps none.
    pub expiry: Option<DateTime<Utc>>,
    /// Sessions consumed, oldest first.
    pub sessions: Vec<RecordId>,
}

impl PendingExtension {
    pub fn changes_expiry(&self) -> bool {
        self.expiry != self.original
    }
}

/// Per-kind dispatch table.
pub struct ExtensionAppliers {
    appliers: HashMap<TargetKind, Box<dyn ExtensionApplier>>,
}

impl ExtensionAppliers {
    pub fn empty() -> Self {
        Self {
            appliers: HashMap::new(),
        }
    }

    /// Table with every built-in extensible kind.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(Box::new(TmpChannelExpiry));
        table.register(Box::new(RecallExpiry));
        table
    }

    pub fn register(&mut self, applier: Box<dyn ExtensionApplier>) {
        self.appliers.insert(applier.kind(), applier);
    }

    /// Fold every pending session for `target`.
    ///
    /// `None` when there are no sessions, the kind has no applier, or the
    /// target record no longer exists.
    pub fn pending(&self, state: &RegistryState, target: ExtensionTarget) -> Option<PendingExtension> {
        let applier = self.appliers.get(&target.kind)?;
        let sessions = state.extensions_for(target);
        if sessions.is_empty() {
            return None;
        }
        let original = applier.expiry(state, target.id)?;
        let expiry = original.map(|at| sessions.iter().fold(at, |at, s| at + s.extension()));

        Some(PendingExtension {
            target,
            original,
            expiry,
            sessions: sessions.iter().map(|s| s.id).collect(),
        })
    }

    /// Mutations that commit a pending extension: the new expiry (if it
    /// moved) and the consumed sessions.
    pub fn commit(&self, pending: &PendingExtension) -> Vec<Mutation> {
        let mut out = Vec::with_capacity(pending.sessions.len() + 1);
        if pending.changes_expiry() {
            if let Some(applier) = self.appliers.get(&pending.target.kind) {
                out.push(applier.set_expiry(pending.target.id, pending.expiry));
            }
        }
        out.extend(pending.sessions.iter().map(|id| Mutation::DeleteExtension(*id)));
        out
    }

    /// Sessions of `kind` whose target record is gone.
    pub fn orphans(&self, state: &RegistryState, kind: TargetKind) -> Vec<RecordId> {
        let Some(applier) = self.appliers.get(&kind) else {
            return Vec::new();
        };
        state
            .extensions
            .iter()
            .filter(|s| s.target.kind == kind && applier.expiry(state, s.target.id).is_none())
            .map(|s| s.id)
            .collect()
    }
}

impl Default for ExtensionAppliers {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use roomwarden_core::ids::{ChannelId, GuildId, UserId};
    use roomwarden_core::types::{ExpireExtendSession, TimeUnit, TmpChannel};
    use std::num::NonZeroU32;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn state_with(expire_at: Option<DateTime<Utc>>) -> RegistryState {
        let mut state = RegistryState::new();
        state.tmp_channels.push(TmpChannel {
            id: 7,
            guild_id: GuildId(1),
            channel_id: ChannelId(70),
            name: "scratch".into(),
            creator_id: UserId(2),
            expire_at,
            created_at: t0(),
        });
        state
    }

    fn session(id: RecordId, target: RecordId, amount: u32, unit: TimeUnit) -> ExpireExtendSession {
        ExpireExtendSession {
            id,
            target: ExtensionTarget {
                kind: TargetKind::TmpChannel,
                id: target,
            },
            amount: NonZeroU32::new(amount).unwrap(),
            unit,
            created_at: t0() + Duration::seconds(id as i64),
        }
    }

    fn target(id: RecordId) -> ExtensionTarget {
        ExtensionTarget {
            kind: TargetKind::TmpChannel,
            id,
        }
    }

    #[test]
    fn test_pending_folds_all_sessions() {
        let mut state = state_with(Some(t0()));
        state.extensions.push(session(20, 7, 2, TimeUnit::Day));
        state.extensions.push(session(21, 7, 3, TimeUnit::Hour));

        let table = ExtensionAppliers::standard();
        let pending = table.pending(&state, target(7)).unwrap();
        assert_eq!(pending.expiry, Some(t0() + Duration::days(2) + Duration::hours(3)));
        assert_eq!(pending.sessions, vec![20, 21]);

        let mutations = table.commit(&pending);
        assert_eq!(mutations.len(), 3);
        assert!(matches!(mutations[0], Mutation::SetTmpChannelExpiry { id: 7, .. }));
    }

    #[test]
    fn test_pending_without_expiry_consumes_sessions() {
        let mut state = state_with(None);
        state.extensions.push(session(20, 7, 2, TimeUnit::Day));

        let table = ExtensionAppliers::standard();
        let pending = table.pending(&state, target(7)).unwrap();
        assert_eq!(pending.expiry, None);
        assert!(!pending.changes_expiry());
        assert_eq!(table.commit(&pending), vec![Mutation::DeleteExtension(20)]);
    }

    #[test]
    fn test_no_sessions_no_pending() {
        let state = state_with(Some(t0()));
        assert!(ExtensionAppliers::standard().pending(&state, target(7)).is_none());
    }

    #[test]
    fn test_orphans() {
        let mut state = state_with(Some(t0()));
        state.extensions.push(session(20, 7, 1, TimeUnit::Day));
        state.extensions.push(session(21, 99, 1, TimeUnit::Day));

        let table = ExtensionAppliers::standard();
        assert_eq!(table.orphans(&state, TargetKind::TmpChannel), vec![21]);
        assert!(table.orphans(&state, TargetKind::RecallIntent).is_empty());
        assert!(table.pending(&state, target(99)).is_none());
    }

    #[test]
    fn test_empty_table_applies_nothing() {
        let mut state = state_with(Some(t0()));
        state.extensions.push(session(20, 7, 1, TimeUnit::Day));
        let table = ExtensionAppliers::empty();
        assert!(table.pending(&state, target(7)).is_none());
        assert!(ExtensionAppliers::default().pending(&state, target(7)).is_some());
    }
}
