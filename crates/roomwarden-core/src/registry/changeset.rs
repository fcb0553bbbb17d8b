//! Batched registry mutations.
//!
//! Scan jobs accumulate a `Changeset` while walking their records and hand it
//! to `Registry::commit` once at the end of the cycle.

use chrono::{DateTime, Utc};

use crate::error::RegistryError;
use crate::types::{
    CountDownChannel, ExpireExtendSession, GuildSettings, RecallIntent, RecordId, RoomConfig,
    RoomInstance, TmpChannel,
};

use super::state::RegistryState;

/// One registry change.
///
/// Deletes and updates of ids that no longer exist are no-ops, so replaying
/// a stale changeset never fails on them.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    InsertRoomConfig(RoomConfig),
    SetRoomConfigEnabled { id: RecordId, enabled: bool },

    /// Rejected if the (config, creator) pair already has an instance.
    InsertRoomInstance(RoomInstance),
    DeleteRoomInstance(RecordId),

    InsertTmpChannel(TmpChannel),
    SetTmpChannelExpiry { id: RecordId, expire_at: Option<DateTime<Utc>> },
    DeleteTmpChannel(RecordId),

    InsertCountDown(CountDownChannel),
    SetCountDownRendered { id: RecordId, rendered: String },
    DeleteCountDown(RecordId),

    InsertRecall(RecallIntent),
    SetRecallAt { id: RecordId, recall_at: Option<DateTime<Utc>> },
    RecordRecallFailure(RecordId),
    DeleteRecall(RecordId),

    InsertExtension(ExpireExtendSession),
    DeleteExtension(RecordId),

    UpsertGuildSettings(GuildSettings),
}

impl Mutation {
    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Mutation::InsertRoomConfig(_) => "insert-room-config",
            Mutation::SetRoomConfigEnabled { .. } => "set-room-config-enabled",
            Mutation::InsertRoomInstance(_) => "insert-room-instance",
            Mutation::DeleteRoomInstance(_) => "delete-room-instance",
            Mutation::InsertTmpChannel(_) => "insert-tmp-channel",
            Mutation::SetTmpChannelExpiry { .. } => "set-tmp-channel-expiry",
            Mutation::DeleteTmpChannel(_) => "delete-tmp-channel",
            Mutation::InsertCountDown(_) => "insert-countdown",
            Mutation::SetCountDownRendered { .. } => "set-countdown-rendered",
            Mutation::DeleteCountDown(_) => "delete-countdown",
            Mutation::InsertRecall(_) => "insert-recall",
            Mutation::SetRecallAt { .. } => "set-recall-at",
            Mutation::RecordRecallFailure(_) => "record-recall-failure",
            Mutation::DeleteRecall(_) => "delete-recall",
            Mutation::InsertExtension(_) => "insert-extension",
            Mutation::DeleteExtension(_) => "delete-extension",
            Mutation::UpsertGuildSettings(_) => "upsert-guild-settings",
        }
    }

    /// Apply to `state`, returning the id of an inserted record.
    pub(crate) fn apply(self, state: &mut RegistryState) -> Result<Option<RecordId>, RegistryError> {
        match self {
            Mutation::InsertRoomConfig(mut config) => {
                config.id = state.allocate_id();
                let id = config.id;
                state.room_configs.push(config);
                Ok(Some(id))
            }
            Mutation::SetRoomConfigEnabled { id, enabled } => {
                match state.room_configs.iter_mut().find(|c| c.id == id) {
                    Some(config) => {
                        config.enabled = enabled;
                        Ok(None)
                    }
                    None => Err(RegistryError::UnknownRoomConfig(id)),
                }
            }
            Mutation::InsertRoomInstance(mut room) => {
                if state.room_config(room.config_id).is_none() {
                    return Err(RegistryError::UnknownRoomConfig(room.config_id));
                }
                if state.room_instance_for(room.config_id, room.creator_id).is_some() {
                    return Err(RegistryError::DuplicateRoom {
                        config_id: room.config_id,
                        creator_id: room.creator_id,
                    });
                }
                room.id = state.allocate_id();
                let id = room.id;
                state.room_instances.push(room);
                Ok(Some(id))
            }
            Mutation::DeleteRoomInstance(id) => {
                state.room_instances.retain(|r| r.id != id);
                Ok(None)
            }
            Mutation::InsertTmpChannel(mut channel) => {
                channel.id = state.allocate_id();
                let id = channel.id;
                state.tmp_channels.push(channel);
                Ok(Some(id))
            }
            Mutation::SetTmpChannelExpiry { id, expire_at } => {
                if let Some(channel) = state.tmp_channels.iter_mut().find(|c| c.id == id) {
                    channel.expire_at = expire_at;
                }
                Ok(None)
            }
            Mutation::DeleteTmpChannel(id) => {
                state.tmp_channels.retain(|c| c.id != id);
                Ok(None)
            }
            Mutation::InsertCountDown(mut countdown) => {
                countdown.id = state.allocate_id();
                let id = countdown.id;
                state.countdowns.push(countdown);
                Ok(Some(id))
            }
            Mutation::SetCountDownRendered { id, rendered } => {
                if let Some(countdown) = state.countdowns.iter_mut().find(|c| c.id == id) {
                    countdown.rendered = Some(rendered);
                }
                Ok(None)
            }
            Mutation::DeleteCountDown(id) => {
                state.countdowns.retain(|c| c.id != id);
                Ok(None)
            }
            Mutation::InsertRecall(mut recall) => {
                recall.id = state.allocate_id();
                let id = recall.id;
                state.recalls.push(recall);
                Ok(Some(id))
            }
            Mutation::SetRecallAt { id, recall_at } => {
                if let Some(recall) = state.recalls.iter_mut().find(|r| r.id == id) {
                    recall.recall_at = recall_at;
                }
                Ok(None)
            }
            Mutation::RecordRecallFailure(id) => {
                if let Some(recall) = state.recalls.iter_mut().find(|r| r.id == id) {
                    recall.attempts = recall.attempts.saturating_add(1);
                }
                Ok(None)
            }
            Mutation::DeleteRecall(id) => {
                state.recalls.retain(|r| r.id != id);
                Ok(None)
            }
            Mutation::InsertExtension(mut session) => {
                session.id = state.allocate_id();
                let id = session.id;
                state.extensions.push(session);
                Ok(Some(id))
            }
            Mutation::DeleteExtension(id) => {
                state.extensions.retain(|e| e.id != id);
                Ok(None)
            }
            Mutation::UpsertGuildSettings(settings) => {
                match state
                    .guild_settings
                    .iter_mut()
                    .find(|s| s.guild_id == settings.guild_id)
                {
                    Some(existing) => *existing = settings,
                    None => state.guild_settings.push(settings),
                }
                Ok(None)
            }
        }
    }
}

/// An ordered batch of mutations committed atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changeset {
    mutations: Vec<Mutation>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }

    /// Apply every mutation to `state` in order, all or nothing.
    pub(crate) fn apply_to(self, state: &mut RegistryState) -> Result<Vec<RecordId>, RegistryError> {
        let mut inserted = Vec::new();
        for mutation in self.mutations {
            if let Some(id) = mutation.apply(state)? {
                inserted.push(id);
            }
        }
        Ok(inserted)
    }
}

impl From<Mutation> for Changeset {
    fn from(mutation: Mutation) -> Self {
        Self {
            mutations: vec![mutation],
        }
    }
}

impl FromIterator<Mutation> for Changeset {
    fn from_iter<I: IntoIterator<Item = Mutation>>(iter: I) -> Self {
        Self {
            mutations: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Changeset {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}
