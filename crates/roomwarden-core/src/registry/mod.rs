//! Resource registry — durable desired-state records with batched commits.
//!
//! Architecture:
//! - The whole registry is one `RegistryState` document kept in memory
//! - Readers take a cloned snapshot (grouped read, no lock held afterwards)
//! - Writers submit a `Changeset`; it is applied to a copy, the copy is
//!   written to `<path>.tmp` and renamed over `<path>`, and only then does
//!   the in-memory state move forward
//! - The service and the admin CLI share the file. Every read and commit
//!   first compares the file's mtime and length with those seen at the last
//!   load or write and re-reads the document when they differ, so a commit
//!   always applies on top of the latest state on disk
//!
//! A crash or a failed write therefore leaves the registry exactly as of the
//! last successful commit.

pub mod changeset;
pub mod state;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::ids::{ChannelId, GuildId, UserId};
use crate::types::{RecordId, RoomConfig, RoomInstance};

pub use changeset::{Changeset, Mutation};
pub use state::{RegistryState, REGISTRY_VERSION};

/// What the file looked like when we last read or wrote it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

struct Inner {
    state: RegistryState,
    /// `None` until the file exists.
    stamp: Option<FileStamp>,
}

/// Durable record store.
pub struct Registry {
    /// Registry JSON file. `None` keeps everything in memory.
    path: Option<PathBuf>,
    /// Current committed state. Held across the file write during commits so
    /// commits from this process are serialized.
    inner: Mutex<Inner>,
}

impl Registry {
    /// A registry that never touches disk.
    pub fn in_memory() -> Self {
        Self::from_state(RegistryState::new())
    }

    /// In-memory registry seeded with an existing state.
    pub fn from_state(state: RegistryState) -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner { state, stamp: None }),
        }
    }

    /// Open the registry file, starting empty if it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let (state, stamp) = match file_stamp(&path).await {
            Some(stamp) => {
                let state = read_state(&path).await?;
                info!(
                    path = %path.display(),
                    records = state.record_count(),
                    "loaded registry"
                );
                (state, Some(stamp))
            }
            None => {
                debug!(path = %path.display(), "no registry file, starting empty");
                (RegistryState::new(), None)
            }
        };

        Ok(Self {
            path: Some(path),
            inner: Mutex::new(Inner { state, stamp }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the file if another process changed it. Returns whether the
    /// in-memory state was replaced.
    pub async fn reload(&self) -> Result<bool, RegistryError> {
        let mut inner = self.inner.lock().await;
        match &self.path {
            Some(path) => sync_from_disk(path, &mut inner).await,
            None => Ok(false),
        }
    }

    /// Lock the state for reading, picking up outside changes first. A file
    /// that cannot be read leaves the last good state in place.
    async fn lock_fresh(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().await;
        if let Some(path) = &self.path {
            if let Err(e) = sync_from_disk(path, &mut inner).await {
                warn!(path = %path.display(), error = %e, "registry reload failed, serving last good state");
            }
        }
        inner
    }

    /// Clone of the committed state.
    pub async fn snapshot(&self) -> RegistryState {
        self.lock_fresh().await.state.clone()
    }

    /// The living room instance for a (config, creator) pair, if any.
    pub async fn room_instance_for(
        &self,
        config_id: RecordId,
        creator_id: UserId,
    ) -> Option<RoomInstance> {
        let inner = self.lock_fresh().await;
        inner.state.room_instance_for(config_id, creator_id).cloned()
    }

    /// Enabled room configs whose lobby is `lobby`.
    pub async fn configs_for_lobby(&self, guild_id: GuildId, lobby: ChannelId) -> Vec<RoomConfig> {
        let inner = self.lock_fresh().await;
        inner
            .state
            .configs_for_lobby(guild_id, lobby)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Atomically apply a batch of mutations.
    ///
    /// Returns the ids assigned to inserted records, in order. An empty
    /// changeset is a no-op and does not touch the file. If the file changed
    /// since it was last seen, it is re-read first and the batch applies on
    /// top of it; a file that cannot be re-read fails the commit rather than
    /// being overwritten.
    pub async fn commit(&self, changeset: Changeset) -> Result<Vec<RecordId>, RegistryError> {
        if changeset.is_empty() {
            return Ok(Vec::new());
        }

        let count = changeset.len();
        let mut inner = self.inner.lock().await;
        if let Some(path) = &self.path {
            sync_from_disk(path, &mut inner).await?;
        }

        let mut next = inner.state.clone();
        let inserted = changeset.apply_to(&mut next)?;

        if let Some(path) = &self.path {
            write_atomic(path, &next).await?;
            inner.stamp = file_stamp(path).await;
        }

        inner.state = next;
        debug!(mutations = count, inserted = inserted.len(), "registry commit");
        Ok(inserted)
    }
}

async fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

async fn read_state(path: &Path) -> Result<RegistryState, RegistryError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_str(&data)?)
}

/// Replace `inner` with the file's contents when its stamp moved.
async fn sync_from_disk(path: &Path, inner: &mut Inner) -> Result<bool, RegistryError> {
    let Some(stamp) = file_stamp(path).await else {
        // Removed underneath us; the next commit writes it back.
        return Ok(false);
    };
    if inner.stamp == Some(stamp) {
        return Ok(false);
    }
    inner.state = read_state(path).await?;
    inner.stamp = Some(stamp);
    debug!(
        path = %path.display(),
        records = inner.state.record_count(),
        "registry changed on disk, reloaded"
    );
    Ok(true)
}

/// Write `state` to `<path>.tmp`, then rename over `path`.
async fn write_atomic(path: &Path, state: &RegistryState) -> Result<(), RegistryError> {
    let write_err = |source| RegistryError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let json = serde_json::to_string_pretty(state)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ChannelId, GuildId, MessageId};
    use crate::types::{GuildSettings, RecallIntent, RoomConfig, TmpChannel};
    use chrono::Utc;
    use std::num::NonZeroU32;
    use tempfile::TempDir;

    fn room_config() -> RoomConfig {
        RoomConfig {
            id: 0,
            name: "Lounge".into(),
            guild_id: GuildId(1),
            lobby_channel_id: ChannelId(10),
            bitrate: 64_000,
            member_limit: NonZeroU32::new(4).unwrap(),
            category_id: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    fn recall(message: u64) -> RecallIntent {
        RecallIntent {
            id: 0,
            guild_id: GuildId(1),
            channel_id: ChannelId(20),
            message_id: MessageId(message),
            recall_at: None,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_assigns_ids() {
        let registry = Registry::in_memory();
        let ids = registry
            .commit(Changeset::from_iter([
                Mutation::InsertRoomConfig(room_config()),
                Mutation::InsertRecall(recall(1)),
            ]))
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);

        let snap = registry.snapshot().await;
        assert_eq!(snap.room_configs[0].id, 1);
        assert_eq!(snap.recalls[0].id, 2);
        assert_eq!(snap.last_id, 2);
    }

    #[tokio::test]
    async fn test_empty_commit_is_noop() {
        let registry = Registry::in_memory();
        assert!(registry.commit(Changeset::new()).await.unwrap().is_empty());
        assert_eq!(registry.snapshot().await, RegistryState::new());
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back_whole_batch() {
        let registry = Registry::in_memory();
        let result = registry
            .commit(Changeset::from_iter([
                Mutation::InsertRecall(recall(1)),
                Mutation::SetRoomConfigEnabled { id: 99, enabled: false },
            ]))
            .await;
        assert!(matches!(result, Err(RegistryError::UnknownRoomConfig(99))));
        assert!(registry.snapshot().await.recalls.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_room_instance_rejected() {
        let registry = Registry::in_memory();
        let ids = registry
            .commit(Mutation::InsertRoomConfig(room_config()).into())
            .await
            .unwrap();
        let config_id = ids[0];
        let room = RoomInstance::new(
            config_id,
            ChannelId(100),
            UserId(42),
            NonZeroU32::new(4).unwrap(),
            Utc::now(),
        );

        registry
            .commit(Mutation::InsertRoomInstance(room.clone()).into())
            .await
            .unwrap();
        let second = registry
            .commit(Mutation::InsertRoomInstance(room).into())
            .await;
        assert!(matches!(second, Err(RegistryError::DuplicateRoom { .. })));
        assert_eq!(registry.snapshot().await.room_instances.len(), 1);
        assert!(registry.room_instance_for(config_id, UserId(42)).await.is_some());
    }

    #[tokio::test]
    async fn test_room_instance_requires_config() {
        let registry = Registry::in_memory();
        let room = RoomInstance::new(7, ChannelId(1), UserId(1), NonZeroU32::new(1).unwrap(), Utc::now());
        let result = registry.commit(Mutation::InsertRoomInstance(room).into()).await;
        assert!(matches!(result, Err(RegistryError::UnknownRoomConfig(7))));
    }

    #[tokio::test]
    async fn test_deletes_of_missing_ids_are_noops() {
        let registry = Registry::in_memory();
        registry
            .commit(Changeset::from_iter([
                Mutation::DeleteRoomInstance(5),
                Mutation::DeleteTmpChannel(6),
                Mutation::DeleteRecall(7),
                Mutation::DeleteExtension(8),
            ]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_guild_settings() {
        let registry = Registry::in_memory();
        let mut settings = GuildSettings {
            guild_id: GuildId(1),
            utc_offset_minutes: 60,
            room_name_template: None,
        };
        registry
            .commit(Mutation::UpsertGuildSettings(settings.clone()).into())
            .await
            .unwrap();
        settings.utc_offset_minutes = -300;
        registry
            .commit(Mutation::UpsertGuildSettings(settings).into())
            .await
            .unwrap();

        let snap = registry.snapshot().await;
        assert_eq!(snap.guild_settings.len(), 1);
        assert_eq!(snap.guild_settings(GuildId(1)).unwrap().utc_offset_minutes, -300);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");

        {
            let registry = Registry::open(&path).await.unwrap();
            registry
                .commit(Mutation::InsertTmpChannel(TmpChannel {
                    id: 0,
                    guild_id: GuildId(1),
                    channel_id: ChannelId(2),
                    name: "scratch".into(),
                    creator_id: UserId(3),
                    expire_at: None,
                    created_at: Utc::now(),
                })
                .into())
                .await
                .unwrap();
        }

        let registry = Registry::open(&path).await.unwrap();
        let snap = registry.snapshot().await;
        assert_eq!(snap.tmp_channels.len(), 1);
        assert_eq!(snap.tmp_channels[0].name, "scratch");
        assert_eq!(snap.last_id, 1);
        assert!(!dir.path().join("registry.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_commits_from_two_handles_merge() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let service = Registry::open(&path).await.unwrap();
        let admin = Registry::open(&path).await.unwrap();

        service
            .commit(Mutation::InsertRoomConfig(room_config()).into())
            .await
            .unwrap();
        let admin_ids = admin
            .commit(Mutation::InsertRecall(recall(1)).into())
            .await
            .unwrap();
        let service_ids = service
            .commit(Changeset::from_iter([
                Mutation::DeleteRecall(999),
                Mutation::InsertRecall(recall(2)),
            ]))
            .await
            .unwrap();
        assert_eq!(admin_ids, vec![2]);
        assert_eq!(service_ids, vec![3]);

        let reopened = Registry::open(&path).await.unwrap().snapshot().await;
        assert_eq!(reopened.room_configs.len(), 1);
        assert_eq!(reopened.recalls.len(), 2);
        assert_eq!(reopened.last_id, 3);
        let mut ids: Vec<_> = reopened.recalls.iter().map(|r| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_reads_pick_up_outside_commits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let service = Registry::open(&path).await.unwrap();
        let admin = Registry::open(&path).await.unwrap();

        assert!(!service.reload().await.unwrap());
        let ids = admin
            .commit(Mutation::InsertRoomConfig(room_config()).into())
            .await
            .unwrap();

        let configs = service.configs_for_lobby(GuildId(1), ChannelId(10)).await;
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id, ids[0]);
        assert!(!service.reload().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_commit_without_overwriting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let registry = Registry::open(&path).await.unwrap();
        registry
            .commit(Mutation::InsertRecall(recall(1)).into())
            .await
            .unwrap();

        std::fs::write(&path, "{ half written").unwrap();
        let result = registry.commit(Mutation::InsertRecall(recall(2)).into()).await;
        assert!(matches!(result, Err(RegistryError::Corrupt(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ half written");
        // Readers keep serving the last good state.
        assert_eq!(registry.snapshot().await.recalls.len(), 1);
    }

    #[tokio::test]
    async fn test_open_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path().join("nope.json")).await.unwrap();
        assert_eq!(registry.snapshot().await.record_count(), 0);
    }

    #[tokio::test]
    async fn test_open_corrupt_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Registry::open(&path).await,
            Err(RegistryError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        // Parent "directory" is a regular file, so every write fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let registry = Registry::open(blocker.join("registry.json")).await.unwrap();

        let result = registry.commit(Mutation::InsertRecall(recall(1)).into()).await;
        assert!(matches!(result, Err(RegistryError::Write { .. })));
        assert!(registry.snapshot().await.recalls.is_empty());
    }
}
