//! Room-instance scan: reap voice rooms nobody is in.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use roomwarden_core::ids::GuildId;
use roomwarden_core::registry::{Mutation, RegistryState};
use roomwarden_core::types::{RecordId, ResourceKind, RoomInstance};
use roomwarden_gateway::{Gateway, GatewayError};

use crate::scan::{Reconcile, ScanCycle, Verdict};

/// A room instance with the guild of its config. `guild_id` is `None`
/// when the config was removed.
#[derive(Clone, Debug)]
pub struct RoomRecord {
    pub room: RoomInstance,
    pub guild_id: Option<GuildId>,
}

pub struct RoomInstanceScan {
    gateway: Arc<dyn Gateway>,
}

impl RoomInstanceScan {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Reconcile for RoomInstanceScan {
    type Record = RoomRecord;
    /// Current occupant count.
    type Resolved = usize;

    fn kind(&self) -> ResourceKind {
        ResourceKind::RoomInstance
    }

    fn records(&self, state: &RegistryState) -> Vec<RoomRecord> {
        state
            .room_instances
            .iter()
            .map(|room| RoomRecord {
                room: room.clone(),
                guild_id: state.room_config(room.config_id).map(|c| c.guild_id),
            })
            .collect()
    }

    fn record_id(&self, record: &RoomRecord) -> RecordId {
        record.room.id
    }

    fn delete(&self, record: &RoomRecord) -> Mutation {
        Mutation::DeleteRoomInstance(record.room.id)
    }

    async fn resolve(
        &self,
        record: &RoomRecord,
        cycle: &mut ScanCycle,
    ) -> Result<Option<usize>, GatewayError> {
        let Some(guild_id) = record.guild_id else {
            debug!(room = record.room.id, config = record.room.config_id, "room config gone");
            return Ok(None);
        };
        if !cycle.guild_present(self.gateway.as_ref(), guild_id).await? {
            return Ok(None);
        }
        if self.gateway.channel(guild_id, record.room.channel_id).await?.is_none() {
            return Ok(None);
        }
        let count = self
            .gateway
            .occupant_count(guild_id, record.room.channel_id)
            .await?;
        Ok(Some(count))
    }

    async fn policy(&self, record: &RoomRecord, occupants: usize, _cycle: &mut ScanCycle) -> Verdict {
        if occupants > 0 {
            return Verdict::Keep;
        }

        debug!(room = record.room.id, channel = %record.room.channel_id, "room empty, reaping");
        if let Err(e) = self.gateway.delete_channel(record.room.channel_id).await {
            warn!(
                room = record.room.id,
                channel = %record.room.channel_id,
                error = %e,
                "failed to delete empty room channel"
            );
        }
        Verdict::Delete
    }
}
