//! Trigger handler — creates voice rooms when members join a lobby.
//!
//! Flow per (config, creator) pair:
//! 1. Reserve the pair in-process; a concurrent request for the same pair
//!    is rejected and dropped (first wins)
//! 2. If the creator already owns a room for the config and its channel
//!    still exists, move them there; a row whose channel is gone is
//!    replaced in the same commit as the new room
//! 3. Otherwise create the external channel, then commit the row; the
//!    registry re-checks uniqueness under its lock
//! 4. Move the creator into the new room (best-effort)
//!
//! A row is never committed without a live channel. If the commit fails
//! the channel is deleted again, best-effort.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use roomwarden_core::bus::{EventBus, OccupancyEvent};
use roomwarden_core::error::RegistryError;
use roomwarden_core::ids::{ChannelId, GuildId, UserId};
use roomwarden_core::registry::{Changeset, Mutation, Registry};
use roomwarden_core::types::{RecordId, RoomConfig, RoomInstance};
use roomwarden_core::Clock;
use roomwarden_gateway::{Gateway, GatewayError, VoiceChannelSpec};

use crate::settings::SettingsCache;

#[derive(Debug, Error)]
pub enum TriggerError {
    /// Another request for the same pair is in flight.
    #[error("room request for config {config_id} by {creator_id} already in progress")]
    RaceRejected { config_id: RecordId, creator_id: UserId },

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
}

/// What a handled lobby join led to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new room was created for the creator.
    Created {
        config_id: RecordId,
        instance_id: RecordId,
        channel_id: ChannelId,
    },
    /// The creator already had a room and was sent back to it.
    Rejoined {
        config_id: RecordId,
        instance_id: RecordId,
        channel_id: ChannelId,
    },
}

type ReservationKey = (RecordId, UserId);

/// Holds a (config, creator) reservation until dropped.
struct Reservation<'a> {
    set: &'a Mutex<HashSet<ReservationKey>>,
    key: ReservationKey,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

pub struct TriggerHandler {
    registry: Arc<Registry>,
    gateway: Arc<dyn Gateway>,
    settings: Arc<SettingsCache>,
    clock: Arc<dyn Clock>,
    reservations: Mutex<HashSet<ReservationKey>>,
}

impl TriggerHandler {
    pub fn new(
        registry: Arc<Registry>,
        gateway: Arc<dyn Gateway>,
        settings: Arc<SettingsCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            gateway,
            settings,
            clock,
            reservations: Mutex::new(HashSet::new()),
        }
    }

    fn reserve(&self, key: ReservationKey) -> Option<Reservation<'_>> {
        let mut set = self.reservations.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key) {
            return None;
        }
        Some(Reservation {
            set: &self.reservations,
            key,
        })
    }

    /// Handle one occupancy change. Returns one result per matching config;
    /// events that are not lobby joins yield nothing.
    pub async fn handle(&self, event: &OccupancyEvent) -> Vec<Result<TriggerOutcome, TriggerError>> {
        let Some(lobby) = event.joined else {
            return Vec::new();
        };
        let configs = self.registry.configs_for_lobby(event.guild_id, lobby).await;
        if configs.is_empty() {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(configs.len());
        for config in &configs {
            let result = self.handle_config(config, event).await;
            match &result {
                Ok(_) => {}
                Err(e @ TriggerError::RaceRejected { .. }) => debug!(error = %e, "trigger dropped"),
                Err(e) => warn!(config = config.id, user = %event.user_id, error = %e, "room creation abandoned"),
            }
            results.push(result);
        }
        results
    }

    async fn handle_config(
        &self,
        config: &RoomConfig,
        event: &OccupancyEvent,
    ) -> Result<TriggerOutcome, TriggerError> {
        let creator_id = event.user_id;
        let _reservation =
            self.reserve((config.id, creator_id))
                .ok_or(TriggerError::RaceRejected {
                    config_id: config.id,
                    creator_id,
                })?;

        let mut changeset = Changeset::new();
        if let Some(existing) = self.registry.room_instance_for(config.id, creator_id).await {
            if self
                .gateway
                .channel(config.guild_id, existing.channel_id)
                .await?
                .is_some()
            {
                debug!(config = config.id, user = %creator_id, room = existing.id, "creator already has a room");
                self.move_creator(config.guild_id, creator_id, existing.channel_id).await;
                return Ok(TriggerOutcome::Rejoined {
                    config_id: config.id,
                    instance_id: existing.id,
                    channel_id: existing.channel_id,
                });
            }
            // Channel deleted outside the bot: replace the stale row.
            debug!(room = existing.id, channel = %existing.channel_id, "room channel is gone, replacing");
            changeset.push(Mutation::DeleteRoomInstance(existing.id));
        }

        let settings = self.settings.get(config.guild_id).await;
        let member = event
            .member_name
            .clone()
            .unwrap_or_else(|| creator_id.to_string());
        let spec = VoiceChannelSpec {
            name: settings.room_name(&config.name, &member),
            bitrate: config.bitrate,
            user_limit: config.member_limit,
            parent_id: config.category_id,
        };

        let channel_id = self.gateway.create_voice_channel(config.guild_id, &spec).await?;

        let room = RoomInstance::new(
            config.id,
            channel_id,
            creator_id,
            config.member_limit,
            self.clock.now(),
        );
        changeset.push(Mutation::InsertRoomInstance(room));
        let instance_id = match self.registry.commit(changeset).await {
            Ok(ids) => ids.first().copied().unwrap_or_default(),
            Err(e) => {
                if let Err(del) = self.gateway.delete_channel(channel_id).await {
                    warn!(channel = %channel_id, error = %del, "failed to remove channel after aborted room commit");
                }
                return Err(e.into());
            }
        };

        info!(
            config = config.id,
            user = %creator_id,
            room = instance_id,
            channel = %channel_id,
            name = %spec.name,
            "room created"
        );
        self.move_creator(config.guild_id, creator_id, channel_id).await;

        Ok(TriggerOutcome::Created {
            config_id: config.id,
            instance_id,
            channel_id,
        })
    }

    async fn move_creator(&self, guild_id: GuildId, user_id: UserId, channel_id: ChannelId) {
        if let Err(e) = self.gateway.move_member(guild_id, user_id, channel_id).await {
            warn!(user = %user_id, channel = %channel_id, error = %e, "failed to move member into room");
        }
    }

    /// Consume events from the bus until it closes or `shutdown` is
    /// notified. Each event is handled on its own task.
    pub async fn run(self: Arc<Self>, bus: Arc<EventBus>, shutdown: Arc<Notify>) {
        info!("trigger handler started");
        loop {
            tokio::select! {
                event = bus.consume() => match event {
                    Some(event) => {
                        let handler = self.clone();
                        tokio::spawn(async move {
                            handler.handle(&event).await;
                        });
                    }
                    None => break,
                },
                _ = shutdown.notified() => break,
            }
        }
        info!("trigger handler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use roomwarden_core::types::GuildSettings;
    use roomwarden_core::ManualClock;
    use roomwarden_gateway::{ChannelKind, GatewayOp, MemoryGateway};
    use std::num::NonZeroU32;
    use std::time::Duration;

    const GUILD: GuildId = GuildId(1);
    const LOBBY: ChannelId = ChannelId(10);

    struct Fixture {
        registry: Arc<Registry>,
        gateway: Arc<MemoryGateway>,
        handler: Arc<TriggerHandler>,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(Registry::in_memory());
        registry
            .commit(
                Mutation::InsertRoomConfig(RoomConfig {
                    id: 0,
                    name: "Lounge".into(),
                    guild_id: GUILD,
                    lobby_channel_id: LOBBY,
                    bitrate: 64_000,
                    member_limit: NonZeroU32::new(5).unwrap(),
                    category_id: Some(ChannelId(3)),
                    enabled: true,
                    created_at: Utc::now(),
                })
                .into(),
            )
            .await
            .unwrap();

        let gateway = Arc::new(MemoryGateway::new());
        gateway.add_guild(GUILD, "home");
        gateway.add_channel(GUILD, LOBBY, "lobby", ChannelKind::Voice);

        let settings = Arc::new(SettingsCache::new(registry.clone()));
        let handler = Arc::new(TriggerHandler::new(
            registry.clone(),
            gateway.clone(),
            settings,
            Arc::new(ManualClock::new(Utc::now())),
        ));
        Fixture {
            registry,
            gateway,
            handler,
        }
    }

    fn join(user: u64, name: &str) -> OccupancyEvent {
        let mut event = OccupancyEvent::joined(GUILD, UserId(user), LOBBY);
        event.member_name = Some(name.into());
        event
    }

    #[tokio::test]
    async fn test_lobby_join_creates_room_and_moves_creator() {
        let fx = fixture().await;
        let results = fx.handler.handle(&join(42, "alice")).await;
        assert_eq!(results.len(), 1);

        let Ok(TriggerOutcome::Created { channel_id, .. }) = &results[0] else {
            panic!("expected a created room, got {:?}", results[0]);
        };
        assert_eq!(fx.gateway.channel_name(*channel_id).as_deref(), Some("Lounge · alice"));
        assert_eq!(fx.gateway.member_channel(GUILD, UserId(42)), Some(*channel_id));

        let snap = fx.registry.snapshot().await;
        assert_eq!(snap.room_instances.len(), 1);
        assert_eq!(snap.room_instances[0].creator_id, UserId(42));
        assert_eq!(snap.room_instances[0].member_limit.get(), 5);
    }

    #[tokio::test]
    async fn test_existing_room_rejoins() {
        let fx = fixture().await;
        fx.handler.handle(&join(42, "alice")).await;
        let results = fx.handler.handle(&join(42, "alice")).await;

        assert!(matches!(results[0], Ok(TriggerOutcome::Rejoined { .. })));
        assert_eq!(fx.gateway.stats().creates, 1);
        assert_eq!(fx.registry.snapshot().await.room_instances.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_room_row_is_replaced() {
        let fx = fixture().await;
        fx.handler.handle(&join(42, "alice")).await;
        let stale = fx.registry.snapshot().await.room_instances[0].clone();
        fx.gateway.remove_channel(stale.channel_id);

        let results = fx.handler.handle(&join(42, "alice")).await;
        let Ok(TriggerOutcome::Created { instance_id, channel_id, .. }) = &results[0] else {
            panic!("expected a fresh room, got {:?}", results[0]);
        };
        assert_ne!(*instance_id, stale.id);
        assert_ne!(*channel_id, stale.channel_id);
        assert_eq!(fx.gateway.stats().creates, 2);
        assert_eq!(fx.gateway.member_channel(GUILD, UserId(42)), Some(*channel_id));

        let snap = fx.registry.snapshot().await;
        assert_eq!(snap.room_instances.len(), 1);
        assert_eq!(snap.room_instances[0].id, *instance_id);
    }

    #[tokio::test]
    async fn test_room_lookup_failure_abandons_join() {
        let fx = fixture().await;
        fx.handler.handle(&join(42, "alice")).await;
        fx.gateway.fail(GatewayOp::Channel);

        let results = fx.handler.handle(&join(42, "alice")).await;
        assert!(matches!(results[0], Err(TriggerError::Gateway(_))));
        assert_eq!(fx.gateway.stats().creates, 1);
        assert_eq!(fx.registry.snapshot().await.room_instances.len(), 1);
    }

    #[tokio::test]
    async fn test_non_lobby_events_ignored() {
        let fx = fixture().await;
        let elsewhere = OccupancyEvent::joined(GUILD, UserId(42), ChannelId(99));
        let left = OccupancyEvent::left(GUILD, UserId(42), LOBBY);
        assert!(fx.handler.handle(&elsewhere).await.is_empty());
        assert!(fx.handler.handle(&left).await.is_empty());
        assert_eq!(fx.gateway.stats().creates, 0);
    }

    #[tokio::test]
    async fn test_create_failure_commits_nothing() {
        let fx = fixture().await;
        fx.gateway.fail(GatewayOp::CreateVoiceChannel);

        let results = fx.handler.handle(&join(42, "alice")).await;
        assert!(matches!(results[0], Err(TriggerError::Gateway(_))));
        assert!(fx.registry.snapshot().await.room_instances.is_empty());
    }

    #[tokio::test]
    async fn test_move_failure_keeps_room() {
        let fx = fixture().await;
        fx.gateway.fail(GatewayOp::MoveMember);

        let results = fx.handler.handle(&join(42, "alice")).await;
        assert!(matches!(results[0], Ok(TriggerOutcome::Created { .. })));
        assert_eq!(fx.registry.snapshot().await.room_instances.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_joins_create_one_room() {
        let fx = fixture().await;
        fx.gateway.set_create_latency(Duration::from_millis(50));

        let ev_a = join(42, "alice");
        let ev_b = join(42, "alice");
        let (a, b) = tokio::join!(fx.handler.handle(&ev_a), fx.handler.handle(&ev_b),);
        let rejected = a
            .iter()
            .chain(b.iter())
            .filter(|r| matches!(r, Err(TriggerError::RaceRejected { .. })))
            .count();
        assert_eq!(rejected, 1);
        assert_eq!(fx.gateway.stats().creates, 1);
        assert_eq!(fx.registry.snapshot().await.room_instances.len(), 1);
    }

    #[tokio::test]
    async fn test_guild_template_names_room() {
        let fx = fixture().await;
        fx.registry
            .commit(
                Mutation::UpsertGuildSettings(GuildSettings {
                    guild_id: GUILD,
                    utc_offset_minutes: 0,
                    room_name_template: Some("{user}'s {room}".into()),
                })
                .into(),
            )
            .await
            .unwrap();

        let results = fx.handler.handle(&join(7, "bob")).await;
        let Ok(TriggerOutcome::Created { channel_id, .. }) = &results[0] else {
            panic!("expected a created room");
        };
        assert_eq!(fx.gateway.channel_name(*channel_id).as_deref(), Some("bob's Lounge"));
    }

    #[tokio::test]
    async fn test_run_consumes_bus_until_shutdown() {
        let fx = fixture().await;
        let bus = Arc::new(EventBus::new(8));
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(fx.handler.clone().run(bus.clone(), shutdown.clone()));

        bus.publish(join(42, "alice")).await.unwrap();
        for _ in 0..50 {
            if !fx.registry.snapshot().await.room_instances.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fx.registry.snapshot().await.room_instances.len(), 1);

        shutdown.notify_one();
        task.await.unwrap();
    }
}
