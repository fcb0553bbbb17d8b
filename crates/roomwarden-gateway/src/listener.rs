//! Discord voice listener — raw Gateway WebSocket feeding voice occupancy.
//!
//! Keeps `VoiceStateCache` current and turns every voice channel change
//! into an `OccupancyEvent` on the event bus.
//!
//! Features:
//! - Gateway v10 WebSocket with heartbeat, zombie detection and resume
//! - `GUILD_CREATE` voice state snapshots, `GUILD_DELETE` eviction
//! - `VOICE_STATE_UPDATE` → cache update + occupancy event
//! - Reconnect with a fixed backoff until stopped

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use roomwarden_core::bus::OccupancyEvent;
use roomwarden_core::ids::{ChannelId, GuildId, UserId};

use crate::voice::VoiceStateCache;

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Default Gateway WebSocket URL.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Intents: GUILDS(1) + GUILD_VOICE_STATES(128).
const VOICE_INTENTS: u64 = 1 + 128;

/// Pause before reconnecting after a dropped session.
const RECONNECT_DELAY_SECS: u64 = 5;

// Gateway opcodes
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RESUME: u64 = 6;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

// ─────────────────────────────────────────────
// VoiceListener
// ─────────────────────────────────────────────

/// Long-running gateway connection that only cares about voice.
pub struct VoiceListener {
    /// Bot token from Discord Developer Portal.
    token: String,
    /// Gateway WebSocket URL.
    gateway_url: String,
    /// Occupancy cache shared with `DiscordGateway`.
    voice: Arc<VoiceStateCache>,
    /// Occupancy events for the trigger handler.
    events: mpsc::Sender<OccupancyEvent>,
    /// Shutdown signal.
    shutdown: Arc<Notify>,
    stopping: AtomicBool,
    /// Gateway sequence number for heartbeats and resume.
    seq: Mutex<Option<u64>>,
    /// Session ID for resume.
    session_id: Mutex<Option<String>>,
    /// Resume gateway URL.
    resume_url: Mutex<Option<String>>,
}

impl VoiceListener {
    pub fn new(
        token: impl Into<String>,
        voice: Arc<VoiceStateCache>,
        events: mpsc::Sender<OccupancyEvent>,
    ) -> Self {
        Self {
            token: token.into(),
            gateway_url: DEFAULT_GATEWAY_URL.into(),
            voice,
            events,
            shutdown: Arc::new(Notify::new()),
            stopping: AtomicBool::new(false),
            seq: Mutex::new(None),
            session_id: Mutex::new(None),
            resume_url: Mutex::new(None),
        }
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    /// Run the gateway connection with auto-reconnect until `stop()`.
    pub async fn run(&self) -> anyhow::Result<()> {
        if self.token.is_empty() {
            return Err(anyhow::anyhow!("discord token is empty"));
        }

        info!("starting discord voice listener (gateway v10)");
        while !self.stopping.load(Ordering::SeqCst) {
            match self.session().await {
                Ok(()) => {
                    info!("discord gateway session ended normally");
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "discord gateway error, reconnecting in {RECONNECT_DELAY_SECS}s");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                _ = self.shutdown.notified() => break,
            }
        }
        Ok(())
    }

    /// Graceful shutdown.
    pub fn stop(&self) {
        info!("stopping discord voice listener");
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Single Gateway WebSocket session.
    async fn session(&self) -> anyhow::Result<()> {
        let url = {
            let resume = self.resume_url.lock().await;
            resume.as_deref().unwrap_or(&self.gateway_url).to_string()
        };

        debug!(url = %url, "connecting to discord gateway");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        // The first frame must be HELLO with the heartbeat interval.
        let interval_ms = loop {
            let payload = match read.next().await {
                Some(Ok(WsMessage::Text(t))) => match serde_json::from_str::<Value>(&t) {
                    Ok(v) => v,
                    Err(_) => continue,
                },
                Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };
            if payload["op"].as_u64() == Some(OP_HELLO) {
                break payload["d"]["heartbeat_interval"].as_u64().unwrap_or(41_250);
            }
        };
        debug!(interval_ms = interval_ms, "discord HELLO received");

        write
            .send(WsMessage::text(self.identify_payload().await.to_string()))
            .await?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so the first
        // heartbeat goes out one interval after IDENTIFY.
        heartbeat.tick().await;
        let mut acked = true;

        loop {
            tokio::select! {
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(WsMessage::Text(t))) => t.to_string(),
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("discord ws closed by server");
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            error!(error = %e, "discord ws read error");
                            return Err(e.into());
                        }
                    };

                    let payload: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "discord ws invalid json");
                            continue;
                        }
                    };

                    if let Some(s) = payload["s"].as_u64() {
                        *self.seq.lock().await = Some(s);
                    }

                    match payload["op"].as_u64().unwrap_or(u64::MAX) {
                        OP_DISPATCH => {
                            let event = payload["t"].as_str().unwrap_or("");
                            self.handle_dispatch(event, &payload["d"]).await;
                        }
                        OP_HEARTBEAT_ACK => acked = true,
                        OP_HEARTBEAT => {
                            write.send(WsMessage::text(self.heartbeat_payload().await.to_string())).await?;
                        }
                        OP_RECONNECT => {
                            info!("discord server requested reconnect");
                            return Err(anyhow::anyhow!("reconnect requested"));
                        }
                        OP_INVALID_SESSION => {
                            let resumable = payload["d"].as_bool().unwrap_or(false);
                            warn!(resumable = resumable, "discord invalid session");
                            if !resumable {
                                *self.session_id.lock().await = None;
                                *self.resume_url.lock().await = None;
                            }
                            return Err(anyhow::anyhow!("invalid session"));
                        }
                        _ => {}
                    }
                }
                _ = heartbeat.tick() => {
                    if !acked {
                        warn!("discord heartbeat not ACKed, reconnecting");
                        return Err(anyhow::anyhow!("zombie connection"));
                    }
                    acked = false;
                    write.send(WsMessage::text(self.heartbeat_payload().await.to_string())).await?;
                }
                _ = self.shutdown.notified() => {
                    info!("discord shutdown signal received");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    async fn heartbeat_payload(&self) -> Value {
        json!({ "op": OP_HEARTBEAT, "d": *self.seq.lock().await })
    }

    /// IDENTIFY, or RESUME when a previous session can be continued.
    async fn identify_payload(&self) -> Value {
        let session = self.session_id.lock().await.clone();
        match session {
            Some(sid) => json!({
                "op": OP_RESUME,
                "d": {
                    "token": self.token,
                    "session_id": sid,
                    "seq": *self.seq.lock().await
                }
            }),
            None => json!({
                "op": OP_IDENTIFY,
                "d": {
                    "token": self.token,
                    "intents": VOICE_INTENTS,
                    "properties": {
                        "os": "roomwarden",
                        "browser": "roomwarden",
                        "device": "roomwarden"
                    }
                }
            }),
        }
    }

    /// Apply one dispatch event to the cache and bus.
    async fn handle_dispatch(&self, event: &str, data: &Value) {
        match event {
            "READY" => {
                if let Some(sid) = data["session_id"].as_str() {
                    *self.session_id.lock().await = Some(sid.to_string());
                }
                if let Some(url) = data["resume_gateway_url"].as_str() {
                    *self.resume_url.lock().await = Some(url.to_string());
                }
                let user = data["user"]["username"].as_str().unwrap_or("unknown");
                info!(user = user, "discord bot READY");
            }
            "RESUMED" => info!("discord session resumed"),
            "GUILD_CREATE" => self.handle_guild_create(data).await,
            "GUILD_DELETE" => {
                if let Some(guild_id) = parse_id::<GuildId>(&data["id"]) {
                    self.voice.forget_guild(guild_id).await;
                    debug!(guild = %guild_id, "guild unavailable, voice state dropped");
                }
            }
            "VOICE_STATE_UPDATE" => self.handle_voice_state(data).await,
            _ => debug!(event = event, "discord event (unhandled)"),
        }
    }

    async fn handle_guild_create(&self, data: &Value) {
        let Some(guild_id) = parse_id::<GuildId>(&data["id"]) else {
            return;
        };
        let states: Vec<(UserId, ChannelId)> = data["voice_states"]
            .as_array()
            .map(|states| {
                states
                    .iter()
                    .filter_map(|s| Some((parse_id(&s["user_id"])?, parse_id(&s["channel_id"])?)))
                    .collect()
            })
            .unwrap_or_default();

        debug!(guild = %guild_id, connected = states.len(), "voice snapshot");
        self.voice.replace_guild(guild_id, states).await;
    }

    async fn handle_voice_state(&self, data: &Value) {
        let (Some(guild_id), Some(user_id)) = (
            parse_id::<GuildId>(&data["guild_id"]),
            parse_id::<UserId>(&data["user_id"]),
        ) else {
            return;
        };
        let channel = parse_id::<ChannelId>(&data["channel_id"]);

        let previous = self.voice.update(guild_id, user_id, channel).await;
        if previous == channel {
            // Mute/deafen toggles arrive as voice state updates too.
            return;
        }
        if data["member"]["user"]["bot"].as_bool().unwrap_or(false) {
            return;
        }

        let event = OccupancyEvent {
            guild_id,
            user_id,
            member_name: member_name(&data["member"]),
            joined: channel,
            left: previous,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.events.send(event).await {
            error!(error = %e, "failed to publish occupancy event");
        }
    }
}

/// Parse a snowflake string field.
fn parse_id<T: std::str::FromStr>(value: &Value) -> Option<T> {
    value.as_str()?.parse().ok()
}

/// Nickname, then global display name, then username.
fn member_name(member: &Value) -> Option<String> {
    [
        &member["nick"],
        &member["user"]["global_name"],
        &member["user"]["username"],
    ]
    .into_iter()
    .filter_map(|v| v.as_str())
    .find(|s| !s.is_empty())
    .map(str::to_string)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
