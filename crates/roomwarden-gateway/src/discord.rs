//! Discord gateway — REST API v10 for lookups and mutations.
//!
//! Uses plain `reqwest` calls against the documented endpoints. No Discord
//! library required.
//!
//! Features:
//! - `404` on lookups and deletes is mapped to "gone", never an error
//! - `403 Missing Access` on lookups is "gone" too (the bot left the guild
//!   or lost sight of the channel)
//! - Rate-limit retry (HTTP 429) honouring `retry_after`
//! - Bounded retry on network errors and 5xx
//! - Voice occupancy answered from a shared `VoiceStateCache`

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use roomwarden_core::ids::{ChannelId, GuildId, MessageId, UserId};

use crate::base::{ChannelInfo, ChannelKind, Gateway, GuildInfo, VoiceChannelSpec};
use crate::error::GatewayError;
use crate::voice::VoiceStateCache;

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Discord REST API base URL.
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Discord voice channel type code.
const GUILD_VOICE: u64 = 2;

/// Attempts per REST call before giving up.
const MAX_ATTEMPTS: u32 = 3;

/// Request timeout.
const HTTP_TIMEOUT_SECS: u64 = 30;

/// JSON error code Discord sends with a 403 for resources the bot cannot see.
const MISSING_ACCESS: u64 = 50001;

// ─────────────────────────────────────────────
// REST plumbing
// ─────────────────────────────────────────────

/// Outcome of a REST call that did not fail.
#[derive(Debug)]
enum Reply {
    Ok(Value),
    NotFound,
}

/// Parse a snowflake field (`"123"`) into a typed id.
fn snowflake<T: FromStr>(value: &Value, field: &str) -> Result<T, GatewayError> {
    value[field]
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GatewayError::Decode(format!("missing or invalid `{field}`")))
}

/// Whether an error body carries Discord's `Missing Access` code.
fn is_missing_access(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["code"].as_u64())
        == Some(MISSING_ACCESS)
}

/// `retry_after` seconds from a 429 body, defaulting to one second.
fn retry_after(body: &str) -> Duration {
    let secs = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["retry_after"].as_f64())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .unwrap_or(1.0);
    Duration::from_secs_f64(secs)
}

// ─────────────────────────────────────────────
// DiscordGateway
// ─────────────────────────────────────────────

/// Discord platform access over REST.
pub struct DiscordGateway {
    /// Bot token from Discord Developer Portal.
    token: String,
    /// REST base URL, without trailing slash.
    api_base: String,
    /// HTTP client for REST API calls.
    http: reqwest::Client,
    /// Voice occupancy, fed by the listener.
    voice: Arc<VoiceStateCache>,
    /// Pause between retries of failed (non-429) calls.
    retry_delay: Duration,
}

impl DiscordGateway {
    /// Create a gateway for `token` against `api_base`.
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Transient(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http,
            voice: Arc::new(VoiceStateCache::new()),
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Share an existing voice cache (the one the listener writes to).
    pub fn with_voice_cache(mut self, voice: Arc<VoiceStateCache>) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn voice_cache(&self) -> Arc<VoiceStateCache> {
        self.voice.clone()
    }

    /// Send a REST request with retry on rate-limit and transient failure.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Reply, GatewayError> {
        let url = format!("{}{}", self.api_base, path);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token));
            if let Some(body) = body {
                req = req.json(body);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if attempts >= MAX_ATTEMPTS {
                        return Err(GatewayError::Transient(e.to_string()));
                    }
                    warn!(error = %e, attempt = attempts, path = %path, "discord request failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    continue;
                }
            };

            let status = resp.status();

            if status.is_success() {
                let text = resp
                    .text()
                    .await
                    .map_err(|e| GatewayError::Transient(e.to_string()))?;
                if text.trim().is_empty() {
                    return Ok(Reply::Ok(Value::Null));
                }
                return serde_json::from_str(&text)
                    .map(Reply::Ok)
                    .map_err(|e| GatewayError::Decode(e.to_string()));
            }

            if status.as_u16() == 404 {
                debug!(path = %path, "discord resource not found");
                return Ok(Reply::NotFound);
            }

            let body_text = resp.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                let wait = retry_after(&body_text);
                if attempts >= MAX_ATTEMPTS {
                    return Err(GatewayError::RateLimited { retry_after: wait });
                }
                warn!(
                    retry_after_s = wait.as_secs_f64(),
                    attempt = attempts,
                    "discord rate limited"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() && attempts < MAX_ATTEMPTS {
                warn!(status = %status, attempt = attempts, "discord server error, retrying");
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }

            return Err(GatewayError::from_status(status.as_u16(), body_text));
        }
    }

    /// GET for existence checks. Besides 404, a `Missing Access` 403 means
    /// the resource is out of the bot's reach for good.
    async fn lookup(&self, path: &str) -> Result<Reply, GatewayError> {
        match self.request(Method::GET, path, None).await {
            Err(GatewayError::Unauthorized(body)) if is_missing_access(&body) => {
                debug!(path = %path, "discord resource no longer accessible");
                Ok(Reply::NotFound)
            }
            other => other,
        }
    }

    /// Like `request`, but a 404 is an error (the target must exist).
    async fn request_existing(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        match self.request(method, path, body).await? {
            Reply::Ok(value) => Ok(value),
            Reply::NotFound => Err(GatewayError::Http {
                status: 404,
                body: format!("not found: {path}"),
            }),
        }
    }
}

#[async_trait]
impl Gateway for DiscordGateway {
    fn name(&self) -> &str {
        "discord"
    }

    async fn guild(&self, guild_id: GuildId) -> Result<Option<GuildInfo>, GatewayError> {
        match self.lookup(&format!("/guilds/{guild_id}")).await? {
            Reply::NotFound => Ok(None),
            Reply::Ok(data) => Ok(Some(GuildInfo {
                id: snowflake(&data, "id")?,
                name: data["name"].as_str().unwrap_or_default().to_string(),
            })),
        }
    }

    async fn channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelInfo>, GatewayError> {
        let data = match self.lookup(&format!("/channels/{channel_id}")).await? {
            Reply::NotFound => return Ok(None),
            Reply::Ok(data) => data,
        };

        // A channel from another guild (or a DM) is not the one we track.
        let owner: Option<GuildId> = data["guild_id"].as_str().and_then(|s| s.parse().ok());
        if owner != Some(guild_id) {
            debug!(channel = %channel_id, guild = %guild_id, "channel belongs elsewhere");
            return Ok(None);
        }

        Ok(Some(ChannelInfo {
            id: snowflake(&data, "id")?,
            guild_id,
            name: data["name"].as_str().unwrap_or_default().to_string(),
            kind: ChannelKind::from_discord_type(data["type"].as_u64().unwrap_or(u64::MAX)),
        }))
    }

    async fn occupant_count(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<usize, GatewayError> {
        self.voice
            .occupant_count(guild_id, channel_id)
            .await
            .ok_or_else(|| {
                GatewayError::Transient(format!("voice state for guild {guild_id} not synced yet"))
            })
    }

    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        spec: &VoiceChannelSpec,
    ) -> Result<ChannelId, GatewayError> {
        let mut body = json!({
            "name": spec.name,
            "type": GUILD_VOICE,
            "bitrate": spec.bitrate,
            "user_limit": spec.user_limit.get(),
        });
        if let Some(parent) = spec.parent_id {
            body["parent_id"] = json!(parent.to_string());
        }

        let data = self
            .request_existing(Method::POST, &format!("/guilds/{guild_id}/channels"), Some(&body))
            .await?;
        let id = snowflake(&data, "id")?;
        debug!(guild = %guild_id, channel = %id, "discord voice channel created");
        Ok(id)
    }

    async fn rename_channel(&self, channel_id: ChannelId, name: &str) -> Result<(), GatewayError> {
        let body = json!({ "name": name });
        self.request_existing(Method::PATCH, &format!("/channels/{channel_id}"), Some(&body))
            .await
            .map(|_| ())
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), GatewayError> {
        self.request(Method::DELETE, &format!("/channels/{channel_id}"), None)
            .await
            .map(|_| ())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), GatewayError> {
        // Unknown message and unknown channel both mean the message is gone.
        self.request(
            Method::DELETE,
            &format!("/channels/{channel_id}/messages/{message_id}"),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), GatewayError> {
        if self.voice.channel_of(guild_id, user_id).await == Some(channel_id) {
            debug!(user = %user_id, channel = %channel_id, "member already in target channel");
            return Ok(());
        }
        let body = json!({ "channel_id": channel_id.to_string() });
        self.request_existing(
            Method::PATCH,
            &format!("/guilds/{guild_id}/members/{user_id}"),
            Some(&body),
        )
        .await
        .map(|_| ())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn gateway(server: &MockServer) -> DiscordGateway {
        DiscordGateway::new("test_token", server.uri())
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(retry_after(r#"{"retry_after": 0.5}"#), Duration::from_millis(500));
        assert_eq!(retry_after("garbage"), Duration::from_secs(1));
        assert_eq!(retry_after(r#"{"retry_after": -3}"#), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_guild_found_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/1"))
            .and(header("Authorization", "Bot test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1", "name": "home"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/2"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": 10004})))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let guild = gw.guild(GuildId(1)).await.unwrap().unwrap();
        assert_eq!(guild.name, "home");
        assert!(gw.guild(GuildId(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_access_lookups_are_gone() {
        let server = MockServer::start().await;
        let missing_access = json!({"message": "Missing Access", "code": 50001});
        Mock::given(method("GET"))
            .and(path("/guilds/1"))
            .respond_with(ResponseTemplate::new(403).set_body_json(missing_access.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/5"))
            .respond_with(ResponseTemplate::new(403).set_body_json(missing_access))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/2"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"message": "Missing Permissions", "code": 50013})),
            )
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        assert!(gw.guild(GuildId(1)).await.unwrap().is_none());
        assert!(gw.channel(GuildId(1), ChannelId(5)).await.unwrap().is_none());
        assert!(matches!(
            gw.guild(GuildId(2)).await,
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_token_is_not_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/1"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "401: Unauthorized", "code": 0})),
            )
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        assert!(matches!(
            gw.guild(GuildId(1)).await,
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_in_other_guild_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"id": "5", "guild_id": "99", "name": "voice", "type": 2}),
            ))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        assert!(gw.channel(GuildId(1), ChannelId(5)).await.unwrap().is_none());
        let channel = gw.channel(GuildId(99), ChannelId(5)).await.unwrap().unwrap();
        assert_eq!(channel.kind, ChannelKind::Voice);
    }

    #[tokio::test]
    async fn test_create_voice_channel_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/guilds/1/channels"))
            .and(body_partial_json(json!({
                "name": "Lounge · ana",
                "type": 2,
                "user_limit": 4,
                "parent_id": "50"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "777"})))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let spec = VoiceChannelSpec {
            name: "Lounge · ana".into(),
            bitrate: 64_000,
            user_limit: NonZeroU32::new(4).unwrap(),
            parent_id: Some(ChannelId(50)),
        };
        assert_eq!(gw.create_voice_channel(GuildId(1), &spec).await.unwrap(), ChannelId(777));
    }

    #[tokio::test]
    async fn test_delete_message_unknown_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/channels/3/messages/4"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": 10008})))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        gw.delete_message(ChannelId(3), MessageId(4)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_message_forbidden_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/channels/3/messages/4"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Missing Permissions"))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let err = gw.delete_message(ChannelId(3), MessageId(4)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/channels/8"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"retry_after": 0.01, "global": false})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/channels/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "8"})))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        gw.delete_channel(ChannelId(8)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/channels/8"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"retry_after": 0.001})))
            .expect(3)
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let err = gw.rename_channel(ChannelId(8), "x").await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/1"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let err = gw.guild(GuildId(1)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rename_missing_channel_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/channels/8"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        let err = gw.rename_channel(ChannelId(8), "x").await.unwrap_err();
        assert!(matches!(err, GatewayError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_move_member_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guilds/1/members/42"))
            .and(body_partial_json(json!({"channel_id": "777"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server).await;
        gw.move_member(GuildId(1), UserId(42), ChannelId(777)).await.unwrap();
    }

    #[tokio::test]
    async fn test_move_into_current_channel_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guilds/1/members/42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let voice = Arc::new(VoiceStateCache::new());
        voice.update(GuildId(1), UserId(42), Some(ChannelId(777))).await;
        let gw = gateway(&server).await.with_voice_cache(voice);
        gw.move_member(GuildId(1), UserId(42), ChannelId(777)).await.unwrap();
    }

    #[tokio::test]
    async fn test_occupancy_requires_synced_guild() {
        let server = MockServer::start().await;
        let voice = Arc::new(VoiceStateCache::new());
        let gw = gateway(&server).await.with_voice_cache(voice.clone());

        assert!(gw.occupant_count(GuildId(1), ChannelId(2)).await.is_err());
        voice.replace_guild(GuildId(1), [(UserId(3), ChannelId(2))]).await;
        assert_eq!(gw.occupant_count(GuildId(1), ChannelId(2)).await.unwrap(), 1);
    }
}
