//! Countdown scan: keep each channel's name in step with the days left.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use roomwarden_core::date_at_offset;
use roomwarden_core::registry::{Mutation, RegistryState};
use roomwarden_core::types::{CountDownChannel, RecordId, ResourceKind, ZeroPolicy};
use roomwarden_gateway::{Gateway, GatewayError};

use crate::scan::{Reconcile, ScanCycle, Verdict};
use crate::settings::SettingsCache;

pub struct CountdownScan {
    gateway: Arc<dyn Gateway>,
    settings: Arc<SettingsCache>,
    at_zero: ZeroPolicy,
}

impl CountdownScan {
    pub fn new(gateway: Arc<dyn Gateway>, settings: Arc<SettingsCache>, at_zero: ZeroPolicy) -> Self {
        Self {
            gateway,
            settings,
            at_zero,
        }
    }
}

#[async_trait]
impl Reconcile for CountdownScan {
    type Record = CountDownChannel;
    type Resolved = ();

    fn kind(&self) -> ResourceKind {
        ResourceKind::CountDownChannel
    }

    fn records(&self, state: &RegistryState) -> Vec<CountDownChannel> {
        state.countdowns.clone()
    }

    fn record_id(&self, record: &CountDownChannel) -> RecordId {
        record.id
    }

    fn delete(&self, record: &CountDownChannel) -> Mutation {
        Mutation::DeleteCountDown(record.id)
    }

    async fn resolve(
        &self,
        record: &CountDownChannel,
        cycle: &mut ScanCycle,
    ) -> Result<Option<()>, GatewayError> {
        if !cycle.guild_present(self.gateway.as_ref(), record.guild_id).await? {
            return Ok(None);
        }
        let channel = self.gateway.channel(record.guild_id, record.channel_id).await?;
        Ok(channel.map(|_| ()))
    }

    async fn policy(&self, record: &CountDownChannel, _resolved: (), cycle: &mut ScanCycle) -> Verdict {
        let offset = self.settings.utc_offset(record.guild_id).await;
        let today = date_at_offset(cycle.now, offset);
        let days = record.days_until(today);
        let name = record.render(days);
        let delete = days <= 0 && self.at_zero == ZeroPolicy::Delete;

        let mut renamed = false;
        if record.rendered.as_deref() != Some(name.as_str()) {
            match self.gateway.rename_channel(record.channel_id, &name).await {
                Ok(()) => {
                    debug!(countdown = record.id, days, name = %name, "countdown renamed");
                    renamed = true;
                }
                Err(e) => {
                    warn!(countdown = record.id, channel = %record.channel_id, error = %e, "countdown rename failed");
                    if !delete {
                        return Verdict::Failed;
                    }
                }
            }
        }

        if delete {
            debug!(countdown = record.id, due = %record.due_date, "countdown reached zero, deleting");
            if let Err(e) = self.gateway.delete_channel(record.channel_id).await {
                warn!(countdown = record.id, channel = %record.channel_id, error = %e, "failed to delete countdown channel");
            }
            return Verdict::Delete;
        }

        if renamed {
            cycle.push(Mutation::SetCountDownRendered {
                id: record.id,
                rendered: name,
            });
            Verdict::Updated
        } else {
            Verdict::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::run_scan;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use roomwarden_core::ids::{ChannelId, GuildId};
    use roomwarden_core::registry::Registry;
    use roomwarden_core::types::GuildSettings;
    use roomwarden_gateway::{ChannelKind, GatewayOp, MemoryGateway};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn countdown(due: NaiveDate) -> Mutation {
        Mutation::InsertCountDown(CountDownChannel {
            id: 0,
            guild_id: GuildId(1),
            channel_id: ChannelId(50),
            name_pattern: "launch-in-{days}".into(),
            due_date: due,
            rendered: None,
            created_at: Utc::now(),
        })
    }

    async fn setup(due: NaiveDate) -> (Arc<Registry>, Arc<MemoryGateway>, Arc<SettingsCache>) {
        let registry = Arc::new(Registry::in_memory());
        registry.commit(countdown(due).into()).await.unwrap();
        let gw = Arc::new(MemoryGateway::new());
        gw.add_channel(GuildId(1), ChannelId(50), "launch", ChannelKind::Text);
        let settings = Arc::new(SettingsCache::new(registry.clone()));
        (registry, gw, settings)
    }

    #[tokio::test]
    async fn test_rename_then_idle() {
        let (registry, gw, settings) = setup(date(2024, 12, 25)).await;
        let scan = CountdownScan::new(gw.clone(), settings, ZeroPolicy::Persist);
        let now = Utc.with_ymd_and_hms(2024, 12, 20, 9, 0, 0).unwrap();

        let first = run_scan(&scan, &registry, now).await.unwrap();
        assert_eq!(first.updated, 1);
        assert_eq!(gw.channel_name(ChannelId(50)).as_deref(), Some("launch-in-5"));
        assert_eq!(
            registry.snapshot().await.countdowns[0].rendered.as_deref(),
            Some("launch-in-5")
        );

        let second = run_scan(&scan, &registry, now + Duration::hours(1)).await.unwrap();
        assert_eq!(second.mutations, 0);
        assert_eq!(gw.stats().renames, 1);
    }

    #[tokio::test]
    async fn test_guild_offset_decides_today() {
        let (registry, gw, settings) = setup(date(2024, 12, 25)).await;
        registry
            .commit(
                Mutation::UpsertGuildSettings(GuildSettings {
                    guild_id: GuildId(1),
                    utc_offset_minutes: 180,
                    room_name_template: None,
                })
                .into(),
            )
            .await
            .unwrap();
        let scan = CountdownScan::new(gw.clone(), settings, ZeroPolicy::Persist);
        // 22:00 UTC on the 20th is already the 21st at UTC+3
        let now = Utc.with_ymd_and_hms(2024, 12, 20, 22, 0, 0).unwrap();

        run_scan(&scan, &registry, now).await.unwrap();
        assert_eq!(gw.channel_name(ChannelId(50)).as_deref(), Some("launch-in-4"));
    }

    #[tokio::test]
    async fn test_past_due_persists_at_zero() {
        let (registry, gw, settings) = setup(date(2024, 12, 1)).await;
        let scan = CountdownScan::new(gw.clone(), settings, ZeroPolicy::Persist);
        let now = Utc.with_ymd_and_hms(2024, 12, 20, 9, 0, 0).unwrap();

        let report = run_scan(&scan, &registry, now).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(gw.channel_name(ChannelId(50)).as_deref(), Some("launch-in-0"));
    }

    #[tokio::test]
    async fn test_rename_failure_leaves_cache() {
        let (registry, gw, settings) = setup(date(2024, 12, 25)).await;
        gw.fail(GatewayOp::RenameChannel);
        let scan = CountdownScan::new(gw.clone(), settings, ZeroPolicy::Persist);
        let now = Utc.with_ymd_and_hms(2024, 12, 20, 9, 0, 0).unwrap();

        let report = run_scan(&scan, &registry, now).await.unwrap();
        assert_eq!(report.failures, 1);
        assert!(registry.snapshot().await.countdowns[0].rendered.is_none());
    }

    #[tokio::test]
    async fn test_delete_at_zero_survives_rename_failure() {
        let (registry, gw, settings) = setup(date(2024, 12, 20)).await;
        gw.fail(GatewayOp::RenameChannel);
        let scan = CountdownScan::new(gw.clone(), settings, ZeroPolicy::Delete);
        let now = Utc.with_ymd_and_hms(2024, 12, 20, 9, 0, 0).unwrap();

        let report = run_scan(&scan, &registry, now).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!gw.has_channel(ChannelId(50)));
        assert!(registry.snapshot().await.countdowns.is_empty());
    }
}
