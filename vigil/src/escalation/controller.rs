//! The escalation controller and its per-alert campaign tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertId, DispatchSeverity};
use crate::dispatch::{ChannelClass, DispatchError, SharedGateway};
use crate::escalation::state::{CampaignStep, EscalationConfig};
use crate::events::{FinishReason, SharedEventBus, VigilEvent};
use crate::records::{write_breadcrumbs, SharedRecordStore};

struct ActiveCampaign {
    alert: Alert,
    ack_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    /// Campaign generation, so a superseded campaign for the same id
    /// cannot remove its successor's entry.
    seq: u64,
}

type ActiveMap = Arc<Mutex<HashMap<AlertId, ActiveCampaign>>>;

/// Everything one campaign task needs, cloned out of the controller.
struct CampaignCtx {
    config: EscalationConfig,
    gateway: SharedGateway,
    store: SharedRecordStore,
    bus: SharedEventBus,
    active: ActiveMap,
    seq: u64,
}

/// Shared reference to the escalation controller.
pub type SharedEscalation = Arc<EscalationController>;

/// Runs one cancellable, time-gated notification campaign per alert.
///
/// Each campaign is its own task racing a watch channel (flipped by
/// acknowledgment) against the next timeline deadline, so an
/// acknowledgment wakes the campaign immediately instead of at the next
/// boundary. Channel failures are absorbed into the record store's retry
/// bookkeeping; the timeline itself never aborts because of them.
pub struct EscalationController {
    config: EscalationConfig,
    gateway: SharedGateway,
    store: SharedRecordStore,
    bus: SharedEventBus,
    active: ActiveMap,
    next_seq: AtomicU64,
}

impl EscalationController {
    pub fn new(
        config: EscalationConfig,
        gateway: SharedGateway,
        store: SharedRecordStore,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            config,
            gateway,
            store,
            bus,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Wrap in an Arc for sharing across components.
    pub fn shared(self) -> SharedEscalation {
        Arc::new(self)
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Take ownership of a confirmed alert and start its campaign.
    ///
    /// The caller has already written the durable record; the campaign's
    /// first dispatch runs as soon as the task is polled, with no
    /// scheduled delay.
    pub async fn start_campaign(&self, alert: Alert) -> AlertId {
        let id = alert.id;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (ack_tx, ack_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let ctx = CampaignCtx {
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            active: Arc::clone(&self.active),
            seq,
        };

        // Insert under the same lock the task's exit path takes, so the
        // campaign can never finish before its entry exists.
        let mut active = self.active.lock().await;
        let task = tokio::spawn(run_campaign(ctx, alert.clone(), ack_rx, cancel.clone()));
        active.insert(
            id,
            ActiveCampaign {
                alert,
                ack_tx,
                cancel,
                task,
                seq,
            },
        );
        tracing::info!(alert_id = %id, "escalation campaign started");
        id
    }

    /// Acknowledge one active alert. Returns false when no campaign for
    /// the id is running, which is not an error: the alert may already
    /// have finished.
    pub async fn acknowledge(&self, id: AlertId) -> bool {
        let mut active = self.active.lock().await;
        let Some(entry) = active.get_mut(&id) else {
            tracing::debug!(alert_id = %id, "acknowledgment for unknown or finished alert");
            return false;
        };
        entry.alert.acknowledged = true;
        let elapsed_ms = entry.alert.age().num_milliseconds().max(0) as u64;
        let _ = entry.ack_tx.send(true);
        drop(active);

        if let Err(e) = self.store.mark_acknowledged(id) {
            tracing::error!(alert_id = %id, error = %e, "failed to record acknowledgment");
        }
        let _ = self.bus.publish(VigilEvent::AlertAcknowledged {
            alert_id: id,
            elapsed_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(alert_id = %id, elapsed_ms, "alert acknowledged");
        true
    }

    /// Acknowledge every active alert, e.g. from a single panic-over
    /// button. Returns how many campaigns were stopped.
    pub async fn acknowledge_all(&self) -> usize {
        let ids: Vec<AlertId> = self.active.lock().await.keys().copied().collect();
        let mut count = 0;
        for id in ids {
            if self.acknowledge(id).await {
                count += 1;
            }
        }
        count
    }

    /// Snapshot of the alerts with running campaigns.
    pub async fn active_alerts(&self) -> Vec<Alert> {
        let active = self.active.lock().await;
        let mut alerts: Vec<Alert> = active.values().map(|c| c.alert.clone()).collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn is_active(&self, id: AlertId) -> bool {
        self.active.lock().await.contains_key(&id)
    }

    /// Cancel every running campaign and wait for the tasks to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<ActiveCampaign> = {
            let mut active = self.active.lock().await;
            active.drain().map(|(_, c)| c).collect()
        };
        if drained.is_empty() {
            return;
        }
        tracing::info!(campaigns = drained.len(), "cancelling active escalation campaigns");
        for campaign in &drained {
            campaign.cancel.cancel();
        }
        for campaign in drained {
            let _ = campaign.task.await;
        }
    }
}

async fn run_campaign(
    ctx: CampaignCtx,
    mut alert: Alert,
    mut ack_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let timeline = ctx.config.timeline();

    // First dispatch is immediate: every configured messaging channel,
    // before any waiting.
    dispatch_and_record(
        &ctx,
        &alert,
        DispatchSeverity::Initial,
        &[ChannelClass::Messaging],
    )
    .await;

    for scheduled in timeline {
        let deadline = started + scheduled.at;
        loop {
            if *ack_rx.borrow() {
                finish(&ctx, &alert, FinishReason::Acknowledged).await;
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    finish(&ctx, &alert, FinishReason::Cancelled).await;
                    return;
                }
                changed = ack_rx.changed() => {
                    if changed.is_err() {
                        // Controller gone; nobody can acknowledge anymore.
                        finish(&ctx, &alert, FinishReason::Cancelled).await;
                        return;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        match scheduled.step {
            CampaignStep::Escalate => {
                advance_level(&ctx, &mut alert, 1).await;
                tracing::info!(
                    alert_id = %alert.id,
                    "not acknowledged, raising audible alerting"
                );
                dispatch_and_record(
                    &ctx,
                    &alert,
                    DispatchSeverity::Escalated,
                    &[ChannelClass::Messaging, ChannelClass::Audible],
                )
                .await;
            }
            CampaignStep::AutoCall => {
                advance_level(&ctx, &mut alert, 2).await;
                tracing::warn!(
                    alert_id = %alert.id,
                    "still not acknowledged, initiating direct calling"
                );
                if !ctx.config.breadcrumb_dirs.is_empty() {
                    write_breadcrumbs(&alert, &ctx.config.breadcrumb_dirs);
                }
                dispatch_and_record(
                    &ctx,
                    &alert,
                    DispatchSeverity::Critical,
                    &[
                        ChannelClass::Messaging,
                        ChannelClass::Audible,
                        ChannelClass::Call,
                    ],
                )
                .await;
            }
            CampaignStep::Remind => {
                dispatch_and_record(
                    &ctx,
                    &alert,
                    DispatchSeverity::Reminder,
                    &[ChannelClass::Messaging],
                )
                .await;
            }
            CampaignStep::Finalize => break,
        }
    }

    tracing::warn!(
        alert_id = %alert.id,
        ceiling_s = ctx.config.ceiling_s,
        "campaign ceiling reached without acknowledgment"
    );
    finish(&ctx, &alert, FinishReason::CeilingReached).await;
}

/// Bump the alert's level in both the task's copy and the shared view.
async fn advance_level(ctx: &CampaignCtx, alert: &mut Alert, level: u8) {
    alert.escalation_level = level;
    if let Some(entry) = ctx.active.lock().await.get_mut(&alert.id) {
        if entry.seq == ctx.seq {
            entry.alert.escalation_level = level;
        }
    }
    let _ = ctx.bus.publish(VigilEvent::EscalationAdvanced {
        alert_id: alert.id,
        level,
        timestamp: Utc::now(),
    });
}

/// One dispatch pass plus its durable bookkeeping. Never fails: delivery
/// problems end up in the retry count and the event stream.
async fn dispatch_and_record(
    ctx: &CampaignCtx,
    alert: &Alert,
    severity: DispatchSeverity,
    classes: &[ChannelClass],
) {
    match ctx.gateway.send(classes, alert, severity).await {
        Ok(count) => {
            if let Err(e) = ctx.store.mark_sent(alert.id) {
                tracing::error!(alert_id = %alert.id, error = %e, "failed to record delivery");
            }
            let _ = ctx.bus.publish(VigilEvent::AlertDispatched {
                alert_id: alert.id,
                severity,
                sent: count.sent as u32,
                failed: count.failures.len() as u32,
                timestamp: Utc::now(),
            });
        }
        Err(e) => {
            let failed = match &e {
                DispatchError::AllFailed { failures } => failures.len() as u32,
                DispatchError::NoChannels => 0,
            };
            tracing::warn!(
                alert_id = %alert.id,
                %severity,
                error = %e,
                "dispatch pass delivered nothing"
            );
            match ctx.store.increment_retry(alert.id) {
                Ok(attempts) => {
                    tracing::debug!(alert_id = %alert.id, attempts, "failed attempt recorded")
                }
                Err(store_err) => {
                    tracing::error!(alert_id = %alert.id, error = %store_err, "failed to record retry")
                }
            }
            let _ = ctx.bus.publish(VigilEvent::AlertDispatched {
                alert_id: alert.id,
                severity,
                sent: 0,
                failed,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Remove the alert from the active set and announce the outcome.
async fn finish(ctx: &CampaignCtx, alert: &Alert, reason: FinishReason) {
    {
        let mut active = ctx.active.lock().await;
        if active.get(&alert.id).map(|c| c.seq) == Some(ctx.seq) {
            active.remove(&alert.id);
        }
    }
    let _ = ctx.bus.publish(VigilEvent::AlertFinished {
        alert_id: alert.id,
        reason,
        timestamp: Utc::now(),
    });
    tracing::info!(alert_id = %alert.id, %reason, "escalation campaign finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;
    use crate::dispatch::{AlertChannel, ChannelError, ChannelResult, DispatchGateway};
    use crate::events::EventBus;
    use crate::records::{AlertRecordStore, RecordStatus};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TimedChannel {
        name: String,
        class: ChannelClass,
        started: Instant,
        log: StdMutex<Vec<(AlertId, DispatchSeverity, u64)>>,
    }

    impl TimedChannel {
        fn new(name: &str, class: ChannelClass) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                class,
                started: Instant::now(),
                log: StdMutex::new(Vec::new()),
            })
        }

        fn log(&self) -> Vec<(AlertId, DispatchSeverity, u64)> {
            self.log.lock().unwrap().clone()
        }

        fn severities_at(&self) -> Vec<(DispatchSeverity, u64)> {
            self.log().into_iter().map(|(_, s, t)| (s, t)).collect()
        }
    }

    #[async_trait]
    impl AlertChannel for TimedChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn class(&self) -> ChannelClass {
            self.class
        }

        async fn deliver(&self, alert: &Alert, severity: DispatchSeverity) -> ChannelResult<()> {
            self.log
                .lock()
                .unwrap()
                .push((alert.id, severity, self.started.elapsed().as_secs()));
            Ok(())
        }
    }

    struct DeadChannel;

    #[async_trait]
    impl AlertChannel for DeadChannel {
        fn name(&self) -> &str {
            "dead"
        }

        fn class(&self) -> ChannelClass {
            ChannelClass::Messaging
        }

        async fn deliver(&self, _alert: &Alert, _severity: DispatchSeverity) -> ChannelResult<()> {
            Err(ChannelError::Unreachable("down".into()))
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: SharedRecordStore,
        bus: SharedEventBus,
        controller: EscalationController,
    }

    fn fixture_with(
        config: EscalationConfig,
        channels: Vec<Arc<dyn AlertChannel>>,
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = AlertRecordStore::open(dir.path().join("alerts.json"))
            .unwrap()
            .shared();
        let bus = EventBus::new().shared();
        let gateway = DispatchGateway::new(channels).shared();
        let controller =
            EscalationController::new(config, gateway, store.clone(), bus.clone());
        Fixture {
            _dir: dir,
            store,
            bus,
            controller,
        }
    }

    fn stored_alert(f: &Fixture) -> Alert {
        let alert = Alert::new(AlertKind::Manual, "help");
        f.store.store(&alert).unwrap();
        alert
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<VigilEvent>) -> Vec<VigilEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_campaign_walks_the_full_timeline() {
        let messaging = TimedChannel::new("sms", ChannelClass::Messaging);
        let audible = TimedChannel::new("siren", ChannelClass::Audible);
        let call = TimedChannel::new("dialer", ChannelClass::Call);
        let f = fixture_with(
            EscalationConfig::default(),
            vec![
                messaging.clone() as Arc<dyn AlertChannel>,
                audible.clone(),
                call.clone(),
            ],
        );
        let mut rx = f.bus.subscribe();
        let alert = stored_alert(&f);

        f.controller.start_campaign(alert.clone()).await;
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(
            messaging.severities_at(),
            vec![
                (DispatchSeverity::Initial, 0),
                (DispatchSeverity::Escalated, 15),
                (DispatchSeverity::Critical, 30),
                (DispatchSeverity::Reminder, 60),
                (DispatchSeverity::Reminder, 120),
                (DispatchSeverity::Reminder, 180),
                (DispatchSeverity::Reminder, 240),
            ]
        );
        assert_eq!(
            audible.severities_at(),
            vec![
                (DispatchSeverity::Escalated, 15),
                (DispatchSeverity::Critical, 30),
            ]
        );
        assert_eq!(
            call.severities_at(),
            vec![(DispatchSeverity::Critical, 30)]
        );

        assert_eq!(f.controller.active_count().await, 0);
        assert_eq!(f.store.get(alert.id).unwrap().status, RecordStatus::Sent);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            VigilEvent::AlertFinished { reason: FinishReason::CeilingReached, .. }
        )));
        let levels: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                VigilEvent::EscalationAdvanced { level, .. } => Some(*level),
                _ => None,
            })
            .collect();
        assert_eq!(levels, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_acknowledgment_stops_the_campaign() {
        let messaging = TimedChannel::new("sms", ChannelClass::Messaging);
        let f = fixture_with(
            EscalationConfig::default(),
            vec![messaging.clone() as Arc<dyn AlertChannel>],
        );
        let mut rx = f.bus.subscribe();
        let alert = stored_alert(&f);

        f.controller.start_campaign(alert.clone()).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.controller.acknowledge(alert.id).await);

        // The watch wake is immediate; give the task one tick to exit.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.controller.active_count().await, 0);

        // No escalated dispatch ever happened.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            messaging.severities_at(),
            vec![(DispatchSeverity::Initial, 0)]
        );
        assert_eq!(
            f.store.get(alert.id).unwrap().status,
            RecordStatus::Acknowledged
        );

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            VigilEvent::AlertFinished { reason: FinishReason::Acknowledged, .. }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, VigilEvent::AlertAcknowledged { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_call_disabled_skips_the_call_step() {
        let audible = TimedChannel::new("siren", ChannelClass::Audible);
        let call = TimedChannel::new("dialer", ChannelClass::Call);
        let config = EscalationConfig {
            auto_call_enabled: false,
            ..EscalationConfig::default()
        };
        let f = fixture_with(
            config,
            vec![audible.clone() as Arc<dyn AlertChannel>, call.clone()],
        );
        let alert = stored_alert(&f);

        f.controller.start_campaign(alert).await;
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(
            audible.severities_at(),
            vec![(DispatchSeverity::Escalated, 15)]
        );
        assert!(call.severities_at().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_failures_never_stall_the_timeline() {
        let f = fixture_with(
            EscalationConfig::default(),
            vec![Arc::new(DeadChannel) as Arc<dyn AlertChannel>],
        );
        let mut rx = f.bus.subscribe();
        let alert = stored_alert(&f);

        f.controller.start_campaign(alert.clone()).await;
        tokio::time::sleep(Duration::from_secs(301)).await;

        let record = f.store.get(alert.id).unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert!(record.retry_count >= crate::records::MAX_DISPATCH_ATTEMPTS);

        // The campaign still ran to its ceiling.
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            VigilEvent::AlertFinished { reason: FinishReason::CeilingReached, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breadcrumbs_written_at_auto_call_step() {
        let crumbs = TempDir::new().unwrap();
        let messaging = TimedChannel::new("sms", ChannelClass::Messaging);
        let config = EscalationConfig {
            breadcrumb_dirs: vec![crumbs.path().to_path_buf()],
            ..EscalationConfig::default()
        };
        let f = fixture_with(config, vec![messaging as Arc<dyn AlertChannel>]);
        let alert = stored_alert(&f);
        let name = format!("vigil-emergency-{}.json", alert.id);

        f.controller.start_campaign(alert).await;
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!crumbs.path().join(&name).exists());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(crumbs.path().join(&name).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_campaigns_are_independent() {
        let messaging = TimedChannel::new("sms", ChannelClass::Messaging);
        let f = fixture_with(
            EscalationConfig::default(),
            vec![messaging.clone() as Arc<dyn AlertChannel>],
        );
        let first = stored_alert(&f);
        let second = stored_alert(&f);

        f.controller.start_campaign(first.clone()).await;
        f.controller.start_campaign(second.clone()).await;
        assert_eq!(f.controller.active_count().await, 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.controller.acknowledge(first.id).await);
        tokio::time::sleep(Duration::from_secs(20)).await;

        // Only the unacknowledged alert escalated.
        let escalated: Vec<AlertId> = messaging
            .log()
            .into_iter()
            .filter(|(_, severity, _)| *severity == DispatchSeverity::Escalated)
            .map(|(id, _, _)| id)
            .collect();
        assert_eq!(escalated, vec![second.id]);
        assert!(f.controller.is_active(second.id).await);
        assert!(!f.controller.is_active(first.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_unknown_alert_is_false() {
        let f = fixture_with(EscalationConfig::default(), vec![]);
        assert!(!f.controller.acknowledge(AlertId::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_running_campaigns() {
        let messaging = TimedChannel::new("sms", ChannelClass::Messaging);
        let f = fixture_with(
            EscalationConfig::default(),
            vec![messaging as Arc<dyn AlertChannel>],
        );
        let mut rx = f.bus.subscribe();
        let alert = stored_alert(&f);

        f.controller.start_campaign(alert).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        f.controller.shutdown().await;

        assert_eq!(f.controller.active_count().await, 0);
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            VigilEvent::AlertFinished { reason: FinishReason::Cancelled, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_alerts_reflect_escalation_level() {
        let messaging = TimedChannel::new("sms", ChannelClass::Messaging);
        let f = fixture_with(
            EscalationConfig::default(),
            vec![messaging as Arc<dyn AlertChannel>],
        );
        let alert = stored_alert(&f);
        f.controller.start_campaign(alert).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.controller.active_alerts().await[0].escalation_level, 0);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(f.controller.active_alerts().await[0].escalation_level, 1);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(f.controller.active_alerts().await[0].escalation_level, 2);
    }
}
