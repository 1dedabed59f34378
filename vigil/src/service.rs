//! The composed vigil service.
//!
//! Wires the confirmation window, distress aggregator, consensus filter,
//! record store, dispatch gateway and escalation controller into one
//! startable unit. Collaborators (probes, channels, acknowledgment
//! sources, location and evidence capture) are injected before start, so
//! hardware-free hosts and tests run the same pipeline with different
//! edges.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertId, AlertKind};
use crate::capture::{
    EvidenceCollector, LocationProvider, NullEvidenceCollector, NullLocationProvider,
};
use crate::config::VigilConfig;
use crate::confirmation::{
    ActivationOutcome, ConfirmationWindow, ConfirmedActivation, SharedConfirmationWindow,
};
use crate::consensus::{ConsensusOutcome, ThreatConsensusFilter, ThreatObservation};
use crate::dispatch::{AlertChannel, DispatchGateway};
use crate::escalation::{EscalationController, SharedEscalation};
use crate::events::{EventBus, SharedEventBus, VigilEvent};
use crate::probes::{DistressAggregator, DistressSnapshot, Probe, SharedAggregator};
use crate::records::{AlertRecordStore, SharedRecordStore, StoreResult};

/// One acknowledgment request from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRequest {
    /// Specific alert to acknowledge, or `None` for everything active.
    pub alert: Option<AlertId>,
}

impl AckRequest {
    pub fn all() -> Self {
        Self { alert: None }
    }

    pub fn for_alert(id: AlertId) -> Self {
        Self { alert: Some(id) }
    }
}

/// A stream of acknowledgment requests, e.g. a hardware button, a
/// console keypress loop or a network endpoint.
#[async_trait]
pub trait AcknowledgmentSource: Send {
    fn name(&self) -> &str;

    /// Next request. `None` means the source is exhausted and its drain
    /// task should end.
    async fn next_ack(&mut self) -> Option<AckRequest>;
}

/// Channel-backed acknowledgment source paired with an [`AckTrigger`].
pub struct ChannelAckSource {
    name: String,
    rx: mpsc::UnboundedReceiver<AckRequest>,
}

impl ChannelAckSource {
    pub fn new(name: impl Into<String>) -> (Self, AckTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                rx,
            },
            AckTrigger { tx },
        )
    }
}

#[async_trait]
impl AcknowledgmentSource for ChannelAckSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_ack(&mut self) -> Option<AckRequest> {
        self.rx.recv().await
    }
}

/// Sending half of a [`ChannelAckSource`].
#[derive(Clone)]
pub struct AckTrigger {
    tx: mpsc::UnboundedSender<AckRequest>,
}

impl AckTrigger {
    /// Acknowledge every active alert.
    pub fn ack_all(&self) {
        if self.tx.send(AckRequest::all()).is_err() {
            tracing::debug!("acknowledgment dropped, service stopped");
        }
    }

    /// Acknowledge one alert.
    pub fn ack(&self, id: AlertId) {
        if self.tx.send(AckRequest::for_alert(id)).is_err() {
            tracing::debug!("acknowledgment dropped, service stopped");
        }
    }
}

/// One background analysis sample for the consensus filter.
#[derive(Debug, Clone)]
pub struct BackgroundObservation {
    pub anomaly_vote: bool,
    pub max_pattern_score: f64,
    pub tags: Vec<String>,
}

/// Hand-off for continuous background monitoring. Detectors push their
/// samples here; the service's intake task folds them into the consensus
/// filter.
#[derive(Clone)]
pub struct ObservationFeed {
    tx: mpsc::UnboundedSender<BackgroundObservation>,
}

impl ObservationFeed {
    pub fn submit(&self, anomaly_vote: bool, max_pattern_score: f64, tags: Vec<String>) {
        let observation = BackgroundObservation {
            anomaly_vote,
            max_pattern_score,
            tags,
        };
        if self.tx.send(observation).is_err() {
            tracing::debug!("observation dropped, service stopped");
        }
    }
}

/// Point-in-time view of the pipeline for status displays.
#[derive(Debug, Clone)]
pub struct VigilStatus {
    pub window_active: bool,
    pub window_remaining: Option<Duration>,
    pub distress: Option<DistressSnapshot>,
    pub active_alerts: Vec<Alert>,
}

/// Everything the alert-raising path needs, shared with the background
/// tasks that raise alerts on their own.
#[derive(Clone)]
struct RaiseCtx {
    bus: SharedEventBus,
    store: SharedRecordStore,
    escalation: SharedEscalation,
    location: Arc<dyn LocationProvider>,
    evidence: Arc<dyn EvidenceCollector>,
}

/// Fold one observation into the filter and raise an alert when the
/// filter fires. Shared by the direct ingest path and the intake task.
async fn observe_and_raise(
    ctx: &RaiseCtx,
    filter: &Mutex<ThreatConsensusFilter>,
    anomaly_vote: bool,
    max_pattern_score: f64,
    tags: Vec<String>,
) -> Option<ConsensusOutcome> {
    let outcome = {
        let mut filter = filter.lock().await;
        let level = filter.composite_level(anomaly_vote, max_pattern_score);
        filter.observe(ThreatObservation::new(level, tags))
    }?;

    let _ = ctx.bus.publish(VigilEvent::ConsensusReached {
        tags: outcome.tags.clone(),
        peak_level: outcome.peak_level,
        observations: outcome.observations as u32,
        timestamp: Utc::now(),
    });
    let message = format!("threat consensus: {}", outcome.tags.join(", "));
    raise_alert(ctx, AlertKind::ThreatConsensus, message).await;
    Some(outcome)
}

/// Capture context, write the durable record, start the campaign.
///
/// The record always lands (or loudly fails) before the first dispatch
/// attempt, so a crash mid-dispatch leaves a pending record to redeliver
/// on the next start.
async fn raise_alert(ctx: &RaiseCtx, kind: AlertKind, message: String) -> AlertId {
    let location = ctx.location.current().await;
    let evidence = ctx.evidence.capture().await;
    let alert = Alert::new(kind, message)
        .with_location(location)
        .with_evidence(evidence);

    if let Err(e) = ctx.store.store(&alert) {
        tracing::error!(
            alert_id = %alert.id,
            error = %e,
            "durable record write failed, dispatching anyway"
        );
        let _ = ctx.bus.publish(VigilEvent::RecordPersistFailed {
            alert_id: alert.id,
            error: e.to_string(),
            timestamp: Utc::now(),
        });
    }

    let id = alert.id;
    ctx.escalation.start_campaign(alert).await;
    let _ = ctx.bus.publish(VigilEvent::AlertRaised {
        alert_id: id,
        kind,
        timestamp: Utc::now(),
    });
    tracing::warn!(alert_id = %id, %kind, "alert raised");
    id
}

/// Builder injecting collaborators before the service starts.
pub struct VigilBuilder {
    config: VigilConfig,
    probes: Vec<Arc<dyn Probe>>,
    channels: Vec<Arc<dyn AlertChannel>>,
    ack_sources: Vec<Box<dyn AcknowledgmentSource>>,
    location: Arc<dyn LocationProvider>,
    evidence: Arc<dyn EvidenceCollector>,
}

impl VigilBuilder {
    pub fn new(config: VigilConfig) -> Self {
        Self {
            config,
            probes: Vec::new(),
            channels: Vec::new(),
            ack_sources: Vec::new(),
            location: Arc::new(NullLocationProvider),
            evidence: Arc::new(NullEvidenceCollector),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_ack_source(mut self, source: Box<dyn AcknowledgmentSource>) -> Self {
        self.ack_sources.push(source);
        self
    }

    pub fn with_location_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.location = provider;
        self
    }

    pub fn with_evidence_collector(mut self, collector: Arc<dyn EvidenceCollector>) -> Self {
        self.evidence = collector;
        self
    }

    /// Open the record store, wire the pipeline and spawn the background
    /// tasks. Pending records from a previous run are redelivered when
    /// the config asks for it.
    pub async fn start(self) -> StoreResult<Vigil> {
        let bus = EventBus::new().shared();
        let store = AlertRecordStore::open(&self.config.record_path)?.shared();
        let gateway = DispatchGateway::new(self.channels).shared();
        let channel_count = gateway.channel_count();
        let escalation = EscalationController::new(
            self.config.escalation.clone(),
            gateway.clone(),
            store.clone(),
            bus.clone(),
        )
        .shared();
        let window = ConfirmationWindow::new(self.config.window.clone(), bus.clone()).shared();
        let (auto_tx, auto_rx) = mpsc::channel(8);
        let aggregator = DistressAggregator::new(
            self.config.aggregator.clone(),
            self.probes,
            window.clone(),
            bus.clone(),
            auto_tx,
        )
        .shared();

        let ctx = RaiseCtx {
            bus,
            store,
            escalation,
            location: self.location,
            evidence: self.evidence,
        };
        let consensus = Arc::new(Mutex::new(ThreatConsensusFilter::new(
            self.config.consensus.clone(),
        )));
        let (obs_tx, obs_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(auto_confirm_task(
            ctx.clone(),
            auto_rx,
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(observation_intake_task(
            ctx.clone(),
            consensus.clone(),
            obs_rx,
            cancel.clone(),
        )));
        for source in self.ack_sources {
            tasks.push(tokio::spawn(ack_drain_task(
                ctx.escalation.clone(),
                source,
                cancel.clone(),
            )));
        }

        let service = Vigil {
            config: self.config,
            ctx,
            window,
            aggregator,
            consensus,
            feed: ObservationFeed { tx: obs_tx },
            cancel,
            tasks: Mutex::new(tasks),
        };

        if service.config.redeliver_on_start {
            service.redeliver_pending().await;
        }
        tracing::info!(
            probes = service.aggregator.probe_count(),
            channels = channel_count,
            "vigil service started"
        );
        Ok(service)
    }
}

/// Raises an alert for every auto-confirmation the aggregator produces.
async fn auto_confirm_task(
    ctx: RaiseCtx,
    mut auto_rx: mpsc::Receiver<ConfirmedActivation>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            confirmation = auto_rx.recv() => {
                let Some(confirmation) = confirmation else { break };
                let message = format!(
                    "distress signals auto-confirmed {:.1}s into the window",
                    confirmation.response_time.as_secs_f64()
                );
                raise_alert(&ctx, AlertKind::AutoConfirmed, message).await;
            }
        }
    }
}

/// Drains the observation feed into the consensus filter.
async fn observation_intake_task(
    ctx: RaiseCtx,
    consensus: Arc<Mutex<ThreatConsensusFilter>>,
    mut obs_rx: mpsc::UnboundedReceiver<BackgroundObservation>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            observation = obs_rx.recv() => {
                let Some(obs) = observation else { break };
                observe_and_raise(
                    &ctx,
                    &consensus,
                    obs.anomaly_vote,
                    obs.max_pattern_score,
                    obs.tags,
                )
                .await;
            }
        }
    }
}

/// Forwards acknowledgment requests from one source to the controller.
async fn ack_drain_task(
    escalation: SharedEscalation,
    mut source: Box<dyn AcknowledgmentSource>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = source.next_ack() => {
                match request {
                    Some(AckRequest { alert: Some(id) }) => {
                        escalation.acknowledge(id).await;
                    }
                    Some(AckRequest { alert: None }) => {
                        escalation.acknowledge_all().await;
                    }
                    None => {
                        tracing::debug!(source = source.name(), "acknowledgment source exhausted");
                        break;
                    }
                }
            }
        }
    }
}

/// The running service.
pub struct Vigil {
    config: VigilConfig,
    ctx: RaiseCtx,
    window: SharedConfirmationWindow,
    aggregator: SharedAggregator,
    consensus: Arc<Mutex<ThreatConsensusFilter>>,
    feed: ObservationFeed,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Vigil {
    /// One press of the panic trigger.
    ///
    /// The first press opens the confirmation window and starts probe
    /// aggregation; a second press inside the window confirms and raises
    /// the alert.
    pub async fn activate(&self) -> ActivationOutcome {
        let outcome = self.window.register_activation().await;
        match &outcome {
            ActivationOutcome::FirstActivation { .. }
            | ActivationOutcome::WindowReopened { .. } => {
                self.aggregator.begin_window().await;
            }
            ActivationOutcome::Confirmed(confirmation) => {
                self.aggregator.stop().await;
                let message = format!(
                    "confirmed by second activation after {:.1}s",
                    confirmation.response_time.as_secs_f64()
                );
                raise_alert(&self.ctx, AlertKind::Manual, message).await;
            }
        }
        outcome
    }

    /// Feed one background observation into the consensus filter.
    ///
    /// Raises a threat-consensus alert when enough recent observations
    /// agree; a single observation never does.
    pub async fn ingest_observation(
        &self,
        anomaly_vote: bool,
        max_pattern_score: f64,
        tags: Vec<String>,
    ) -> Option<ConsensusOutcome> {
        observe_and_raise(
            &self.ctx,
            &self.consensus,
            anomaly_vote,
            max_pattern_score,
            tags,
        )
        .await
    }

    /// Handle for background detectors to push observations without
    /// holding a reference to the service.
    pub fn observation_feed(&self) -> ObservationFeed {
        self.feed.clone()
    }

    /// Raise an alert directly, bypassing confirmation. Used for
    /// redelivery and for externally confirmed emergencies.
    pub async fn raise(&self, kind: AlertKind, message: impl Into<String>) -> AlertId {
        raise_alert(&self.ctx, kind, message.into()).await
    }

    /// Acknowledge one alert. Returns false when it is not active.
    pub async fn acknowledge(&self, id: AlertId) -> bool {
        self.ctx.escalation.acknowledge(id).await
    }

    /// Acknowledge every active alert.
    pub async fn acknowledge_all(&self) -> usize {
        self.ctx.escalation.acknowledge_all().await
    }

    /// Restart campaigns for records still pending from a previous run.
    pub async fn redeliver_pending(&self) -> usize {
        let pending = match self.ctx.store.get_pending() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "could not read pending records");
                return 0;
            }
        };

        let mut redelivered = 0;
        for record in pending {
            if self.ctx.escalation.is_active(record.id).await {
                continue;
            }
            tracing::info!(
                alert_id = %record.id,
                created_at = %record.created_at,
                "redelivering pending alert from previous run"
            );
            self.ctx.escalation.start_campaign(record.to_alert()).await;
            redelivered += 1;
        }
        redelivered
    }

    pub async fn status(&self) -> VigilStatus {
        VigilStatus {
            window_active: self.window.is_window_active().await,
            window_remaining: self.window.get_time_remaining().await,
            distress: self.aggregator.snapshot().await,
            active_alerts: self.ctx.escalation.active_alerts().await,
        }
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.ctx.bus
    }

    pub fn store(&self) -> &SharedRecordStore {
        &self.ctx.store
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    /// Stop background tasks, probe sessions, timers and campaigns.
    pub async fn shutdown(&self) {
        tracing::info!("vigil service shutting down");
        self.cancel.cancel();
        let drained: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in drained {
            let _ = task.await;
        }
        self.aggregator.stop().await;
        self.window.reset().await;
        self.ctx.escalation.shutdown().await;
    }
}
