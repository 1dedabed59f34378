//! Concurrent probe execution and distress score accumulation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::confirmation::{ConfirmedActivation, SharedConfirmationWindow};
use crate::events::{SharedEventBus, VigilEvent};
use crate::probes::{Probe, ProbeDetection};

/// Aggregator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Score at which the window is confirmed without a second activation.
    pub auto_confirm_threshold: f64,
    /// How often each probe is asked for a sample.
    pub probe_interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            auto_confirm_threshold: 70.0,
            probe_interval_ms: 250,
        }
    }
}

impl AggregatorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// The per-window distress accumulator.
///
/// Contributions are summed as they arrive and the total is capped at
/// read time, so the result is the same no matter which probe reported
/// first.
#[derive(Debug, Clone)]
pub struct DistressScore {
    raw_total: f64,
    contributions: Vec<(String, f64)>,
    auto_confirm_threshold: f64,
}

impl DistressScore {
    pub fn new(auto_confirm_threshold: f64) -> Self {
        Self {
            raw_total: 0.0,
            contributions: Vec::new(),
            auto_confirm_threshold,
        }
    }

    /// Fold one detection in and return the new capped total.
    pub fn apply(&mut self, detection: &ProbeDetection) -> f64 {
        self.raw_total += detection.score_delta;
        self.contributions
            .push((detection.tag.clone(), detection.score_delta));
        self.total()
    }

    /// Capped total in `[0, 100]`.
    pub fn total(&self) -> f64 {
        self.raw_total.clamp(0.0, 100.0)
    }

    pub fn over_threshold(&self) -> bool {
        self.total() >= self.auto_confirm_threshold
    }

    /// Every `(tag, points)` pair folded in so far, in arrival order.
    pub fn contributions(&self) -> &[(String, f64)] {
        &self.contributions
    }
}

/// Read-only view of the running score, for status surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistressSnapshot {
    pub total: f64,
    pub contributions: Vec<(String, f64)>,
}

struct SessionState {
    score: DistressScore,
    /// Set by the first update that crosses the threshold. Later updates
    /// in the same window are dropped so the confirm path runs once.
    fired: bool,
}

/// State shared by every task of one window's probe session.
struct SessionShared {
    state: Mutex<SessionState>,
    window: SharedConfirmationWindow,
    bus: SharedEventBus,
    auto_tx: mpsc::Sender<ConfirmedActivation>,
    cancel: CancellationToken,
}

struct Session {
    shared: Arc<SessionShared>,
    tasks: Vec<JoinHandle<()>>,
}

/// Shared reference to the aggregator.
pub type SharedAggregator = Arc<DistressAggregator>;

/// Runs the configured probes for the lifetime of one confirmation window.
///
/// `begin_window` tears down any previous session before starting a new
/// one, so at most one set of probe tasks exists at a time. When the
/// accumulated score crosses the threshold the session confirms the
/// window through the same consuming transition a manual second
/// activation uses, pushes the outcome to the owner, and cancels itself.
pub struct DistressAggregator {
    config: AggregatorConfig,
    probes: Vec<Arc<dyn Probe>>,
    window: SharedConfirmationWindow,
    bus: SharedEventBus,
    auto_tx: mpsc::Sender<ConfirmedActivation>,
    session: Mutex<Option<Session>>,
}

impl DistressAggregator {
    pub fn new(
        config: AggregatorConfig,
        probes: Vec<Arc<dyn Probe>>,
        window: SharedConfirmationWindow,
        bus: SharedEventBus,
        auto_tx: mpsc::Sender<ConfirmedActivation>,
    ) -> Self {
        Self {
            config,
            probes,
            window,
            bus,
            auto_tx,
            session: Mutex::new(None),
        }
    }

    pub fn shared(self) -> SharedAggregator {
        Arc::new(self)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Start a probe session bounded to the window that just opened.
    ///
    /// Any session from a previous window is cancelled and awaited first,
    /// so stale probe tasks can never write into the new score.
    pub async fn begin_window(&self) {
        let mut slot = self.session.lock().await;
        if let Some(previous) = slot.take() {
            stop_session(previous).await;
        }

        let shared = Arc::new(SessionShared {
            state: Mutex::new(SessionState {
                score: DistressScore::new(self.config.auto_confirm_threshold),
                fired: false,
            }),
            window: self.window.clone(),
            bus: self.bus.clone(),
            auto_tx: self.auto_tx.clone(),
            cancel: CancellationToken::new(),
        });

        let window_duration = self.window.config().window_duration();
        let mut tasks = Vec::with_capacity(self.probes.len() + 1);
        for probe in &self.probes {
            tasks.push(tokio::spawn(probe_task(
                Arc::clone(probe),
                Arc::clone(&shared),
                self.config.probe_interval(),
            )));
        }
        tasks.push(tokio::spawn(closer_task(
            Arc::clone(&shared),
            window_duration,
        )));

        tracing::debug!(
            probes = self.probes.len(),
            threshold = self.config.auto_confirm_threshold,
            "probe session started"
        );
        *slot = Some(Session { shared, tasks });
    }

    /// Cancel the running session and wait for its tasks to finish.
    pub async fn stop(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            stop_session(session).await;
            tracing::debug!("probe session stopped");
        }
    }

    /// Current score view, or `None` when no session is running.
    pub async fn snapshot(&self) -> Option<DistressSnapshot> {
        let slot = self.session.lock().await;
        match slot.as_ref() {
            Some(session) => {
                let state = session.shared.state.lock().await;
                Some(DistressSnapshot {
                    total: state.score.total(),
                    contributions: state.score.contributions().to_vec(),
                })
            }
            None => None,
        }
    }
}

async fn stop_session(session: Session) {
    session.shared.cancel.cancel();
    for task in session.tasks {
        let _ = task.await;
    }
}

/// Sample one probe on a fixed cadence until the session ends.
///
/// A sample error retires this probe for the rest of the window; the
/// session keeps running on whatever probes remain.
async fn probe_task(probe: Arc<dyn Probe>, shared: Arc<SessionShared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                match probe.sample().await {
                    Ok(Some(detection)) => {
                        apply_detection(&probe, &shared, detection).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            probe = probe.name(),
                            error = %e,
                            "probe failed, contributes nothing for the rest of this window"
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// Fold one detection into the score and auto-confirm on threshold.
///
/// The add-and-check runs under the session's one state lock; the tasks
/// themselves never read the aggregate, so concurrent probes cannot lose
/// updates or double-fire.
async fn apply_detection(
    probe: &Arc<dyn Probe>,
    shared: &Arc<SessionShared>,
    detection: ProbeDetection,
) {
    let fired = {
        let mut state = shared.state.lock().await;
        if state.fired {
            return;
        }
        let total = state.score.apply(&detection);
        let _ = shared.bus.publish(VigilEvent::DistressUpdated {
            tag: detection.tag.clone(),
            delta: detection.score_delta,
            total,
            timestamp: Utc::now(),
        });
        tracing::debug!(
            probe = probe.name(),
            tag = %detection.tag,
            delta = detection.score_delta,
            total,
            "distress contribution"
        );
        if state.score.over_threshold() {
            state.fired = true;
            true
        } else {
            false
        }
    };

    if fired {
        if let Some(confirmed) = shared.window.confirm_auto().await {
            if shared.auto_tx.send(confirmed).await.is_err() {
                tracing::warn!("auto-confirm receiver dropped, outcome not delivered");
            }
        }
        shared.cancel.cancel();
    }
}

/// End the session when the window's own lifetime runs out.
async fn closer_task(shared: Arc<SessionShared>, window_duration: Duration) {
    tokio::select! {
        _ = shared.cancel.cancelled() => {}
        _ = tokio::time::sleep(window_duration) => {
            let state = shared.state.lock().await;
            if !state.fired && state.score.total() > 0.0 {
                tracing::debug!(
                    total = state.score.total(),
                    "window closed with partial distress score, discarding"
                );
            }
            drop(state);
            shared.cancel.cancel();
        }
    }
}
