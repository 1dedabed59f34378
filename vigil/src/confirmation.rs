//! Double-activation confirmation window.
//!
//! A first activation opens a short window; a second activation inside it
//! confirms the emergency. The distress aggregator can confirm the same
//! window automatically through [`ConfirmationWindow::confirm_auto`], which
//! shares the consuming transition with manual confirmation so exactly one
//! of them wins.
//!
//! Every transition runs under one mutex that the expiry timer also takes,
//! so a register call and the timer firing can never race. The timer is
//! cancelled synchronously, while the lock is held, before any transition
//! that consumes the window; a stale timer that already fired checks the
//! window generation and no-ops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{SharedEventBus, VigilEvent};

/// Confirmation window tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Seconds a first activation stays confirmable.
    pub window_seconds: u32,
    /// Timer slack past the window end, so a second activation arriving at
    /// the boundary beats the timer instead of racing it.
    pub expiry_grace_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_seconds: 7,
            expiry_grace_ms: 500,
        }
    }
}

impl WindowConfig {
    /// Validity window for a second activation.
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_seconds))
    }

    /// Sleep duration for the expiry timer (window plus grace).
    pub fn timer_duration(&self) -> Duration {
        self.window_duration() + Duration::from_millis(self.expiry_grace_ms)
    }
}

/// A confirmed activation, manual or automatic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmedActivation {
    /// Time between the first activation and the confirming one.
    pub response_time: Duration,
    /// True when the distress aggregator confirmed instead of the user.
    pub auto: bool,
}

/// Result of a single `register_activation` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivationOutcome {
    /// No window was open; one was opened.
    FirstActivation { remaining: Duration },
    /// A window was open and this activation confirmed it.
    Confirmed(ConfirmedActivation),
    /// The previous window had expired unobserved; a new one was opened.
    /// Differs from `FirstActivation` only for UX messaging.
    WindowReopened { remaining: Duration },
}

enum Phase {
    Idle,
    Open { opened_at: Instant },
}

struct ExpiryTimer {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

struct WindowState {
    phase: Phase,
    /// Window generation. Bumped on every open; a timer wakeup for an older
    /// generation is stale and must not touch the state.
    epoch: u64,
    /// Set when a window expired and no register call has observed it yet.
    expired_unobserved: bool,
    timer: Option<ExpiryTimer>,
}

/// Shared reference to the confirmation window.
pub type SharedConfirmationWindow = Arc<ConfirmationWindow>;

/// The double-activation state machine.
pub struct ConfirmationWindow {
    config: WindowConfig,
    bus: SharedEventBus,
    state: Arc<Mutex<WindowState>>,
}

impl ConfirmationWindow {
    pub fn new(config: WindowConfig, bus: SharedEventBus) -> Self {
        Self {
            config,
            bus,
            state: Arc::new(Mutex::new(WindowState {
                phase: Phase::Idle,
                epoch: 0,
                expired_unobserved: false,
                timer: None,
            })),
        }
    }

    /// Wrap in an Arc for sharing across components.
    pub fn shared(self) -> SharedConfirmationWindow {
        Arc::new(self)
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Register an activation (the panic-button press).
    ///
    /// Opens a window when none is active, confirms when one is, and
    /// reopens when the previous window expired before this call observed
    /// it. All decisions are made here, under the lock; the read-only
    /// queries never drive control flow.
    pub async fn register_activation(&self) -> ActivationOutcome {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed <= self.config.window_duration() {
                    Self::consume(&mut state);
                    let _ = self.bus.publish(VigilEvent::WindowConfirmed {
                        auto: false,
                        response_time_ms: elapsed.as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    tracing::info!(
                        response_time_ms = elapsed.as_millis() as u64,
                        "second activation confirmed the emergency"
                    );
                    ActivationOutcome::Confirmed(ConfirmedActivation {
                        response_time: elapsed,
                        auto: false,
                    })
                } else {
                    // Window over-age but the grace-padded timer has not
                    // fired yet: expire it here and start over.
                    Self::consume(&mut state);
                    let _ = self
                        .bus
                        .publish(VigilEvent::WindowExpired { timestamp: Utc::now() });
                    self.open(&mut state, true);
                    ActivationOutcome::WindowReopened {
                        remaining: self.config.window_duration(),
                    }
                }
            }
            Phase::Idle => {
                let reopened = state.expired_unobserved;
                state.expired_unobserved = false;
                self.open(&mut state, reopened);
                let remaining = self.config.window_duration();
                if reopened {
                    ActivationOutcome::WindowReopened { remaining }
                } else {
                    ActivationOutcome::FirstActivation { remaining }
                }
            }
        }
    }

    /// Confirm the open window on behalf of the distress aggregator.
    ///
    /// Returns `None` when no confirmable window exists, which makes the
    /// auto path idempotent and mutually exclusive with a concurrent manual
    /// confirmation: whichever takes the lock first consumes the window,
    /// the other sees `Idle` and backs off.
    pub async fn confirm_auto(&self) -> Option<ConfirmedActivation> {
        let mut state = self.state.lock().await;
        if let Phase::Open { opened_at } = state.phase {
            let elapsed = opened_at.elapsed();
            if elapsed <= self.config.window_duration() {
                Self::consume(&mut state);
                let _ = self.bus.publish(VigilEvent::WindowConfirmed {
                    auto: true,
                    response_time_ms: elapsed.as_millis() as u64,
                    timestamp: Utc::now(),
                });
                tracing::info!(
                    response_time_ms = elapsed.as_millis() as u64,
                    "distress score auto-confirmed the emergency"
                );
                return Some(ConfirmedActivation {
                    response_time: elapsed,
                    auto: true,
                });
            }
        }
        None
    }

    /// Time left before the open window expires. Read-only.
    pub async fn get_time_remaining(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        if let Phase::Open { opened_at } = state.phase {
            let elapsed = opened_at.elapsed();
            let window = self.config.window_duration();
            if elapsed <= window {
                return Some(window - elapsed);
            }
        }
        None
    }

    /// Whether a confirmable window is currently open. Read-only.
    pub async fn is_window_active(&self) -> bool {
        self.get_time_remaining().await.is_some()
    }

    /// Explicitly tear the window down, cancelling any pending timer.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        Self::consume(&mut state);
        tracing::debug!("confirmation window reset");
    }

    /// Open a new window and arm its expiry timer. Caller holds the lock.
    fn open(&self, state: &mut WindowState, reopened: bool) {
        state.epoch += 1;
        let epoch = state.epoch;
        state.phase = Phase::Open {
            opened_at: Instant::now(),
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(expiry_task(
            Arc::clone(&self.state),
            self.bus.clone(),
            cancel.clone(),
            epoch,
            self.config.timer_duration(),
        ));
        state.timer = Some(ExpiryTimer { cancel, task });

        let window = self.config.window_duration();
        let _ = self.bus.publish(VigilEvent::WindowOpened {
            reopened,
            expires_in_ms: window.as_millis() as u64,
            timestamp: Utc::now(),
        });
        tracing::info!(
            window_s = self.config.window_seconds,
            reopened,
            "confirmation window opened"
        );
    }

    /// Cancel the timer and return the window to `Idle`. Caller holds the
    /// lock, so this is synchronous with respect to any transition.
    fn consume(state: &mut WindowState) {
        Self::cancel_timer(state);
        state.phase = Phase::Idle;
        state.expired_unobserved = false;
    }

    fn cancel_timer(state: &mut WindowState) {
        if let Some(timer) = state.timer.take() {
            timer.cancel.cancel();
            timer.task.abort();
        }
    }
}

async fn expiry_task(
    state: Arc<Mutex<WindowState>>,
    bus: SharedEventBus,
    cancel: CancellationToken,
    epoch: u64,
    wait: Duration,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(wait) => {
            let mut state = state.lock().await;
            if state.epoch == epoch && matches!(state.phase, Phase::Open { .. }) {
                state.phase = Phase::Idle;
                state.expired_unobserved = true;
                state.timer = None;
                let _ = bus.publish(VigilEvent::WindowExpired { timestamp: Utc::now() });
                tracing::info!("confirmation window expired without second activation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn window() -> ConfirmationWindow {
        ConfirmationWindow::new(WindowConfig::default(), EventBus::new().shared())
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_activation_opens_window() {
        let w = window();
        let outcome = w.register_activation().await;
        assert_eq!(
            outcome,
            ActivationOutcome::FirstActivation {
                remaining: Duration::from_secs(7)
            }
        );
        assert!(w.is_window_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_activation_confirms_with_response_time() {
        let w = window();
        w.register_activation().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        match w.register_activation().await {
            ActivationOutcome::Confirmed(c) => {
                assert!(!c.auto);
                assert_eq!(c.response_time.as_secs(), 2);
            }
            other => panic!("expected Confirmed, got {:?}", other),
        }
        assert!(!w.is_window_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_window_reopens_on_next_activation() {
        let w = window();
        w.register_activation().await;

        // Past window plus grace: the expiry timer has fired.
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(!w.is_window_active().await);

        match w.register_activation().await {
            ActivationOutcome::WindowReopened { remaining } => {
                assert_eq!(remaining, Duration::from_secs(7));
            }
            other => panic!("expected WindowReopened, got {:?}", other),
        }
        assert!(w.is_window_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_before_timer_fires() {
        let w = window();
        w.register_activation().await;

        // Past the 7s window but inside the 500ms grace: the timer is
        // still pending, the register call must expire the window itself.
        tokio::time::sleep(Duration::from_millis(7200)).await;
        assert!(!w.is_window_active().await);

        match w.register_activation().await {
            ActivationOutcome::WindowReopened { .. } => {}
            other => panic!("expected WindowReopened, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_auto_is_idempotent() {
        let w = window();
        w.register_activation().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let first = w.confirm_auto().await;
        assert!(matches!(first, Some(c) if c.auto));
        assert!(w.confirm_auto().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_and_manual_confirm_mutually_exclusive() {
        let w = window();

        // Auto wins: the follow-up tap starts a fresh window instead of
        // confirming a second time.
        w.register_activation().await;
        assert!(w.confirm_auto().await.is_some());
        assert!(matches!(
            w.register_activation().await,
            ActivationOutcome::FirstActivation { .. }
        ));

        // Manual wins: auto backs off.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            w.register_activation().await,
            ActivationOutcome::Confirmed(c) if !c.auto
        ));
        assert!(w.confirm_auto().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_auto_without_window_is_none() {
        let w = window();
        assert!(w.confirm_auto().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_remaining_counts_down() {
        let w = window();
        w.register_activation().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let remaining = w.get_time_remaining().await.unwrap();
        assert_eq!(remaining, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_do_not_consume_state() {
        let w = window();
        w.register_activation().await;
        tokio::time::sleep(Duration::from_millis(7200)).await;

        // Both queries observe the stale-open window as inactive without
        // consuming it; the next register still takes the reopen path.
        assert!(!w.is_window_active().await);
        assert!(w.get_time_remaining().await.is_none());
        assert!(matches!(
            w.register_activation().await,
            ActivationOutcome::WindowReopened { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_to_clean_first_activation() {
        let w = window();
        w.register_activation().await;
        w.reset().await;
        assert!(!w.is_window_active().await);
        assert!(matches!(
            w.register_activation().await,
            ActivationOutcome::FirstActivation { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_published_for_open_and_confirm() {
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        let w = ConfirmationWindow::new(WindowConfig::default(), bus.clone());

        w.register_activation().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        w.register_activation().await;

        assert_eq!(rx.recv().await.unwrap().event_type(), "window_opened");
        match rx.recv().await.unwrap() {
            VigilEvent::WindowConfirmed { auto, .. } => assert!(!auto),
            other => panic!("expected window_confirmed, got {:?}", other),
        }
    }
}
