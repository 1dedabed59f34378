//! Alert delivery across pluggable channels.
//!
//! The gateway is the only boundary through which an alert reaches a
//! human. Channels are grouped into broad classes (messaging, audible,
//! call) so the escalation controller can widen the blast radius per
//! level without knowing channel technology. Delivery tolerates partial
//! failure: one dead channel never blocks the others, and the caller
//! gets back exactly which channels failed.

pub mod channels;

pub use channels::{CommandChannel, ConsoleChannel, WebhookChannel};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alert::{Alert, DispatchSeverity};

/// Broad capability class of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelClass {
    /// Text delivery: SMS, chat, webhook, on-screen banner.
    Messaging,
    /// Loud local alerting: siren, spoken announcement.
    Audible,
    /// Direct calling of contacts or emergency services.
    Call,
}

impl fmt::Display for ChannelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelClass::Messaging => "messaging",
            ChannelClass::Audible => "audible",
            ChannelClass::Call => "call",
        };
        write!(f, "{label}")
    }
}

/// Errors a single channel can report for one delivery.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel unreachable: {0}")]
    Unreachable(String),

    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error("command failed: {0}")]
    CommandFailed(String),
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// One concrete way to get an alert in front of someone.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    fn class(&self) -> ChannelClass;

    async fn deliver(&self, alert: &Alert, severity: DispatchSeverity) -> ChannelResult<()>;
}

/// A channel that failed during one fan-out, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFailure {
    pub channel: String,
    pub reason: String,
}

/// Outcome of one fan-out with at least one successful delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct SentCount {
    pub sent: usize,
    pub attempted: usize,
    pub failures: Vec<ChannelFailure>,
}

/// Errors for a whole fan-out.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no configured channel matches the requested classes")]
    NoChannels,

    #[error("all {} attempted channels failed", failures.len())]
    AllFailed { failures: Vec<ChannelFailure> },
}

/// Result type for gateway operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Shared reference to the gateway.
pub type SharedGateway = Arc<DispatchGateway>;

/// Fans one alert out to every channel in the requested classes.
pub struct DispatchGateway {
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl DispatchGateway {
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        Self { channels }
    }

    /// Add a channel, builder style.
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Wrap in an Arc for sharing across components.
    pub fn shared(self) -> SharedGateway {
        Arc::new(self)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver to every channel whose class is in `classes`, concurrently.
    ///
    /// Returns `Ok` when at least one channel succeeded; the `SentCount`
    /// still lists the ones that did not. `Err` means nothing got
    /// through, which the caller feeds into the retry bookkeeping.
    pub async fn send(
        &self,
        classes: &[ChannelClass],
        alert: &Alert,
        severity: DispatchSeverity,
    ) -> DispatchResult<SentCount> {
        let selected: Vec<&Arc<dyn AlertChannel>> = self
            .channels
            .iter()
            .filter(|c| classes.contains(&c.class()))
            .collect();
        if selected.is_empty() {
            return Err(DispatchError::NoChannels);
        }

        let attempts = selected.iter().map(|channel| async move {
            let result = channel.deliver(alert, severity).await;
            (channel.name().to_string(), result)
        });

        let mut sent = 0;
        let mut failures = Vec::new();
        for (name, result) in join_all(attempts).await {
            match result {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!(channel = %name, error = %e, "channel delivery failed");
                    failures.push(ChannelFailure {
                        channel: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let attempted = selected.len();
        if sent == 0 {
            return Err(DispatchError::AllFailed { failures });
        }
        tracing::info!(
            alert_id = %alert.id,
            %severity,
            sent,
            attempted,
            "alert dispatched"
        );
        Ok(SentCount {
            sent,
            attempted,
            failures,
        })
    }
}

/// Single-line rendering shared by the text-ish channels.
pub fn render_message(alert: &Alert, severity: DispatchSeverity) -> String {
    format!(
        "{}: {} | location: {} | alert {}",
        severity.headline(),
        alert.message,
        alert.location_text(),
        alert.id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;
    use std::sync::Mutex;

    struct RecordingChannel {
        name: String,
        class: ChannelClass,
        deliveries: Mutex<Vec<DispatchSeverity>>,
    }

    impl RecordingChannel {
        fn new(name: &str, class: ChannelClass) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                class,
                deliveries: Mutex::new(Vec::new()),
            })
        }

        fn delivered(&self) -> Vec<DispatchSeverity> {
            self.deliveries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn class(&self) -> ChannelClass {
            self.class
        }

        async fn deliver(&self, _alert: &Alert, severity: DispatchSeverity) -> ChannelResult<()> {
            self.deliveries.lock().unwrap().push(severity);
            Ok(())
        }
    }

    struct FailingChannel;

    #[async_trait]
    impl AlertChannel for FailingChannel {
        fn name(&self) -> &str {
            "broken-sms"
        }

        fn class(&self) -> ChannelClass {
            ChannelClass::Messaging
        }

        async fn deliver(&self, _alert: &Alert, _severity: DispatchSeverity) -> ChannelResult<()> {
            Err(ChannelError::Unreachable("no carrier".into()))
        }
    }

    fn alert() -> Alert {
        Alert::new(AlertKind::Manual, "help")
    }

    #[tokio::test]
    async fn test_no_matching_channels_is_an_error() {
        let sms = RecordingChannel::new("sms", ChannelClass::Messaging);
        let gateway = DispatchGateway::new(vec![sms as Arc<dyn AlertChannel>]);
        let result = gateway
            .send(&[ChannelClass::Call], &alert(), DispatchSeverity::Initial)
            .await;
        assert!(matches!(result, Err(DispatchError::NoChannels)));
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds_and_reports() {
        let ok = RecordingChannel::new("sms", ChannelClass::Messaging);
        let gateway = DispatchGateway::new(vec![ok.clone() as Arc<dyn AlertChannel>])
            .with_channel(Arc::new(FailingChannel));

        let count = gateway
            .send(&[ChannelClass::Messaging], &alert(), DispatchSeverity::Initial)
            .await
            .unwrap();
        assert_eq!(count.sent, 1);
        assert_eq!(count.attempted, 2);
        assert_eq!(count.failures.len(), 1);
        assert_eq!(count.failures[0].channel, "broken-sms");
        assert_eq!(ok.delivered(), vec![DispatchSeverity::Initial]);
    }

    #[tokio::test]
    async fn test_all_failed_reports_every_channel() {
        let gateway = DispatchGateway::new(vec![
            Arc::new(FailingChannel) as Arc<dyn AlertChannel>,
            Arc::new(FailingChannel),
        ]);
        match gateway
            .send(&[ChannelClass::Messaging], &alert(), DispatchSeverity::Escalated)
            .await
        {
            Err(DispatchError::AllFailed { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("expected AllFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_class_filter_selects_only_requested_channels() {
        let sms = RecordingChannel::new("sms", ChannelClass::Messaging);
        let siren = RecordingChannel::new("siren", ChannelClass::Audible);
        let gateway = DispatchGateway::new(vec![
            sms.clone() as Arc<dyn AlertChannel>,
            siren.clone(),
        ]);

        gateway
            .send(&[ChannelClass::Audible], &alert(), DispatchSeverity::Escalated)
            .await
            .unwrap();
        assert!(sms.delivered().is_empty());
        assert_eq!(siren.delivered(), vec![DispatchSeverity::Escalated]);
    }

    #[test]
    fn test_render_message_without_location() {
        let text = render_message(&alert(), DispatchSeverity::Initial);
        assert!(text.contains("EMERGENCY ALERT"));
        assert!(text.contains("location unavailable"));
    }
}
