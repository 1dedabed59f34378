//! Pipeline event types.
//!
//! Every externally observable transition in the confirmation and escalation
//! pipeline is published as one of these events, so UIs and tests can follow
//! along without hooking component internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertId, AlertKind, DispatchSeverity};

/// All pipeline events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VigilEvent {
    /// A confirmation window opened (or reopened after an unobserved expiry).
    WindowOpened {
        reopened: bool,
        expires_in_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The pending activation was confirmed, manually or by distress score.
    WindowConfirmed {
        auto: bool,
        response_time_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The window expired with no second activation.
    WindowExpired { timestamp: DateTime<Utc> },

    /// A probe detection was folded into the distress score.
    DistressUpdated {
        tag: String,
        delta: f64,
        total: f64,
        timestamp: DateTime<Utc>,
    },

    /// Background observations reached threat consensus.
    ConsensusReached {
        tags: Vec<String>,
        peak_level: f64,
        observations: u32,
        timestamp: DateTime<Utc>,
    },

    /// An alert was created and handed to the escalation controller.
    AlertRaised {
        alert_id: AlertId,
        kind: AlertKind,
        timestamp: DateTime<Utc>,
    },

    /// An escalation campaign advanced to a new level.
    EscalationAdvanced {
        alert_id: AlertId,
        level: u8,
        timestamp: DateTime<Utc>,
    },

    /// One dispatch pass completed.
    AlertDispatched {
        alert_id: AlertId,
        severity: DispatchSeverity,
        sent: u32,
        failed: u32,
        timestamp: DateTime<Utc>,
    },

    /// A human acknowledged the alert.
    AlertAcknowledged {
        alert_id: AlertId,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The campaign ended and the alert left the active set.
    AlertFinished {
        alert_id: AlertId,
        reason: FinishReason,
        timestamp: DateTime<Utc>,
    },

    /// The durable record write failed; dispatch continues best-effort.
    RecordPersistFailed {
        alert_id: AlertId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl VigilEvent {
    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            VigilEvent::WindowOpened { timestamp, .. } => *timestamp,
            VigilEvent::WindowConfirmed { timestamp, .. } => *timestamp,
            VigilEvent::WindowExpired { timestamp, .. } => *timestamp,
            VigilEvent::DistressUpdated { timestamp, .. } => *timestamp,
            VigilEvent::ConsensusReached { timestamp, .. } => *timestamp,
            VigilEvent::AlertRaised { timestamp, .. } => *timestamp,
            VigilEvent::EscalationAdvanced { timestamp, .. } => *timestamp,
            VigilEvent::AlertDispatched { timestamp, .. } => *timestamp,
            VigilEvent::AlertAcknowledged { timestamp, .. } => *timestamp,
            VigilEvent::AlertFinished { timestamp, .. } => *timestamp,
            VigilEvent::RecordPersistFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            VigilEvent::WindowOpened { .. } => "window_opened",
            VigilEvent::WindowConfirmed { .. } => "window_confirmed",
            VigilEvent::WindowExpired { .. } => "window_expired",
            VigilEvent::DistressUpdated { .. } => "distress_updated",
            VigilEvent::ConsensusReached { .. } => "consensus_reached",
            VigilEvent::AlertRaised { .. } => "alert_raised",
            VigilEvent::EscalationAdvanced { .. } => "escalation_advanced",
            VigilEvent::AlertDispatched { .. } => "alert_dispatched",
            VigilEvent::AlertAcknowledged { .. } => "alert_acknowledged",
            VigilEvent::AlertFinished { .. } => "alert_finished",
            VigilEvent::RecordPersistFailed { .. } => "record_persist_failed",
        }
    }

    /// Get the alert id if this event is alert-scoped.
    pub fn alert_id(&self) -> Option<AlertId> {
        match self {
            VigilEvent::AlertRaised { alert_id, .. } => Some(*alert_id),
            VigilEvent::EscalationAdvanced { alert_id, .. } => Some(*alert_id),
            VigilEvent::AlertDispatched { alert_id, .. } => Some(*alert_id),
            VigilEvent::AlertAcknowledged { alert_id, .. } => Some(*alert_id),
            VigilEvent::AlertFinished { alert_id, .. } => Some(*alert_id),
            VigilEvent::RecordPersistFailed { alert_id, .. } => Some(*alert_id),
            _ => None,
        }
    }
}

/// Why an escalation campaign ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// A human acknowledged the alert.
    Acknowledged,
    /// The repeat ceiling was reached with no acknowledgment.
    CeilingReached,
    /// The campaign was cancelled, e.g. at service shutdown.
    Cancelled,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Acknowledged => write!(f, "acknowledged"),
            FinishReason::CeilingReached => write!(f, "ceiling_reached"),
            FinishReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = VigilEvent::WindowOpened {
            reopened: false,
            expires_in_ms: 7500,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: VigilEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type(), "window_opened");
        assert!(json.contains("\"type\":\"window_opened\""));
    }

    #[test]
    fn test_event_accessors() {
        let id = AlertId::new();
        let event = VigilEvent::AlertDispatched {
            alert_id: id,
            severity: DispatchSeverity::Initial,
            sent: 2,
            failed: 1,
            timestamp: Utc::now(),
        };

        assert_eq!(event.alert_id(), Some(id));
        assert_eq!(event.event_type(), "alert_dispatched");
    }

    #[test]
    fn test_window_events_are_not_alert_scoped() {
        let event = VigilEvent::WindowExpired {
            timestamp: Utc::now(),
        };
        assert_eq!(event.alert_id(), None);
    }

    #[test]
    fn test_finish_reason_roundtrip() {
        let json = serde_json::to_string(&FinishReason::CeilingReached).unwrap();
        assert_eq!(json, "\"ceiling_reached\"");
        let parsed: FinishReason = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, FinishReason::CeilingReached);
        assert_eq!(parsed.to_string(), "ceiling_reached");
    }
}
