//! Alert domain model.
//!
//! An [`Alert`] is the in-memory unit an escalation campaign drives. Its
//! durable sibling lives in [`crate::records`] and outlives it. Dispatch
//! channels render messages from the alert plus a [`DispatchSeverity`]
//! chosen by the escalation stage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AlertId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How the emergency was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Second activation arrived inside the confirmation window.
    Manual,
    /// Accumulated distress score crossed the auto-confirm threshold.
    AutoConfirmed,
    /// Repeated background threat observations reached consensus.
    ThreatConsensus,
}

impl AlertKind {
    /// Human-readable phrasing used when composing dispatched messages.
    pub fn describe(&self) -> &'static str {
        match self {
            AlertKind::Manual => "manually confirmed emergency",
            AlertKind::AutoConfirmed => "auto-confirmed distress emergency",
            AlertKind::ThreatConsensus => "background threat consensus",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Manual => write!(f, "manual"),
            AlertKind::AutoConfirmed => write!(f, "auto_confirmed"),
            AlertKind::ThreatConsensus => write!(f, "threat_consensus"),
        }
    }
}

/// Message intensity for one dispatch pass.
///
/// Severity climbs with the escalation level and drops back for the
/// periodic reminders so humans are nudged, not spammed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchSeverity {
    /// First notification, sent the moment the alert is confirmed.
    Initial,
    /// Unacknowledged past the escalation delay.
    Escalated,
    /// Maximum priority, paired with auto-calling.
    Critical,
    /// Reduced-intensity periodic re-announcement.
    Reminder,
}

impl DispatchSeverity {
    /// Headline line channels prepend to the alert message.
    pub fn headline(&self) -> &'static str {
        match self {
            DispatchSeverity::Initial => "EMERGENCY ALERT",
            DispatchSeverity::Escalated => "EMERGENCY NOT ACKNOWLEDGED",
            DispatchSeverity::Critical => "CRITICAL EMERGENCY, MAXIMUM PRIORITY",
            DispatchSeverity::Reminder => "EMERGENCY STILL ACTIVE",
        }
    }
}

impl fmt::Display for DispatchSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchSeverity::Initial => write!(f, "initial"),
            DispatchSeverity::Escalated => write!(f, "escalated"),
            DispatchSeverity::Critical => write!(f, "critical"),
            DispatchSeverity::Reminder => write!(f, "reminder"),
        }
    }
}

/// Geographic position attached to an alert when a provider is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters, when the provider reports one.
    pub accuracy_m: Option<f64>,
    /// Free-form place description, e.g. "home" or a street address.
    pub description: Option<String>,
}

impl LocationInfo {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
            description: None,
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy_m = Some(meters);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// One-line rendering for dispatched messages.
    pub fn summary(&self) -> String {
        let mut s = format!("{:.5}, {:.5}", self.latitude, self.longitude);
        if let Some(acc) = self.accuracy_m {
            s.push_str(&format!(" (within {:.0}m)", acc));
        }
        if let Some(desc) = &self.description {
            s.push_str(&format!(" near {}", desc));
        }
        s
    }
}

/// Reference to captured evidence. Carries a locator, never the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub uri: String,
    pub captured_at: DateTime<Utc>,
}

impl EvidenceRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            captured_at: Utc::now(),
        }
    }
}

/// An active emergency alert.
///
/// Owned by the escalation controller from creation until acknowledgment or
/// campaign completion. The durable record written before the first dispatch
/// is independent of this value's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub kind: AlertKind,
    pub message: String,
    pub location: Option<LocationInfo>,
    pub evidence: Option<EvidenceRef>,
    pub created_at: DateTime<Utc>,
    /// Highest escalation level reached so far (0 at creation).
    pub escalation_level: u8,
    pub acknowledged: bool,
}

impl Alert {
    /// Create a new unescalated, unacknowledged alert.
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            id: AlertId::new(),
            kind,
            message: message.into(),
            location: None,
            evidence: None,
            created_at: Utc::now(),
            escalation_level: 0,
            acknowledged: false,
        }
    }

    pub fn with_location(mut self, location: Option<LocationInfo>) -> Self {
        self.location = location;
        self
    }

    pub fn with_evidence(mut self, evidence: Option<EvidenceRef>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Location line for messages. A missing location is rendered as text,
    /// never treated as an error.
    pub fn location_text(&self) -> String {
        match &self.location {
            Some(loc) => loc.summary(),
            None => "location unavailable".to_string(),
        }
    }

    /// Time elapsed since the alert was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_alert_defaults() {
        let alert = Alert::new(AlertKind::Manual, "help needed");
        assert_eq!(alert.kind, AlertKind::Manual);
        assert_eq!(alert.escalation_level, 0);
        assert!(!alert.acknowledged);
        assert!(alert.location.is_none());
        assert!(alert.evidence.is_none());
    }

    #[test]
    fn test_location_text_fallback() {
        let alert = Alert::new(AlertKind::AutoConfirmed, "distress score 75");
        assert_eq!(alert.location_text(), "location unavailable");
    }

    #[test]
    fn test_location_summary() {
        let loc = LocationInfo::new(59.33459, 18.06324)
            .with_accuracy(25.0)
            .with_description("home");
        let summary = loc.summary();
        assert!(summary.contains("59.33459"));
        assert!(summary.contains("within 25m"));
        assert!(summary.contains("near home"));
    }

    #[test]
    fn test_alert_builders() {
        let alert = Alert::new(AlertKind::ThreatConsensus, "tags: scream, crash")
            .with_location(Some(LocationInfo::new(1.0, 2.0)))
            .with_evidence(Some(EvidenceRef::new("file:///tmp/evidence.json")));
        assert!(alert.location.is_some());
        assert_eq!(
            alert.evidence.as_ref().map(|e| e.uri.as_str()),
            Some("file:///tmp/evidence.json")
        );
    }

    #[test]
    fn test_alert_serde_roundtrip_none_location() {
        let alert = Alert::new(AlertKind::Manual, "test");
        let json = serde_json::to_string(&alert).unwrap();
        let parsed: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, alert.id);
        assert_eq!(parsed.kind, AlertKind::Manual);
        assert!(parsed.location.is_none());
        assert_eq!(parsed.location_text(), "location unavailable");
    }

    #[test]
    fn test_alert_id_parse_roundtrip() {
        let id = AlertId::new();
        let parsed: AlertId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_kind_display_matches_serde() {
        let json = serde_json::to_string(&AlertKind::AutoConfirmed).unwrap();
        assert_eq!(json, format!("\"{}\"", AlertKind::AutoConfirmed));
    }

    #[test]
    fn test_severity_headlines_distinct() {
        let severities = [
            DispatchSeverity::Initial,
            DispatchSeverity::Escalated,
            DispatchSeverity::Critical,
            DispatchSeverity::Reminder,
        ];
        for s in &severities {
            assert!(!s.headline().is_empty());
        }
        assert_ne!(
            DispatchSeverity::Initial.headline(),
            DispatchSeverity::Reminder.headline()
        );
    }
}
