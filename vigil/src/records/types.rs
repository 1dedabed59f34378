//! Durable alert record types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertId, AlertKind, EvidenceRef, LocationInfo};

/// Dispatch attempts allowed before a record is parked as `Failed`.
pub const MAX_DISPATCH_ATTEMPTS: u32 = 5;

/// Lifecycle status of a durable alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Written, no channel has confirmed delivery yet.
    Pending,
    /// At least one channel delivered it.
    Sent,
    /// A human acknowledged the alert.
    Acknowledged,
    /// Retry cap reached without a single successful delivery. Kept
    /// queryable for manual follow-up, never dropped.
    Failed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Sent => "sent",
            RecordStatus::Acknowledged => "acknowledged",
            RecordStatus::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// The durable, restart-surviving copy of an alert.
///
/// Independent of the in-memory [`Alert`] the escalation controller
/// owns: the controller can finish and drop its copy while this record
/// remains for audit and retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: AlertId,
    pub kind: AlertKind,
    pub message: String,
    pub location: Option<LocationInfo>,
    pub evidence: Option<EvidenceRef>,
    pub created_at: DateTime<Utc>,
    pub status: RecordStatus,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl AlertRecord {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            id: alert.id,
            kind: alert.kind,
            message: alert.message.clone(),
            location: alert.location.clone(),
            evidence: alert.evidence.clone(),
            created_at: alert.created_at,
            status: RecordStatus::Pending,
            retry_count: 0,
            updated_at: alert.created_at,
        }
    }

    /// Rebuild the in-memory alert for redelivery after a restart.
    ///
    /// Escalation starts over from level zero; the original creation
    /// time is preserved so the record keeps one identity.
    pub fn to_alert(&self) -> Alert {
        Alert {
            id: self.id,
            kind: self.kind,
            message: self.message.clone(),
            location: self.location.clone(),
            evidence: self.evidence.clone(),
            created_at: self.created_at,
            escalation_level: 0,
            acknowledged: false,
        }
    }

    /// Location for display, or "location unavailable".
    pub fn location_text(&self) -> String {
        self.location
            .as_ref()
            .map(|l| l.summary())
            .unwrap_or_else(|| "location unavailable".to_string())
    }

    /// Whether a redelivery pass should pick this record up.
    pub fn is_retryable(&self) -> bool {
        self.status == RecordStatus::Pending && self.retry_count < MAX_DISPATCH_ATTEMPTS
    }
}
