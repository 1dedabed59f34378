//! Evidence and location capture collaborators.
//!
//! Both captures run once per alert around creation time and are strictly
//! best-effort: a failing or absent collaborator yields `None` and the alert
//! is raised without the extra context.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::alert::{EvidenceRef, LocationInfo};

/// Captures a piece of evidence when an alert is raised.
#[async_trait]
pub trait EvidenceCollector: Send + Sync {
    fn name(&self) -> &str;

    /// Capture evidence now. `None` means nothing could be captured.
    async fn capture(&self) -> Option<EvidenceRef>;
}

/// Supplies the device's current position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `None` means the position is unknown; downstream rendering shows
    /// "location unavailable" instead of failing.
    async fn current(&self) -> Option<LocationInfo>;
}

/// Collector that never captures anything.
pub struct NullEvidenceCollector;

#[async_trait]
impl EvidenceCollector for NullEvidenceCollector {
    fn name(&self) -> &str {
        "null"
    }

    async fn capture(&self) -> Option<EvidenceRef> {
        None
    }
}

/// Writes a timestamped JSON marker file into an evidence directory and
/// returns its path. Stands in for camera or microphone capture on devices
/// that have neither.
pub struct SnapshotEvidenceCollector {
    dir: PathBuf,
}

impl SnapshotEvidenceCollector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl EvidenceCollector for SnapshotEvidenceCollector {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn capture(&self) -> Option<EvidenceRef> {
        let captured_at = Utc::now();
        let path = self
            .dir
            .join(format!("evidence-{}.json", captured_at.format("%Y%m%dT%H%M%S%3f")));
        let body = json!({
            "collector": self.name(),
            "captured_at": captured_at.to_rfc3339(),
        });

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(error = %e, dir = %self.dir.display(), "evidence dir unavailable");
            return None;
        }
        match std::fs::write(&path, body.to_string()) {
            Ok(()) => Some(EvidenceRef {
                uri: format!("file://{}", path.display()),
                captured_at,
            }),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "evidence capture failed");
                None
            }
        }
    }
}

/// Provider that never knows the position.
pub struct NullLocationProvider;

#[async_trait]
impl LocationProvider for NullLocationProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn current(&self) -> Option<LocationInfo> {
        None
    }
}

/// Fixed position from configuration, e.g. a home installation.
pub struct StaticLocationProvider {
    location: LocationInfo,
}

impl StaticLocationProvider {
    pub fn new(location: LocationInfo) -> Self {
        Self { location }
    }
}

#[async_trait]
impl LocationProvider for StaticLocationProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn current(&self) -> Option<LocationInfo> {
        Some(self.location.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_collaborators_yield_none() {
        assert!(NullEvidenceCollector.capture().await.is_none());
        assert!(NullLocationProvider.current().await.is_none());
    }

    #[tokio::test]
    async fn test_static_location_returns_configured_position() {
        let provider = StaticLocationProvider::new(
            LocationInfo::new(59.33459, 18.06324).with_description("home"),
        );
        let loc = provider.current().await.unwrap();
        assert_eq!(loc.description.as_deref(), Some("home"));
    }

    #[tokio::test]
    async fn test_snapshot_collector_writes_marker_file() {
        let dir = tempfile::tempdir().unwrap();
        let collector = SnapshotEvidenceCollector::new(dir.path());

        let evidence = collector.capture().await.unwrap();
        assert!(evidence.uri.starts_with("file://"));

        let path = evidence.uri.trim_start_matches("file://");
        let body = std::fs::read_to_string(path).unwrap();
        assert!(body.contains("captured_at"));
    }

    #[tokio::test]
    async fn test_snapshot_collector_bad_dir_is_nonfatal() {
        let collector = SnapshotEvidenceCollector::new("/dev/null/not-a-dir");
        assert!(collector.capture().await.is_none());
    }
}
