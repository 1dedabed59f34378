//! Distress probes and the per-window score aggregator.
//!
//! A probe is an independent source of distress-relevant samples: an audio
//! classifier, a video classifier, or anything else that can tag its
//! current input with a point value. The aggregator runs every configured
//! probe concurrently while a confirmation window is open and folds their
//! detections into one capped score that can auto-confirm the emergency.
//!
//! Probes never interpret the aggregate score. They only report detections;
//! the threshold decision lives inside the aggregator's single synchronized
//! update.

pub mod aggregator;
pub mod builtin;

pub use aggregator::{
    AggregatorConfig, DistressAggregator, DistressScore, DistressSnapshot, SharedAggregator,
};
pub use builtin::{ChannelProbe, ProbeInjector, ScriptedProbe};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a probe can report for a single sample.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("probe sample failed: {0}")]
    SampleFailed(String),
}

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Broad modality of a probe, carried on every detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Audio,
    Video,
    Other(String),
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Audio => write!(f, "audio"),
            ProbeKind::Video => write!(f, "video"),
            ProbeKind::Other(label) => write!(f, "{label}"),
        }
    }
}

/// One classified sample from a probe. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDetection {
    pub kind: ProbeKind,
    /// What the probe recognized, e.g. "scream" or "struggling".
    pub tag: String,
    /// Points this detection contributes to the distress score. The
    /// aggregator treats the value as opaque; probes own their own tuning.
    pub score_delta: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProbeDetection {
    pub fn new(kind: ProbeKind, tag: impl Into<String>, score_delta: f64) -> Self {
        Self {
            kind,
            tag: tag.into(),
            score_delta,
            timestamp: Utc::now(),
        }
    }
}

/// An independent, pluggable distress sample source.
///
/// `sample` classifies whatever the probe is currently observing.
/// `Ok(None)` means nothing noteworthy this tick, which is the common
/// case and not an error. An `Err` takes the probe out of the current
/// window; the other probes and the window itself continue unaffected.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProbeKind;

    async fn sample(&self) -> ProbeResult<Option<ProbeDetection>>;
}
