//! Probe implementations that ship with the crate.
//!
//! Real deployments plug in their own audio/video classifiers behind the
//! [`Probe`] trait. These built-ins cover everything else: scripted probes
//! for tests and demos, and a channel-fed probe that lets any surface
//! (keyboard, IPC, another task) inject detections by hand.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::probes::{Probe, ProbeDetection, ProbeError, ProbeKind, ProbeResult};

enum ScriptedSample {
    Detect { tag: String, points: f64 },
    Nothing,
    Fail(ProbeError),
}

/// A probe that replays a fixed script, one entry per sample tick.
/// Once the script runs out it reports nothing forever.
pub struct ScriptedProbe {
    name: String,
    kind: ProbeKind,
    script: Mutex<VecDeque<ScriptedSample>>,
}

impl ScriptedProbe {
    pub fn new(name: impl Into<String>, kind: ProbeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a detection to the script.
    pub fn detects(self, tag: impl Into<String>, points: f64) -> Self {
        self.push(ScriptedSample::Detect {
            tag: tag.into(),
            points,
        })
    }

    /// Append one empty tick to the script.
    pub fn idle(self) -> Self {
        self.push(ScriptedSample::Nothing)
    }

    /// Append a failure to the script.
    pub fn fails(self, error: ProbeError) -> Self {
        self.push(ScriptedSample::Fail(error))
    }

    fn push(mut self, sample: ScriptedSample) -> Self {
        self.script.get_mut().push_back(sample);
        self
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProbeKind {
        self.kind.clone()
    }

    async fn sample(&self) -> ProbeResult<Option<ProbeDetection>> {
        let mut script = self.script.lock().await;
        match script.pop_front() {
            Some(ScriptedSample::Detect { tag, points }) => {
                Ok(Some(ProbeDetection::new(self.kind.clone(), tag, points)))
            }
            Some(ScriptedSample::Nothing) | None => Ok(None),
            Some(ScriptedSample::Fail(error)) => Err(error),
        }
    }
}

/// Hand-feeds detections into a [`ChannelProbe`] from anywhere.
#[derive(Clone)]
pub struct ProbeInjector {
    kind: ProbeKind,
    tx: mpsc::UnboundedSender<ProbeDetection>,
}

impl ProbeInjector {
    /// Queue a detection for the next sample tick.
    pub fn inject(&self, tag: impl Into<String>, points: f64) {
        let detection = ProbeDetection::new(self.kind.clone(), tag, points);
        if self.tx.send(detection).is_err() {
            tracing::debug!("channel probe dropped, detection discarded");
        }
    }
}

/// A probe whose detections arrive over a channel instead of from a
/// sensor. Each sample tick drains at most one queued detection.
pub struct ChannelProbe {
    name: String,
    kind: ProbeKind,
    rx: Mutex<mpsc::UnboundedReceiver<ProbeDetection>>,
}

impl ChannelProbe {
    pub fn new(name: impl Into<String>, kind: ProbeKind) -> (Self, ProbeInjector) {
        let (tx, rx) = mpsc::unbounded_channel();
        let injector = ProbeInjector {
            kind: kind.clone(),
            tx,
        };
        let probe = Self {
            name: name.into(),
            kind,
            rx: Mutex::new(rx),
        };
        (probe, injector)
    }
}

#[async_trait]
impl Probe for ChannelProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProbeKind {
        self.kind.clone()
    }

    async fn sample(&self) -> ProbeResult<Option<ProbeDetection>> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(detection) => Ok(Some(detection)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ProbeError::SourceUnavailable(
                "all injectors dropped".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_probe_replays_in_order() {
        let probe = ScriptedProbe::new("audio", ProbeKind::Audio)
            .detects("scream", 30.0)
            .idle()
            .detects("crash", 25.0);

        let first = probe.sample().await.unwrap().unwrap();
        assert_eq!(first.tag, "scream");
        assert!(probe.sample().await.unwrap().is_none());
        let third = probe.sample().await.unwrap().unwrap();
        assert_eq!(third.tag, "crash");
        assert!(probe.sample().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_probe_drains_one_per_tick() {
        let (probe, injector) = ChannelProbe::new("manual", ProbeKind::Other("manual".into()));
        injector.inject("scream", 30.0);
        injector.inject("crash", 25.0);

        assert_eq!(probe.sample().await.unwrap().unwrap().tag, "scream");
        assert_eq!(probe.sample().await.unwrap().unwrap().tag, "crash");
        assert!(probe.sample().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_probe_errors_when_injectors_gone() {
        let (probe, injector) = ChannelProbe::new("manual", ProbeKind::Audio);
        drop(injector);
        assert!(probe.sample().await.is_err());
    }
}
