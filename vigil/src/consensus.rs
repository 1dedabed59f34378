//! Debounced threat consensus for continuous background monitoring.
//!
//! Background analysis produces a continuous stream of observations with
//! no user in the loop, so any single elevated sample is not trustworthy
//! enough to page anyone. The filter keeps a small rolling history and
//! only declares a threat once enough qualifying observations land inside
//! a short trailing window. Firing clears the history, so a sustained
//! event produces one alert instead of a page storm.
//!
//! The filter is synchronous and single-owner. The service keeps it
//! behind one mutex, fed directly and via its observation intake task;
//! tests drive it here with hand-stamped timestamps.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Consensus tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Rolling history capacity; the oldest observation is evicted first.
    pub history_capacity: usize,
    /// Observations at or below this composite level are ignored.
    pub recent_threshold: f64,
    /// Trailing window, in seconds, that qualifying observations must
    /// share before consensus is declared.
    pub confirmation_window_s: u64,
    /// Qualifying observations required inside the trailing window.
    pub confirmation_threshold: usize,
    /// Weight an anomaly-detector vote adds to the composite level.
    pub anomaly_weight: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10,
            recent_threshold: 0.6,
            confirmation_window_s: 5,
            confirmation_threshold: 2,
            anomaly_weight: 0.3,
        }
    }
}

impl ConsensusConfig {
    fn confirmation_window(&self) -> Duration {
        Duration::seconds(self.confirmation_window_s as i64)
    }
}

/// One scored sample from the background analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatObservation {
    pub timestamp: DateTime<Utc>,
    /// Combined threat level in `[0, 1]`.
    pub composite_level: f64,
    /// Pattern tags that contributed, e.g. "glass_break".
    pub tags: Vec<String>,
}

impl ThreatObservation {
    pub fn new(composite_level: f64, tags: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            composite_level,
            tags,
        }
    }

    /// Same observation stamped at an explicit time, for replay and tests.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// What the filter reports when consensus is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusOutcome {
    /// Union of tags across the qualifying observations, first-seen order.
    pub tags: Vec<String>,
    /// Highest composite level among the qualifying observations.
    pub peak_level: f64,
    /// How many observations qualified inside the window.
    pub observations: usize,
}

/// Rolling-history consensus filter.
pub struct ThreatConsensusFilter {
    config: ConsensusConfig,
    history: VecDeque<ThreatObservation>,
}

impl ThreatConsensusFilter {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Observations currently held in the rolling history.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Combine an anomaly-detector vote with the best specific-pattern
    /// match into one composite level, capped at 1.0.
    pub fn composite_level(&self, anomaly_vote: bool, max_pattern_score: f64) -> f64 {
        let vote = if anomaly_vote {
            self.config.anomaly_weight
        } else {
            0.0
        };
        (vote + max_pattern_score.clamp(0.0, 1.0)).min(1.0)
    }

    /// Feed one observation through the filter.
    ///
    /// Returns `Some` exactly when this observation completes consensus:
    /// it qualifies, and with it the trailing window holds at least the
    /// configured count of qualifying observations. Firing clears the
    /// history, so the count rebuilds from zero afterwards.
    pub fn observe(&mut self, observation: ThreatObservation) -> Option<ConsensusOutcome> {
        if observation.composite_level <= self.config.recent_threshold {
            tracing::trace!(
                level = observation.composite_level,
                "observation below threshold, ignored"
            );
            return None;
        }

        let now = observation.timestamp;
        self.history.push_back(observation);
        while self.history.len() > self.config.history_capacity {
            self.history.pop_front();
        }

        let window = self.config.confirmation_window();
        let qualifying: Vec<&ThreatObservation> = self
            .history
            .iter()
            .filter(|o| {
                let age = now - o.timestamp;
                age >= Duration::zero() && age <= window
            })
            .collect();

        if qualifying.len() < self.config.confirmation_threshold {
            return None;
        }

        let mut tags: Vec<String> = Vec::new();
        let mut peak_level: f64 = 0.0;
        for obs in &qualifying {
            for tag in &obs.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            peak_level = peak_level.max(obs.composite_level);
        }
        let observations = qualifying.len();

        self.history.clear();
        tracing::info!(
            observations,
            peak_level,
            tags = ?tags,
            "threat consensus reached"
        );
        Some(ConsensusOutcome {
            tags,
            peak_level,
            observations,
        })
    }

    /// Drop all history, e.g. when monitoring is switched off.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
