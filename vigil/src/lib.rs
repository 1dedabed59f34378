//! Offline-first personal emergency pipeline.
//!
//! vigil takes raw panic-trigger presses and background sensor signals
//! and turns them into acknowledged emergencies:
//!
//! ```text
//!   activation ──> confirmation window ──┐
//!   probes ──────> distress aggregator ──┤
//!   observations ─> consensus filter ────┼──> alert record (durable)
//!                                        │         │
//!                                        └──> escalation campaign
//!                                                  │
//!                                    messaging / audible / call channels
//! ```
//!
//! # Modules
//!
//! - [`confirmation`]: double-activation window with auto-expiry
//! - [`probes`]: concurrent distress probes and score aggregation
//! - [`consensus`]: rolling threat-observation consensus filter
//! - [`records`]: durable alert records surviving restarts
//! - [`escalation`]: per-alert time-gated escalation campaigns
//! - [`dispatch`]: partial-failure-tolerant channel fan-out
//! - [`capture`]: best-effort location and evidence collaborators
//! - [`service`]: the composed, startable pipeline
//!
//! # Usage
//!
//! ```bash
//! # Interactive console with default config
//! vigil run
//!
//! # Custom config file
//! vigil --config /etc/vigil.toml run
//!
//! # Inspect and retry the durable record store
//! vigil history
//! vigil retry
//! ```

pub mod alert;
pub mod capture;
pub mod config;
pub mod confirmation;
pub mod consensus;
pub mod dispatch;
pub mod escalation;
pub mod events;
pub mod probes;
pub mod records;
pub mod service;

// Re-export the alert domain types
pub use alert::{Alert, AlertId, AlertKind, DispatchSeverity, EvidenceRef, LocationInfo};

// Re-export key confirmation types
pub use confirmation::{
    ActivationOutcome, ConfirmationWindow, ConfirmedActivation, SharedConfirmationWindow,
    WindowConfig,
};

// Re-export key probe types
pub use probes::{
    AggregatorConfig, ChannelProbe, DistressAggregator, DistressSnapshot, Probe, ProbeDetection,
    ProbeError, ProbeInjector, ProbeKind, ProbeResult, SharedAggregator,
};

// Re-export key consensus types
pub use consensus::{ConsensusConfig, ConsensusOutcome, ThreatConsensusFilter, ThreatObservation};

// Re-export key record types
pub use records::{
    AlertRecord, AlertRecordStore, RecordStatus, SharedRecordStore, StoreError, StoreResult,
    MAX_DISPATCH_ATTEMPTS,
};

// Re-export key escalation and dispatch types
pub use dispatch::{
    AlertChannel, ChannelClass, ChannelError, ChannelFailure, ChannelResult, DispatchError,
    DispatchGateway, DispatchResult, SentCount, SharedGateway,
};
pub use escalation::{EscalationConfig, EscalationController, SharedEscalation};

// Re-export the event stream
pub use events::{EventBus, FinishReason, SharedEventBus, VigilEvent};

// Re-export the composed service
pub use capture::{
    EvidenceCollector, LocationProvider, NullEvidenceCollector, NullLocationProvider,
    SnapshotEvidenceCollector, StaticLocationProvider,
};
pub use config::{ConfigError, VigilConfig};
pub use service::{
    AckRequest, AckTrigger, AcknowledgmentSource, BackgroundObservation, ChannelAckSource,
    ObservationFeed, Vigil, VigilBuilder, VigilStatus,
};
