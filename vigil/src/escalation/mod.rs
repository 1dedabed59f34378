//! Time-gated escalation campaigns for confirmed alerts.
//!
//! Every confirmed alert gets its own campaign task walking a fixed
//! ladder until someone acknowledges or the ceiling is reached:
//!
//! ```text
//!   t=0s     L0  dispatch to messaging channels
//!    |
//!   t=15s    L1  repeat + audible channels
//!    |
//!   t=30s    L2  repeat + call channels, breadcrumbs written
//!    |           (skipped when auto-calling is disabled)
//!   t=60s    reminder to messaging channels
//!   t=120s   reminder
//!    |       ...every repeat interval...
//!   t=300s   ceiling, campaign finishes
//! ```
//!
//! Levels only ever climb. Acknowledgment at any point stops the ladder
//! within a second; delivery failures are recorded but never pause it.

pub mod controller;
pub mod state;

pub use controller::{EscalationController, SharedEscalation};
pub use state::{CampaignStep, EscalationConfig, ScheduledStep};
