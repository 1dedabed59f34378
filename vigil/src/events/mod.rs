//! Event-driven observation of the emergency pipeline.
//!
//! Components publish [`VigilEvent`]s to a broadcast [`EventBus`]; UIs,
//! tests, and the service's own coordination tasks subscribe. Publishing is
//! fire-and-forget so no subscriber can slow down alert handling.

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusResult, EventFilter, FilteredReceiver, SharedEventBus,
};
pub use types::{FinishReason, VigilEvent};
