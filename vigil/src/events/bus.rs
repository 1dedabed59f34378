//! Broadcast event bus for pipeline events.
//!
//! Thin pub/sub layer over a tokio broadcast channel. Publishing never
//! blocks and succeeds even with no subscribers; slow subscribers may lag
//! and drop events rather than backpressure emergency handling.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::alert::AlertId;
use crate::events::types::VigilEvent;

/// Broadcast channel capacity before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Errors from event bus operations.
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("failed to send event: {0}")]
    SendFailed(String),

    #[error("event channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to the event bus.
pub type SharedEventBus = Arc<EventBus>;

/// Pub/sub bus for [`VigilEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<VigilEvent>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Wrap in an Arc for sharing across components.
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers.
    ///
    /// Having no subscribers is not an error; the event is simply dropped.
    pub fn publish(&self, event: VigilEvent) -> EventBusResult<()> {
        tracing::trace!(event_type = event.event_type(), "publishing event");
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<VigilEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver {
            receiver: self.subscribe(),
            filter,
        }
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter for selecting a subset of events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    event_types: Option<Vec<&'static str>>,
    alert_id: Option<AlertId>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only pass events with one of the given type strings.
    pub fn with_event_types(mut self, types: &[&'static str]) -> Self {
        self.event_types = Some(types.to_vec());
        self
    }

    /// Only pass events scoped to the given alert.
    pub fn for_alert(mut self, alert_id: AlertId) -> Self {
        self.alert_id = Some(alert_id);
        self
    }

    /// Whether an event passes this filter.
    pub fn matches(&self, event: &VigilEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type()) {
                return false;
            }
        }
        if let Some(id) = self.alert_id {
            if event.alert_id() != Some(id) {
                return false;
            }
        }
        true
    }
}

/// Receiver that yields only events matching its filter.
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<VigilEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Receive the next matching event.
    ///
    /// Lagged events are skipped with a warning; `Err(ChannelClosed)` when
    /// the bus is gone.
    pub async fn recv(&mut self) -> EventBusResult<VigilEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed)
                }
            }
        }
    }
}
