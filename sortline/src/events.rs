//! Observability events for timed-out and lost parcels.
//!
//! Monitors publish onto a broadcast bus; any number of subscribers
//! (metrics, alarms, the loss-queue purger) receive each event. Publishing
//! with no subscribers is not an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{ChuteId, ParcelId};

/// Default buffered capacity of the event bus.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Event published when a monitor classifies a parcel.
#[derive(Clone, Debug, Serialize)]
pub enum SortingEvent {
    /// A parcel exceeded a lifetime timeout.
    ParcelTimedOut {
        /// Parcel that timed out.
        parcel_id: ParcelId,
        /// When it was detected.
        detected_at: DateTime<Utc>,
        /// Elapsed time at classification (ms).
        elapsed_ms: i64,
        /// Exception chute the parcel is directed to.
        exception_chute: ChuteId,
    },
    /// A parcel is physically missing from the line.
    ParcelLost {
        /// Parcel that went missing.
        parcel_id: ParcelId,
        /// Last position the parcel was expected at, when known.
        position: Option<u32>,
        /// Exception chute attached to the report.
        exception_chute: ChuteId,
    },
}

impl SortingEvent {
    /// Parcel this event concerns.
    pub fn parcel_id(&self) -> ParcelId {
        match self {
            Self::ParcelTimedOut { parcel_id, .. } | Self::ParcelLost { parcel_id, .. } => {
                *parcel_id
            }
        }
    }
}

/// Broadcast bus for [`SortingEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SortingEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Opens a new subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<SortingEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to all subscribers.
    pub fn publish(&self, event: SortingEvent) {
        // Err means no subscribers, which is fine
        if self.tx.send(event).is_err() {
            trace!("sorting event published with no subscribers");
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}
