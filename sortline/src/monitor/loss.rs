//! Interval-based loss monitoring over position-indexed queues.
//!
//! Each sensor position keeps a FIFO of parcels expected to arrive there,
//! each entry carrying a deadline derived from the interval tracker's
//! dynamic threshold. A head-of-queue entry past its deadline means the
//! parcel never showed up: it is reported once (deduped), logged at high
//! severity, and a lost-parcel event is published; the parcel's remaining
//! queue entries are purged so it cannot be reported again downstream.
//!
//! The enable flag is read from configuration every tick. If the flag is
//! unreadable the tick does nothing — the monitor fails safe rather than
//! guessing. After a configured idle period without new parcels the queues
//! and statistics are cleared so stale history cannot poison future medians.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::LossMonitorOptions;
use crate::events::{EventBus, SortingEvent};
use crate::stats::PositionIntervalTracker;
use crate::types::ParcelId;

/// Error reading the loss-monitor enable flag.
#[derive(Debug, Error)]
#[error("failed to read loss-monitor config: {0}")]
pub struct ConfigReadError(pub String);

/// Per-tick source of the loss-detection enable flag.
pub trait LossMonitorConfigProvider: Send + Sync {
    /// Returns whether loss detection is currently enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigReadError`] when the configuration store cannot be
    /// read; the monitor skips that tick.
    fn loss_detection_enabled(&self) -> Result<bool, ConfigReadError>;
}

/// One parcel expected at a position, with its arrival deadline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedParcel {
    /// Parcel expected to arrive.
    pub parcel_id: ParcelId,

    /// Position the parcel is expected at.
    pub position: u32,

    /// Instant after which the parcel is considered lost.
    pub deadline: DateTime<Utc>,

    /// When the expectation was queued.
    pub enqueued_at: DateTime<Utc>,
}

/// Periodic scan of position-indexed queues for lost parcels.
pub struct ParcelLossMonitoringService {
    queues: DashMap<u32, VecDeque<QueuedParcel>>,
    reported: DashMap<ParcelId, DateTime<Utc>>,
    tracker: Arc<PositionIntervalTracker>,
    config: Arc<dyn LossMonitorConfigProvider>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    options: LossMonitorOptions,
    last_parcel_at: parking_lot::Mutex<DateTime<Utc>>,
    last_reported_prune: parking_lot::Mutex<DateTime<Utc>>,
}

impl ParcelLossMonitoringService {
    /// Creates the service over a shared interval tracker.
    pub fn new(
        tracker: Arc<PositionIntervalTracker>,
        config: Arc<dyn LossMonitorConfigProvider>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        options: LossMonitorOptions,
    ) -> Self {
        let now = clock.now();
        Self {
            queues: DashMap::new(),
            reported: DashMap::new(),
            tracker,
            config,
            events,
            clock,
            options,
            last_parcel_at: parking_lot::Mutex::new(now),
            last_reported_prune: parking_lot::Mutex::new(now),
        }
    }

    /// Queues an expectation: `parcel_id` should reach `position` before
    /// `deadline`.
    pub fn expect_arrival(&self, parcel_id: ParcelId, position: u32, deadline: DateTime<Utc>) {
        let now = self.clock.now();
        self.queues
            .entry(position)
            .or_default()
            .push_back(QueuedParcel {
                parcel_id,
                position,
                deadline,
                enqueued_at: now,
            });
        *self.last_parcel_at.lock() = now;
    }

    /// Removes every queued expectation for a parcel (it arrived, was
    /// sorted, or was already reported lost).
    pub fn remove_parcel(&self, parcel_id: ParcelId) {
        for mut entry in self.queues.iter_mut() {
            entry.value_mut().retain(|task| task.parcel_id != parcel_id);
        }
    }

    /// Total queued expectations across all positions.
    pub fn queued_count(&self) -> usize {
        self.queues.iter().map(|e| e.value().len()).sum()
    }

    /// Number of parcels in the reported dedupe set.
    pub fn reported_count(&self) -> usize {
        self.reported.len()
    }

    /// Runs the scan loop until `cancel` fires.
    ///
    /// Each tick runs under panic isolation: the config provider is external
    /// code, and a panic there must not take the detection loop down with it.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_ms = self.options.scan_interval_ms,
            "loss monitoring service starting"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.options.scan_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("loss monitoring service stopping");
                    break;
                }

                _ = ticker.tick() => {
                    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.tick())) {
                        Ok(lost) => {
                            if lost > 0 {
                                debug!(lost, "loss scan reported parcels");
                            }
                        }
                        Err(_) => {
                            error!("loss scan panicked, continuing");
                        }
                    }
                }
            }
        }
    }

    /// Performs one scan. Returns the number of parcels newly reported lost.
    ///
    /// Reads the enable flag first; an unreadable or disabled flag makes the
    /// tick a no-op.
    pub fn tick(&self) -> usize {
        match self.config.loss_detection_enabled() {
            Ok(true) => {}
            Ok(false) => return 0,
            Err(err) => {
                warn!(error = %err, "enable flag unreadable, skipping loss scan");
                return 0;
            }
        }

        let now = self.clock.now();
        self.auto_clear_if_idle(now);

        // Collect expired heads per position, then purge outside the
        // iteration so remove_parcel never touches a held shard.
        let positions: Vec<u32> = self.queues.iter().map(|e| *e.key()).collect();
        let mut lost: Vec<QueuedParcel> = Vec::new();
        for position in positions {
            if let Some(mut queue) = self.queues.get_mut(&position) {
                while queue.front().is_some_and(|head| now > head.deadline) {
                    if let Some(task) = queue.pop_front() {
                        // Dedupe: first insert wins
                        if self.reported.insert(task.parcel_id, now).is_none() {
                            lost.push(task);
                        }
                    }
                }
            }
        }

        for task in &lost {
            error!(
                parcel_id = %task.parcel_id,
                position = task.position,
                deadline = %task.deadline,
                "parcel missed its arrival deadline, reporting lost"
            );
            self.events.publish(SortingEvent::ParcelLost {
                parcel_id: task.parcel_id,
                position: Some(task.position),
                exception_chute: self.options.exception_chute,
            });
            self.remove_parcel(task.parcel_id);
            self.tracker.forget_parcel(task.parcel_id);
        }

        self.prune_reported(now);
        lost.len()
    }

    fn auto_clear_if_idle(&self, now: DateTime<Utc>) {
        if self.options.idle_clear_after_ms == 0 {
            return;
        }
        let mut last_parcel_at = self.last_parcel_at.lock();
        let idle_ms = (now - *last_parcel_at).num_milliseconds();
        if idle_ms <= self.options.idle_clear_after_ms as i64 {
            return;
        }

        let dropped = self.queued_count();
        self.queues.clear();
        self.tracker.clear();
        *last_parcel_at = now;
        debug!(idle_ms, dropped, "idle period elapsed, cleared queues and statistics");
    }

    fn prune_reported(&self, now: DateTime<Utc>) {
        let mut last_prune = self.last_reported_prune.lock();
        let interval_ms = self.options.reported_prune_interval_ms as i64;
        if (now - *last_prune).num_milliseconds() < interval_ms {
            return;
        }
        let before = self.reported.len();
        self.reported
            .retain(|_, reported_at| (now - *reported_at).num_milliseconds() < interval_ms);
        *last_prune = now;
        debug!(removed = before - self.reported.len(), "pruned reported-parcel set");
    }
}
