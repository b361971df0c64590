//! Time-based parcel lifetime monitoring.
//!
//! Scans tracking records on a short interval and classifies parcels that
//! have been on the line too long. Loss is checked before timeout — a parcel
//! past its maximum lifetime is Lost even if it would also satisfy a timeout
//! rule. Each classification updates the record, publishes a local event,
//! and attempts exactly one upstream notification; a notification failure is
//! logged and never retried, so the monitor cannot block on upstream health.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::TimeoutOptions;
use crate::events::{EventBus, SortingEvent};
use crate::tracking::{ParcelStatus, ParcelTrackingStore};
use crate::types::ChuteId;
use crate::upstream::{SortingOutcome, SortingReport, UpstreamClient};

/// Classification produced for one record in one scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Classification {
    TimedOut,
    Lost,
}

/// Periodic monitor classifying tracked parcels as timed-out or lost.
pub struct ParcelLifetimeMonitor {
    store: Arc<ParcelTrackingStore>,
    upstream: Arc<dyn UpstreamClient>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    options: TimeoutOptions,
    exception_chute: ChuteId,
}

impl ParcelLifetimeMonitor {
    /// Creates a monitor over the shared tracking store.
    pub fn new(
        store: Arc<ParcelTrackingStore>,
        upstream: Arc<dyn UpstreamClient>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        options: TimeoutOptions,
        exception_chute: ChuteId,
    ) -> Self {
        Self {
            store,
            upstream,
            events,
            clock,
            options,
            exception_chute,
        }
    }

    /// Runs the scan loop until `cancel` fires.
    ///
    /// Each scan runs in its own task so a panic from a collaborator (the
    /// upstream client is external code) is contained to that tick; the loop
    /// logs the fault and keeps scanning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_ms = self.options.scan_interval_ms,
            "lifetime monitor starting"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.options.scan_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("lifetime monitor stopping");
                    break;
                }

                _ = ticker.tick() => {
                    let monitor = Arc::clone(&self);
                    match tokio::spawn(async move { monitor.scan().await }).await {
                        Ok(classified) => {
                            if classified > 0 {
                                debug!(classified, "lifetime scan classified parcels");
                            }
                        }
                        Err(err) => {
                            error!(error = %err, "lifetime scan aborted, continuing");
                        }
                    }
                }
            }
        }
    }

    /// Scans all candidate records once. Returns the number classified.
    ///
    /// Per-record faults (a record vanishing mid-scan, upstream errors) are
    /// logged and do not stop the scan.
    pub async fn scan(&self) -> usize {
        let now = self.clock.now();
        let mut classified = 0;

        for record in self.store.scan_candidates() {
            let since_detection = (now - record.detected_at).num_milliseconds();

            // Loss takes priority over timeout.
            let classification = if record.status != ParcelStatus::Sorted
                && record.sorted_at.is_none()
                && since_detection > self.options.max_lifetime_before_lost_ms as i64
            {
                Some(Classification::Lost)
            } else if record.status == ParcelStatus::Detected
                && record.assigned_at.is_none()
                && since_detection > self.options.detection_to_assignment_timeout_ms as i64
            {
                Some(Classification::TimedOut)
            } else if matches!(record.status, ParcelStatus::Assigned | ParcelStatus::Routing)
                && record.sorted_at.is_none()
            {
                match record.assigned_at {
                    Some(assigned_at)
                        if (now - assigned_at).num_milliseconds()
                            > self.options.assignment_to_sorting_timeout_ms as i64 =>
                    {
                        Some(Classification::TimedOut)
                    }
                    _ => None,
                }
            } else {
                None
            };

            let Some(classification) = classification else {
                continue;
            };

            let (status, outcome) = match classification {
                Classification::TimedOut => (ParcelStatus::TimedOut, SortingOutcome::Timeout),
                Classification::Lost => (ParcelStatus::Lost, SortingOutcome::Lost),
            };

            self.store.update(record.parcel_id, |r| {
                r.status = status;
                r.last_seen_at = now;
            });

            match classification {
                Classification::TimedOut => {
                    warn!(
                        parcel_id = %record.parcel_id,
                        elapsed_ms = since_detection,
                        "parcel timed out"
                    );
                    self.events.publish(SortingEvent::ParcelTimedOut {
                        parcel_id: record.parcel_id,
                        detected_at: record.detected_at,
                        elapsed_ms: since_detection,
                        exception_chute: self.exception_chute,
                    });
                }
                Classification::Lost => {
                    error!(
                        parcel_id = %record.parcel_id,
                        elapsed_ms = since_detection,
                        "parcel lost on line"
                    );
                    self.events.publish(SortingEvent::ParcelLost {
                        parcel_id: record.parcel_id,
                        position: None,
                        exception_chute: self.exception_chute,
                    });
                }
            }

            // Exactly one notification attempt; failures are logged only.
            let report = SortingReport {
                parcel_id: record.parcel_id,
                outcome,
                chute: self.exception_chute,
                reason: Some(match classification {
                    Classification::TimedOut => "lifetime timeout".to_string(),
                    Classification::Lost => "exceeded max lifetime".to_string(),
                }),
            };
            if let Err(err) = self.upstream.notify_sorting_completed(report).await {
                warn!(
                    parcel_id = %record.parcel_id,
                    error = %err,
                    "upstream notification failed, not retrying"
                );
            }

            classified += 1;
        }

        classified
    }
}
