//! Adaptive per-position interval statistics.
//!
//! The tracker keeps, for every sensor position on the line, a sliding
//! window of recent inter-arrival intervals. The loss monitor asks it for a
//! dynamic threshold: `median(window) × multiplier`, clamped to a configured
//! range. A sliding-window median resists skew from transient jams or
//! bursts and adapts automatically to throughput changes, while the
//! multiplier and clamp bound both false positives at low traffic and
//! detection latency at high traffic.
//!
//! # Thread Safety
//!
//! Internal state lives in `DashMap`s keyed by position index and parcel id,
//! so unrestricted concurrent `record_*` and read calls need no external
//! locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::config::IntervalTrackerOptions;
use crate::stats::RingBuffer;
use crate::types::ParcelId;

/// Transient parcel-position map is pruned once it grows past this.
const MAX_TRACKED_PARCELS: usize = 1_000;

/// Pruning keeps this many of the most recent parcel ids.
const PRUNE_KEEP_PARCELS: usize = 800;

/// Summary statistics for one position's interval window.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionStats {
    /// Samples currently in the window.
    pub count: usize,
    /// Smallest interval in the window (ms).
    pub min_ms: i64,
    /// Largest interval in the window (ms).
    pub max_ms: i64,
    /// Mean interval (ms).
    pub mean_ms: f64,
    /// Median interval (ms).
    pub median_ms: f64,
}

#[derive(Debug)]
struct PositionWindow {
    intervals: RingBuffer,
    last_update: parking_lot::Mutex<DateTime<Utc>>,
}

/// Per-position interval statistics and adaptive thresholds.
pub struct PositionIntervalTracker {
    options: IntervalTrackerOptions,
    windows: DashMap<u32, PositionWindow>,
    // position → arrival time, per in-flight parcel
    trails: DashMap<ParcelId, HashMap<u32, DateTime<Utc>>>,
}

impl PositionIntervalTracker {
    /// Creates a tracker with the given parameters.
    pub fn new(options: IntervalTrackerOptions) -> Self {
        Self {
            options,
            windows: DashMap::new(),
            trails: DashMap::new(),
        }
    }

    /// Records one inter-arrival interval for a position.
    ///
    /// Values outside `(0, max_reasonable_interval_ms]` are discarded — they
    /// are clock skew or restart artifacts, not real transit times.
    pub fn record_interval(&self, position: u32, interval_ms: i64, at: DateTime<Utc>) {
        if interval_ms <= 0 || interval_ms > self.options.max_reasonable_interval_ms {
            trace!(position, interval_ms, "interval outside reasonable range, discarded");
            return;
        }

        let window = self.windows.entry(position).or_insert_with(|| PositionWindow {
            intervals: RingBuffer::new(self.options.window_size),
            last_update: parking_lot::Mutex::new(at),
        });
        window.intervals.push(interval_ms);
        *window.last_update.lock() = at;
    }

    /// Records a parcel's arrival at a position.
    ///
    /// When the previous position's arrival time is known, the elapsed time
    /// feeds this position's interval window. Position 1 is line entry and
    /// never produces an interval.
    pub fn record_parcel_position(
        &self,
        parcel_id: ParcelId,
        position: u32,
        arrived_at: DateTime<Utc>,
    ) {
        let interval_ms = {
            let mut trail = self.trails.entry(parcel_id).or_default();
            let interval = if position > 1 {
                trail
                    .get(&(position - 1))
                    .map(|prior| (arrived_at - *prior).num_milliseconds())
            } else {
                None
            };
            trail.insert(position, arrived_at);
            interval
        };

        if let Some(ms) = interval_ms {
            self.record_interval(position, ms, arrived_at);
        }

        self.prune_trails();
    }

    /// Dynamic timeout threshold for a position, in milliseconds.
    ///
    /// `None` until the window holds at least `min_samples_for_threshold`
    /// samples; otherwise `median × multiplier` clamped to the configured
    /// range.
    pub fn dynamic_threshold(&self, position: u32) -> Option<u64> {
        let samples = self.windows.get(&position)?.intervals.snapshot();
        if samples.len() < self.options.min_samples_for_threshold {
            return None;
        }

        let threshold = median(&samples) * self.options.timeout_multiplier;
        let clamped = threshold
            .max(self.options.min_threshold_ms as f64)
            .min(self.options.max_threshold_ms as f64);
        Some(clamped.round() as u64)
    }

    /// Summary statistics for a position's window, if any samples exist.
    pub fn position_stats(&self, position: u32) -> Option<PositionStats> {
        let samples = self.windows.get(&position)?.intervals.snapshot();
        if samples.is_empty() {
            return None;
        }

        let min_ms = *samples.iter().min().unwrap_or(&0);
        let max_ms = *samples.iter().max().unwrap_or(&0);
        let mean_ms = samples.iter().sum::<i64>() as f64 / samples.len() as f64;
        Some(PositionStats {
            count: samples.len(),
            min_ms,
            max_ms,
            mean_ms,
            median_ms: median(&samples),
        })
    }

    /// When a position's window last changed.
    pub fn last_update(&self, position: u32) -> Option<DateTime<Utc>> {
        self.windows.get(&position).map(|w| *w.last_update.lock())
    }

    /// Number of parcels with a tracked trail.
    pub fn tracked_parcels(&self) -> usize {
        self.trails.len()
    }

    /// Drops the trail of a parcel that left the line.
    pub fn forget_parcel(&self, parcel_id: ParcelId) {
        self.trails.remove(&parcel_id);
    }

    /// Clears all interval windows and trails.
    ///
    /// Used by the loss monitor's idle auto-clear so stale history cannot
    /// poison future medians.
    pub fn clear(&self) {
        self.windows.clear();
        self.trails.clear();
    }

    // Parcel ids are assigned monotonically, so the numerically smallest
    // ids are the oldest trails.
    fn prune_trails(&self) {
        if self.trails.len() <= MAX_TRACKED_PARCELS {
            return;
        }

        let mut ids: Vec<ParcelId> = self.trails.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        let excess = ids.len().saturating_sub(PRUNE_KEEP_PARCELS);
        for id in ids.into_iter().take(excess) {
            self.trails.remove(&id);
        }
        debug!(removed = excess, kept = PRUNE_KEEP_PARCELS, "pruned parcel trails");
    }
}

/// Textbook median over a small sample set: full sort, mean of the middle
/// pair for even lengths.
fn median(samples: &[i64]) -> f64 {
    debug_assert!(!samples.is_empty());
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid] as f64
    } else {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    }
}
