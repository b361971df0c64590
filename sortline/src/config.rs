//! Configuration options for the routing-and-execution subsystem.
//!
//! Each option group maps to one part of the system: concurrency limits for
//! the path executor, timeouts for the lifetime monitor, window/threshold
//! parameters for the interval tracker, and selection-mode settings for the
//! chute router. Defaults are exposed as named constants so operators and
//! tests can reference the shipped values.

use serde::{Deserialize, Serialize};

use crate::selection::SelectionMode;
use crate::types::ChuteId;

// =============================================================================
// Concurrency defaults
// =============================================================================

/// Default number of parcels allowed in physical execution at once.
pub const DEFAULT_MAX_CONCURRENT_PARCELS: usize = 32;

/// Default capacity for internal work queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default batch size for bulk operations.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Default bound on a single diverter-lock wait (milliseconds).
pub const DEFAULT_DIVERTER_LOCK_TIMEOUT_MS: u64 = 3_000;

// =============================================================================
// Timeout defaults
// =============================================================================

/// Default detection → assignment timeout (milliseconds).
pub const DEFAULT_DETECTION_TO_ASSIGNMENT_TIMEOUT_MS: u64 = 5_000;

/// Default assignment → sorting timeout (milliseconds).
pub const DEFAULT_ASSIGNMENT_TO_SORTING_TIMEOUT_MS: u64 = 30_000;

/// Default maximum lifetime before a parcel is declared lost (milliseconds).
pub const DEFAULT_MAX_LIFETIME_BEFORE_LOST_MS: u64 = 120_000;

/// Default lifetime-monitor scan interval (milliseconds).
pub const DEFAULT_LIFETIME_SCAN_INTERVAL_MS: u64 = 500;

// =============================================================================
// Interval tracker defaults
// =============================================================================

/// Default ring buffer capacity per position.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Default multiplier applied to the median interval.
pub const DEFAULT_TIMEOUT_MULTIPLIER: f64 = 3.0;

/// Default lower clamp for the dynamic threshold (milliseconds).
pub const DEFAULT_MIN_THRESHOLD_MS: u64 = 1_000;

/// Default upper clamp for the dynamic threshold (milliseconds).
pub const DEFAULT_MAX_THRESHOLD_MS: u64 = 10_000;

/// Default minimum sample count before a threshold is produced.
pub const DEFAULT_MIN_SAMPLES_FOR_THRESHOLD: usize = 3;

/// Default upper bound on a plausible inter-position interval (milliseconds).
///
/// Values above this are sensor glitches or restarts, not real transit
/// times, and must never skew the window.
pub const DEFAULT_MAX_REASONABLE_INTERVAL_MS: i64 = 60_000;

/// Default loss-monitor scan interval (milliseconds).
pub const DEFAULT_LOSS_SCAN_INTERVAL_MS: u64 = 1_000;

/// Default idle period after which queues and statistics are auto-cleared
/// (milliseconds). `0` disables auto-clear.
pub const DEFAULT_IDLE_CLEAR_AFTER_MS: u64 = 300_000;

/// Default prune interval for the reported-parcel dedupe set (milliseconds).
pub const DEFAULT_REPORTED_PRUNE_INTERVAL_MS: u64 = 3_600_000;

// =============================================================================
// Selection defaults
// =============================================================================

/// Default wait for an upstream chute assignment in Formal mode (milliseconds).
pub const DEFAULT_ASSIGNMENT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Concurrency limits for physical path execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcurrencyOptions {
    /// Maximum parcels admitted into physical execution at once.
    pub max_concurrent_parcels: usize,

    /// Capacity of the feeding work queues. Consumed by the external
    /// queueing layer, not by the executor itself.
    pub queue_capacity: usize,

    /// Batch size for bulk operations in the external queueing layer.
    pub batch_size: usize,

    /// Bound on a single diverter-lock wait (milliseconds).
    pub diverter_lock_timeout_ms: u64,
}

impl Default for ConcurrencyOptions {
    fn default() -> Self {
        Self {
            max_concurrent_parcels: DEFAULT_MAX_CONCURRENT_PARCELS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            diverter_lock_timeout_ms: DEFAULT_DIVERTER_LOCK_TIMEOUT_MS,
        }
    }
}

/// Timeouts governing the parcel lifetime monitor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutOptions {
    /// A parcel still unassigned this long after detection has timed out.
    pub detection_to_assignment_timeout_ms: u64,

    /// A parcel still unsorted this long after assignment has timed out.
    pub assignment_to_sorting_timeout_ms: u64,

    /// A parcel on the line this long without sorting is declared lost.
    pub max_lifetime_before_lost_ms: u64,

    /// How often the lifetime monitor scans tracked parcels.
    pub scan_interval_ms: u64,

    /// Optional window after detection during which destination changes are
    /// still accepted. `None` means no deadline.
    pub replan_deadline_ms: Option<u64>,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            detection_to_assignment_timeout_ms: DEFAULT_DETECTION_TO_ASSIGNMENT_TIMEOUT_MS,
            assignment_to_sorting_timeout_ms: DEFAULT_ASSIGNMENT_TO_SORTING_TIMEOUT_MS,
            max_lifetime_before_lost_ms: DEFAULT_MAX_LIFETIME_BEFORE_LOST_MS,
            scan_interval_ms: DEFAULT_LIFETIME_SCAN_INTERVAL_MS,
            replan_deadline_ms: None,
        }
    }
}

/// Parameters for the adaptive position interval tracker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntervalTrackerOptions {
    /// Ring buffer capacity per position.
    pub window_size: usize,

    /// Multiplier applied to the median interval.
    pub timeout_multiplier: f64,

    /// Lower clamp for the dynamic threshold (milliseconds).
    pub min_threshold_ms: u64,

    /// Upper clamp for the dynamic threshold (milliseconds).
    pub max_threshold_ms: u64,

    /// Minimum sample count before a threshold is produced.
    pub min_samples_for_threshold: usize,

    /// Upper bound on a plausible interval (milliseconds); larger values are
    /// discarded.
    pub max_reasonable_interval_ms: i64,
}

impl Default for IntervalTrackerOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            min_threshold_ms: DEFAULT_MIN_THRESHOLD_MS,
            max_threshold_ms: DEFAULT_MAX_THRESHOLD_MS,
            min_samples_for_threshold: DEFAULT_MIN_SAMPLES_FOR_THRESHOLD,
            max_reasonable_interval_ms: DEFAULT_MAX_REASONABLE_INTERVAL_MS,
        }
    }
}

/// Settings for the interval-based loss monitoring service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LossMonitorOptions {
    /// How often queue heads are checked against their deadlines.
    pub scan_interval_ms: u64,

    /// Idle period without new parcels after which queues and statistics are
    /// cleared. `0` disables auto-clear.
    pub idle_clear_after_ms: u64,

    /// Prune interval for the reported-parcel dedupe set.
    pub reported_prune_interval_ms: u64,

    /// Exception chute attached to lost-parcel events.
    pub exception_chute: ChuteId,
}

impl Default for LossMonitorOptions {
    fn default() -> Self {
        Self {
            scan_interval_ms: DEFAULT_LOSS_SCAN_INTERVAL_MS,
            idle_clear_after_ms: DEFAULT_IDLE_CLEAR_AFTER_MS,
            reported_prune_interval_ms: DEFAULT_REPORTED_PRUNE_INTERVAL_MS,
            exception_chute: ChuteId::new(0),
        }
    }
}

/// Settings for the chute selection router.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectionOptions {
    /// Active selection mode.
    pub mode: SelectionMode,

    /// Chute returned by the Fixed strategy. `None` or chute `0` is treated
    /// as missing.
    pub fixed_chute: Option<ChuteId>,

    /// Rotation list for the RoundRobin strategy.
    pub round_robin_chutes: Vec<ChuteId>,

    /// Guaranteed-safe destination used whenever normal selection cannot
    /// complete.
    pub exception_chute: ChuteId,

    /// How long Formal mode waits for an upstream assignment.
    pub assignment_wait_timeout_ms: u64,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            mode: SelectionMode::Formal,
            fixed_chute: None,
            round_robin_chutes: Vec::new(),
            exception_chute: ChuteId::new(0),
            assignment_wait_timeout_ms: DEFAULT_ASSIGNMENT_WAIT_TIMEOUT_MS,
        }
    }
}
