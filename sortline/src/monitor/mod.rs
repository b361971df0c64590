//! Background monitors for timed-out and lost parcels.
//!
//! Two independent detection paths run as periodic loops:
//!
//! - [`ParcelLifetimeMonitor`]: time-based, over tracking records — fixed
//!   timeouts from detection and assignment, loss by maximum lifetime.
//! - [`ParcelLossMonitoringService`]: interval-based, over position-indexed
//!   queues — adaptive deadlines from the
//!   [`PositionIntervalTracker`](crate::stats::PositionIntervalTracker).
//!
//! Each loop isolates per-tick faults: a failed or empty tick is logged and
//! the next tick runs normally, so no single bad iteration stops a loop.
//! Both loops stop promptly when their cancellation token fires.

mod lifetime;
mod loss;

pub use lifetime::ParcelLifetimeMonitor;
pub use loss::{
    ConfigReadError, LossMonitorConfigProvider, ParcelLossMonitoringService, QueuedParcel,
};
