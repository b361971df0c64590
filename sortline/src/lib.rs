//! Sortline - routing and execution core for a conveyor sorting line.
//!
//! Parcels detected by line sensors are routed to output chutes by
//! commanding diverter actuators, in coordination with an external decision
//! system, without ever stalling the line. This crate covers the parts that
//! need real concurrency coordination and failure-mode design:
//!
//! - [`route_plan::RoutePlan`]: per-parcel routing state machine and
//!   destination-change arbitration.
//! - [`executor::ConcurrentSwitchingPathExecutor`]: admission-controlled
//!   execution of diverter sequences under per-device locks.
//! - [`stats::PositionIntervalTracker`]: adaptive statistical thresholds for
//!   classifying parcels as timed-out or physically lost.
//! - [`selection`]: chute-selection strategies with guaranteed fallback.
//! - [`monitor`]: the two independent background detection loops.
//!
//! Hardware drivers, wire protocols, persistence, and the REST surface live
//! outside this crate; they are consumed through the traits in
//! [`upstream`], [`topology`], and [`executor`].

pub mod clock;
pub mod config;
pub mod events;
pub mod executor;
pub mod locks;
pub mod monitor;
pub mod path;
pub mod route_plan;
pub mod selection;
pub mod service;
pub mod stats;
pub mod topology;
pub mod tracking;
pub mod types;
pub mod upstream;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConcurrencyOptions, IntervalTrackerOptions, LossMonitorOptions, SelectionOptions,
    TimeoutOptions,
};
pub use events::{EventBus, SortingEvent};
pub use executor::{
    ConcurrentSwitchingPathExecutor, ExecutionError, PathExecutionResult, PhysicalPathExecutor,
};
pub use locks::{DiverterLockGuard, DiverterLockManager, LockAcquireError};
pub use monitor::{
    LossMonitorConfigProvider, ParcelLifetimeMonitor, ParcelLossMonitoringService,
};
pub use path::{PathSegment, SwitchingPath};
pub use route_plan::{ChuteChangeDecision, RoutePlan, RoutePlanError, RoutePlanStatus};
pub use selection::{
    AssignmentDispatcher, ChuteSelection, ChuteSelectionRouter, SelectionMode, SelectionRequest,
};
pub use service::RoutingService;
pub use stats::{PositionIntervalTracker, RingBuffer};
pub use topology::TopologyLookup;
pub use tracking::{ParcelStatus, ParcelTrackingRecord, ParcelTrackingStore};
pub use types::{BoxFuture, ChuteId, DiverterDirection, DiverterId, ParcelId};
pub use upstream::{SortingOutcome, SortingReport, UpstreamClient, UpstreamError};
