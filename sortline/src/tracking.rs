//! Parcel tracking records and the shared in-memory store.
//!
//! Tracking records are owned by the wider sorting system; this subsystem
//! consumes them to drive the lifetime monitor and updates them as parcels
//! progress, time out, or go missing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::types::{ChuteId, ParcelId};

/// Lifecycle status of a tracked parcel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ParcelStatus {
    /// Detected on the line, no destination yet.
    Detected,
    /// Destination assigned.
    Assigned,
    /// Physical routing in progress.
    Routing,
    /// Delivered to a chute. Terminal.
    Sorted,
    /// Classified timed-out by the lifetime monitor.
    TimedOut,
    /// Classified physically lost. Terminal.
    Lost,
}

/// Tracking state for one parcel.
#[derive(Clone, Debug, Serialize)]
pub struct ParcelTrackingRecord {
    /// Parcel identifier.
    pub parcel_id: ParcelId,

    /// Current status.
    pub status: ParcelStatus,

    /// When the parcel was detected.
    pub detected_at: DateTime<Utc>,

    /// When a destination was assigned, if it was.
    pub assigned_at: Option<DateTime<Utc>>,

    /// When the parcel was sorted, if it was.
    pub sorted_at: Option<DateTime<Utc>>,

    /// Last time any sensor or monitor touched this record.
    pub last_seen_at: DateTime<Utc>,

    /// Assigned destination, if any.
    pub target_chute: Option<ChuteId>,
}

impl ParcelTrackingRecord {
    /// Creates a freshly detected record.
    pub fn detected(parcel_id: ParcelId, at: DateTime<Utc>) -> Self {
        Self {
            parcel_id,
            status: ParcelStatus::Detected,
            detected_at: at,
            assigned_at: None,
            sorted_at: None,
            last_seen_at: at,
            target_chute: None,
        }
    }
}

/// Shared in-memory store of tracking records, keyed by parcel id.
#[derive(Debug, Default)]
pub struct ParcelTrackingStore {
    records: DashMap<ParcelId, ParcelTrackingRecord>,
}

impl ParcelTrackingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: ParcelTrackingRecord) {
        self.records.insert(record.parcel_id, record);
    }

    /// Returns a copy of a parcel's record.
    pub fn get(&self, parcel_id: ParcelId) -> Option<ParcelTrackingRecord> {
        self.records.get(&parcel_id).map(|r| r.clone())
    }

    /// Applies `update` to a parcel's record, if present.
    pub fn update<F>(&self, parcel_id: ParcelId, update: F) -> bool
    where
        F: FnOnce(&mut ParcelTrackingRecord),
    {
        match self.records.get_mut(&parcel_id) {
            Some(mut record) => {
                update(&mut record);
                true
            }
            None => false,
        }
    }

    /// Marks a parcel assigned to a chute.
    pub fn mark_assigned(&self, parcel_id: ParcelId, chute: ChuteId, at: DateTime<Utc>) -> bool {
        self.update(parcel_id, |r| {
            r.status = ParcelStatus::Assigned;
            r.assigned_at = Some(at);
            r.target_chute = Some(chute);
            r.last_seen_at = at;
        })
    }

    /// Marks a parcel in physical routing.
    pub fn mark_routing(&self, parcel_id: ParcelId, at: DateTime<Utc>) -> bool {
        self.update(parcel_id, |r| {
            r.status = ParcelStatus::Routing;
            r.last_seen_at = at;
        })
    }

    /// Marks a parcel sorted to a chute.
    pub fn mark_sorted(&self, parcel_id: ParcelId, chute: ChuteId, at: DateTime<Utc>) -> bool {
        self.update(parcel_id, |r| {
            r.status = ParcelStatus::Sorted;
            r.sorted_at = Some(at);
            r.target_chute = Some(chute);
            r.last_seen_at = at;
        })
    }

    /// Removes a parcel's record.
    pub fn remove(&self, parcel_id: ParcelId) -> Option<ParcelTrackingRecord> {
        self.records.remove(&parcel_id).map(|(_, r)| r)
    }

    /// Number of tracked parcels.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copies the records the lifetime monitor still cares about: everything
    /// not yet Sorted or Lost. TimedOut records stay eligible so they can
    /// escalate to Lost.
    pub fn scan_candidates(&self) -> Vec<ParcelTrackingRecord> {
        self.records
            .iter()
            .filter(|r| !matches!(r.status, ParcelStatus::Sorted | ParcelStatus::Lost))
            .map(|r| r.clone())
            .collect()
    }
}
