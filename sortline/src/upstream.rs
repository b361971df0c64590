//! Interface to the external decision system.
//!
//! The upstream system assigns destination chutes to detected parcels and
//! receives completion reports. Transport (TCP/MQTT/HTTP) is vendor-specific
//! and lives outside this crate; only the contract is defined here.

use serde::Serialize;
use thiserror::Error;

use crate::types::{BoxFuture, ChuteId, ParcelId};

/// Final outcome reported for one parcel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SortingOutcome {
    /// Delivered to its assigned chute.
    Sorted,
    /// Routed to the exception chute after a failure.
    Exception,
    /// Classified timed-out by the lifetime monitor.
    Timeout,
    /// Classified physically lost.
    Lost,
}

/// Completion report sent upstream.
#[derive(Clone, Debug, Serialize)]
pub struct SortingReport {
    /// Parcel the report concerns.
    pub parcel_id: ParcelId,
    /// Final outcome.
    pub outcome: SortingOutcome,
    /// Chute the parcel actually went to.
    pub chute: ChuteId,
    /// Failure reason, if any.
    pub reason: Option<String>,
}

/// Errors from upstream communication.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The decision system could not be reached.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// The decision system rejected the message.
    #[error("upstream rejected request: {0}")]
    Rejected(String),
}

/// Client for the external decision system.
///
/// Chute assignments flow back in through the
/// [`AssignmentDispatcher`](crate::selection::AssignmentDispatcher), not
/// through this trait.
pub trait UpstreamClient: Send + Sync {
    /// Announces a newly detected parcel.
    fn notify_detected(&self, parcel_id: ParcelId) -> BoxFuture<'_, Result<(), UpstreamError>>;

    /// Reports a parcel's final outcome.
    fn notify_sorting_completed(
        &self,
        report: SortingReport,
    ) -> BoxFuture<'_, Result<(), UpstreamError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpstreamError::Unreachable("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_report_serializes() {
        let report = SortingReport {
            parcel_id: ParcelId::new(1),
            outcome: SortingOutcome::Timeout,
            chute: ChuteId::new(99),
            reason: Some("no assignment".into()),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("Timeout"));
    }
}
