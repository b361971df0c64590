//! Switching path values.
//!
//! A [`SwitchingPath`] is the physical route a parcel takes from its current
//! position to a target chute: an ordered list of diverter commands plus a
//! fallback chute that is always populated. Paths are produced by the
//! external topology lookup and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChuteId, DiverterDirection, DiverterId};

/// One diverter command within an ordered path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    /// Position of this segment within the path (1-based).
    pub sequence: u32,

    /// Diverter to actuate.
    pub diverter: DiverterId,

    /// Direction the diverter must take.
    pub direction: DiverterDirection,

    /// Maximum allowed time for this segment before it is deemed failed.
    pub ttl_ms: u64,
}

/// An immutable physical route to a target chute.
///
/// The fallback chute is the guaranteed-safe destination used whenever the
/// path cannot be executed; it is always populated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchingPath {
    /// Destination chute this path leads to.
    pub target_chute: ChuteId,

    /// Diverter commands in execution order.
    pub segments: Vec<PathSegment>,

    /// When the topology lookup generated this path.
    pub generated_at: DateTime<Utc>,

    /// Guaranteed-safe destination if execution fails.
    pub fallback_chute: ChuteId,
}

impl SwitchingPath {
    /// Creates a path with segments in execution order.
    pub fn new(
        target_chute: ChuteId,
        segments: Vec<PathSegment>,
        generated_at: DateTime<Utc>,
        fallback_chute: ChuteId,
    ) -> Self {
        Self {
            target_chute,
            segments,
            generated_at,
            fallback_chute,
        }
    }

    /// Returns the diverter ids in segment order.
    pub fn diverters(&self) -> impl Iterator<Item = DiverterId> + '_ {
        self.segments.iter().map(|s| s.diverter)
    }
}
