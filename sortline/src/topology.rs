//! Topology lookup interface.
//!
//! Path planning is external: given a target chute, the lookup returns the
//! ordered switching path from the line's current layout, or `None` when no
//! route exists (chute offline, layout change mid-shift).

use crate::path::SwitchingPath;
use crate::types::ChuteId;

/// Resolves a target chute to a switching path.
pub trait TopologyLookup: Send + Sync {
    /// Returns the path to `target`, or `None` if the chute is unreachable.
    fn resolve(&self, target: ChuteId) -> Option<SwitchingPath>;
}
