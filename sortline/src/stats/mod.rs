//! Statistical components for adaptive loss detection.
//!
//! - [`RingBuffer`]: fixed-capacity, thread-safe window of recent samples.
//! - [`PositionIntervalTracker`]: per-position inter-arrival statistics and
//!   adaptive timeout thresholds built on the ring buffer and a clock.

mod interval_tracker;
mod ring_buffer;

pub use interval_tracker::{PositionIntervalTracker, PositionStats};
pub use ring_buffer::RingBuffer;
