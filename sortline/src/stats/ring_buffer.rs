//! Fixed-capacity thread-safe sample window.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A bounded window of recent numeric samples.
///
/// Pushing beyond capacity evicts the oldest sample. All operations take a
/// short internal lock, so the buffer can be shared freely across tasks.
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    samples: Mutex<VecDeque<i64>>,
}

impl RingBuffer {
    /// Creates a buffer holding at most `capacity` samples.
    ///
    /// A zero capacity is clamped to one; an empty window has no meaning.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Maximum number of samples retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a sample, evicting the oldest when full.
    pub fn push(&self, sample: i64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Returns true if no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Removes all samples.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    /// Copies the current window, oldest first.
    pub fn snapshot(&self) -> Vec<i64> {
        self.samples.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_and_snapshot_order() {
        let buffer = RingBuffer::new(5);
        buffer.push(10);
        buffer.push(20);
        buffer.push(30);
        assert_eq!(buffer.snapshot(), vec![10, 20, 30]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_eviction_at_capacity() {
        let buffer = RingBuffer::new(3);
        for v in [1, 2, 3, 4, 5] {
            buffer.push(v);
        }
        assert_eq!(buffer.snapshot(), vec![3, 4, 5]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_clear() {
        let buffer = RingBuffer::new(3);
        buffer.push(1);
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let buffer = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.snapshot(), vec![2]);
    }

    #[test]
    fn test_concurrent_pushes_never_exceed_capacity() {
        use std::sync::Arc;
        use std::thread;

        let buffer = Arc::new(RingBuffer::new(10));
        let mut handles = vec![];
        for t in 0..4 {
            let buffer = Arc::clone(&buffer);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    buffer.push(t * 100 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 10);
    }

    proptest! {
        #[test]
        fn prop_window_keeps_last_capacity_samples(
            values in proptest::collection::vec(-1_000_000i64..1_000_000, 0..50),
            capacity in 1usize..12,
        ) {
            let buffer = RingBuffer::new(capacity);
            for &v in &values {
                buffer.push(v);
            }
            let expected: Vec<i64> = values
                .iter()
                .copied()
                .skip(values.len().saturating_sub(capacity))
                .collect();
            prop_assert_eq!(buffer.snapshot(), expected);
        }
    }
}
