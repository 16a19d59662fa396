//! Fixed-capacity sliding window of recent soil-moisture samples.

use std::collections::VecDeque;

/// FIFO window over the most recent `capacity` samples with a tracked maximum.
///
/// The maximum is updated incrementally on append and only rescanned when the
/// evicted sample was the current maximum.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T = u32> {
    samples: VecDeque<T>,
    capacity: usize,
    max: Option<T>,
}

impl<T: Copy + Ord> HistoryBuffer<T> {
    /// Create an empty buffer. A zero capacity is bumped to one so the buffer
    /// always retains the latest sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            max: None,
        }
    }

    pub fn append(&mut self, value: T) {
        let mut rescan = false;
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                rescan = Some(evicted) == self.max;
            }
        }
        self.samples.push_back(value);

        if rescan {
            self.max = self.samples.iter().copied().max();
        } else {
            self.max = Some(self.max.map_or(value, |m| m.max(value)));
        }
    }

    /// Largest sample in the window, `None` until the first append.
    pub fn max(&self) -> Option<T> {
        self.max
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first view of the retained samples.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.samples.iter()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, values: &[u32]) -> HistoryBuffer {
        let mut h = HistoryBuffer::new(capacity);
        for &v in values {
            h.append(v);
        }
        h
    }

    // -- Empty buffer -------------------------------------------------------

    #[test]
    fn empty_buffer_has_no_max() {
        let h: HistoryBuffer = HistoryBuffer::new(15);
        assert!(h.is_empty());
        assert_eq!(h.max(), None);
    }

    #[test]
    fn zero_capacity_keeps_latest_sample() {
        let h = filled(0, &[4, 9, 2]);
        assert_eq!(h.capacity(), 1);
        assert_eq!(h.len(), 1);
        assert_eq!(h.max(), Some(2));
    }

    // -- Length & eviction --------------------------------------------------

    #[test]
    fn len_is_bounded_by_capacity() {
        let capacity = 5;
        for total in 0..20u32 {
            let values: Vec<u32> = (0..total).collect();
            let h = filled(capacity, &values);
            assert_eq!(h.len(), (total as usize).min(capacity), "after {total} appends");
        }
    }

    #[test]
    fn eviction_is_fifo() {
        let h = filled(3, &[1, 2, 3, 4, 5]);
        let kept: Vec<u32> = h.iter().copied().collect();
        assert_eq!(kept, vec![3, 4, 5]);
    }

    // -- Running maximum ----------------------------------------------------

    #[test]
    fn max_tracks_last_n_values() {
        let values = [120, 900, 300, 250, 40, 610, 610, 5, 77, 300, 1, 800, 2, 3];
        let capacity = 4;
        let mut h = HistoryBuffer::new(capacity);
        for (i, &v) in values.iter().enumerate() {
            h.append(v);
            let start = (i + 1).saturating_sub(capacity);
            let expected = values[start..=i].iter().copied().max();
            assert_eq!(h.max(), expected, "after appending index {i}");
        }
    }

    #[test]
    fn evicting_the_max_rescans() {
        let mut h = filled(3, &[900, 10, 20]);
        assert_eq!(h.max(), Some(900));
        h.append(30);
        assert_eq!(h.max(), Some(30));
    }

    #[test]
    fn evicting_duplicate_max_keeps_remaining_copy() {
        let mut h = filled(3, &[500, 500, 10]);
        h.append(20);
        assert_eq!(h.max(), Some(500));
        h.append(30);
        assert_eq!(h.max(), Some(30));
    }

    #[test]
    fn default_window_of_fifteen() {
        let values: Vec<u32> = (1..=40).collect();
        let h = filled(15, &values);
        assert_eq!(h.len(), 15);
        assert_eq!(h.max(), Some(40));
        assert_eq!(h.iter().next(), Some(&26));
    }
}
