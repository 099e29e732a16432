//! Per-segment availability and completion accounting

use crate::segfile::AvailabilityStatus;
use std::collections::BTreeMap;

/// Number of chunks at redundancy level `level` of a segment holding
/// `segment_size` data chunks. Parity level `r` carries `2 * r` chunks.
pub fn level_width(level: usize, segment_size: usize) -> usize {
    if level == 0 {
        segment_size
    } else {
        2 * level
    }
}

/// Status array of one materialized redundancy level
#[derive(Debug, Clone)]
struct Level {
    chunks: Vec<AvailabilityStatus>,
    /// Chunks not yet `Available`
    remaining: usize,
}

impl Level {
    fn new(width: usize) -> Self {
        Self {
            chunks: vec![AvailabilityStatus::NotAvailable; width],
            remaining: width,
        }
    }
}

/// A group of data chunks plus whichever parity levels have been touched
#[derive(Debug, Clone)]
pub struct Segment {
    index: usize,
    /// Level 0 is always present; parity levels are allocated on first use
    levels: BTreeMap<usize, Level>,
    transferring: usize,
    planned_complete: bool,
    complete: bool,
}

impl Segment {
    /// Create a segment with `size` data chunks, none available
    pub fn new(index: usize, size: usize) -> Self {
        let mut levels = BTreeMap::new();
        levels.insert(0, Level::new(size));
        Self {
            index,
            levels,
            transferring: 0,
            planned_complete: false,
            complete: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of data chunks in this segment
    pub fn size(&self) -> usize {
        self.levels.get(&0).map_or(0, |l| l.chunks.len())
    }

    /// Width of redundancy level `level` for this segment
    pub fn width(&self, level: usize) -> usize {
        level_width(level, self.size())
    }

    /// Status sequence for a level. Levels never touched read as an all
    /// `NotAvailable` placeholder of the conventional width.
    pub fn chunks(&self, level: usize) -> Vec<AvailabilityStatus> {
        match self.levels.get(&level) {
            Some(l) => l.chunks.clone(),
            None => vec![AvailabilityStatus::NotAvailable; self.width(level)],
        }
    }

    /// Status of a single chunk; unmaterialized or out-of-range reads as
    /// `NotAvailable`
    pub fn status(&self, level: usize, index: usize) -> AvailabilityStatus {
        self.levels
            .get(&level)
            .and_then(|l| l.chunks.get(index).copied())
            .unwrap_or_default()
    }

    /// Chunks not yet available at `level`, if that level is materialized
    pub fn remaining(&self, level: usize) -> Option<usize> {
        self.levels.get(&level).map(|l| l.remaining)
    }

    /// Chunks currently in flight across all levels
    pub fn transferring(&self) -> usize {
        self.transferring
    }

    /// Redundancy levels that have storage allocated
    pub fn materialized_levels(&self) -> Vec<usize> {
        self.levels.keys().copied().collect()
    }

    pub fn is_planned_complete(&self) -> bool {
        self.planned_complete
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether the scheduler should still pick chunks for this segment.
    ///
    /// A planned segment with nothing in flight is schedulable again: its
    /// plan relied on parity from a level the minimum no longer uses.
    pub fn needs_scheduling(&self) -> bool {
        !self.complete && !(self.planned_complete && self.transferring > 0)
    }

    /// Minimum outstanding work to reconstruct the segment.
    ///
    /// Relying on levels {0, r}, the work is `remaining[0] + remaining[r] - r`
    /// since level `r` covers up to `r` missing data chunks. The result is the
    /// minimum over every materialized level, level 0 included.
    pub fn check_remaining(&self) -> isize {
        let data = self.levels.get(&0).map_or(0, |l| l.remaining) as isize;
        self.levels
            .iter()
            .map(|(&level, l)| {
                if level == 0 {
                    data
                } else {
                    data + l.remaining as isize - level as isize
                }
            })
            .min()
            .unwrap_or(data)
    }

    /// Update one chunk. Returns `None` if `index` is outside the level,
    /// otherwise the level-0 indexes that completion marked available as a
    /// side effect.
    ///
    /// An `Available` chunk stays available; repeated calls are no-ops.
    pub(crate) fn set(
        &mut self,
        level: usize,
        index: usize,
        status: AvailabilityStatus,
    ) -> Option<Vec<usize>> {
        let width = self.width(level);
        if index >= width {
            return None;
        }

        let entry = self
            .levels
            .entry(level)
            .or_insert_with(|| Level::new(width));
        let previous = entry.chunks[index];
        if previous == status || previous == AvailabilityStatus::Available {
            return Some(Vec::new());
        }

        entry.chunks[index] = status;
        if status == AvailabilityStatus::Available {
            entry.remaining -= 1;
        }
        if previous == AvailabilityStatus::PartiallyAvailable {
            self.transferring -= 1;
        }
        if status == AvailabilityStatus::PartiallyAvailable {
            self.transferring += 1;
        }

        Some(self.refresh())
    }

    /// Recompute the planned/complete flags after a mutation
    fn refresh(&mut self) -> Vec<usize> {
        let outstanding = self.check_remaining();
        let mut forced = Vec::new();

        if !self.planned_complete && self.transferring as isize >= outstanding {
            self.planned_complete = true;
        }

        if !self.complete && outstanding <= 0 {
            self.complete = true;
            self.planned_complete = true;
            if let Some(data) = self.levels.get_mut(&0) {
                for (i, chunk) in data.chunks.iter_mut().enumerate() {
                    if *chunk == AvailabilityStatus::Available {
                        continue;
                    }
                    if *chunk == AvailabilityStatus::PartiallyAvailable {
                        self.transferring -= 1;
                    }
                    *chunk = AvailabilityStatus::Available;
                    forced.push(i);
                }
                data.remaining = 0;
            }
        }
        forced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AvailabilityStatus::*;

    #[test]
    fn test_new_segment() {
        let segment = Segment::new(2, 4);
        assert_eq!(segment.index(), 2);
        assert_eq!(segment.size(), 4);
        assert_eq!(segment.remaining(0), Some(4));
        assert_eq!(segment.remaining(1), None);
        assert_eq!(segment.check_remaining(), 4);
        assert!(!segment.is_planned_complete());
        assert!(!segment.is_complete());
    }

    #[test]
    fn test_placeholder_levels() {
        let segment = Segment::new(0, 10);
        assert_eq!(segment.chunks(3), vec![NotAvailable; 6]);
        assert_eq!(segment.status(3, 1), NotAvailable);
        assert_eq!(segment.materialized_levels(), vec![0]);
    }

    #[test]
    fn test_set_available_is_idempotent() {
        let mut segment = Segment::new(0, 10);
        assert_eq!(segment.set(0, 3, Available), Some(vec![]));
        assert_eq!(segment.remaining(0), Some(9));
        assert_eq!(segment.set(0, 3, Available), Some(vec![]));
        assert_eq!(segment.remaining(0), Some(9));
    }

    #[test]
    fn test_available_never_downgrades() {
        let mut segment = Segment::new(0, 10);
        segment.set(0, 3, Available);
        segment.set(0, 3, NotAvailable);
        segment.set(0, 3, PartiallyAvailable);
        assert_eq!(segment.status(0, 3), Available);
        assert_eq!(segment.remaining(0), Some(9));
        assert_eq!(segment.transferring(), 0);
    }

    #[test]
    fn test_transferring_counter() {
        let mut segment = Segment::new(0, 10);
        segment.set(0, 0, PartiallyAvailable);
        segment.set(2, 1, PartiallyAvailable);
        assert_eq!(segment.transferring(), 2);

        segment.set(0, 0, PartiallyAvailable);
        assert_eq!(segment.transferring(), 2);

        segment.set(0, 0, Available);
        assert_eq!(segment.transferring(), 1);
        segment.set(2, 1, NotAvailable);
        assert_eq!(segment.transferring(), 0);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut segment = Segment::new(0, 4);
        assert!(segment.set(0, 4, Available).is_none());
        assert!(segment.set(1, 2, Available).is_none());
        assert_eq!(segment.materialized_levels(), vec![0]);
    }

    #[test]
    fn test_check_remaining_formula() {
        let mut segment = Segment::new(0, 10);
        for i in 0..6 {
            segment.set(0, i, Available);
        }
        let k = 4;
        assert_eq!(segment.check_remaining(), k);

        // Level 2 has four parity chunks; download three of them
        for i in 0..3 {
            segment.set(2, i, Available);
        }
        let (m, r) = (1, 2);
        assert_eq!(segment.remaining(2), Some(1));
        assert_eq!(segment.check_remaining(), k.min(k + m - r));
        assert_eq!(segment.check_remaining(), 3);
    }

    #[test]
    fn test_fresh_parity_level_does_not_lower_minimum() {
        let mut segment = Segment::new(0, 10);
        segment.set(1, 0, PartiallyAvailable);
        // remaining[1] = 2, so 10 + 2 - 1 = 11 > 10
        assert_eq!(segment.check_remaining(), 10);
    }

    #[test]
    fn test_planned_complete_from_in_flight() {
        let mut segment = Segment::new(0, 4);
        segment.set(0, 0, Available);
        segment.set(0, 1, Available);
        segment.set(0, 2, PartiallyAvailable);
        assert!(!segment.is_planned_complete());
        segment.set(0, 3, PartiallyAvailable);
        assert!(segment.is_planned_complete());
        assert!(!segment.is_complete());
        assert!(!segment.needs_scheduling());

        segment.set(0, 2, Available);
        segment.set(0, 3, Available);
        assert!(segment.is_complete());
        assert!(segment.is_planned_complete());
    }

    #[test]
    fn test_completion_through_parity_marks_data_available() {
        let mut segment = Segment::new(0, 4);
        segment.set(0, 0, Available);
        segment.set(0, 1, Available);
        segment.set(0, 2, PartiallyAvailable);

        // Level 1 covers one missing data chunk once both parity chunks land
        segment.set(1, 0, Available);
        assert!(!segment.is_complete());
        segment.set(1, 1, Available);

        // 2 + 0 - 1 = 1 outstanding
        assert_eq!(segment.check_remaining(), 1);
        assert!(segment.is_planned_complete());

        // Chunk 2 was still in flight and is reported as a side effect
        assert_eq!(segment.set(0, 3, Available), Some(vec![2]));
        assert!(segment.is_complete());
        assert_eq!(segment.chunks(0), vec![Available; 4]);
        assert_eq!(segment.remaining(0), Some(0));
        assert_eq!(segment.transferring(), 0);
    }

    #[test]
    fn test_stale_plan_is_schedulable_again() {
        let mut segment = Segment::new(0, 4);
        segment.set(0, 0, Available);
        segment.set(0, 1, Available);
        segment.set(0, 2, Available);
        segment.set(2, 0, PartiallyAvailable);
        // min(1, 1 + 4 - 2) = 1, one chunk in flight
        assert!(segment.is_planned_complete());
        assert!(!segment.needs_scheduling());

        segment.set(2, 0, Available);
        // min(1, 1 + 3 - 2) = 1 with nothing in flight
        assert!(!segment.is_complete());
        assert!(segment.is_planned_complete());
        assert!(segment.needs_scheduling());
    }

    #[test]
    fn test_remaining_is_monotonic() {
        let mut segment = Segment::new(0, 6);
        let sequence = [
            (0, 1, PartiallyAvailable),
            (0, 1, Available),
            (1, 0, Available),
            (0, 1, NotAvailable),
            (0, 4, PartiallyAvailable),
            (1, 0, PartiallyAvailable),
            (0, 4, NotAvailable),
            (0, 5, Available),
        ];
        let mut last: Vec<Option<usize>> = vec![Some(6), None];
        for (level, index, status) in sequence {
            segment.set(level, index, status);
            for (l, previous) in last.iter_mut().enumerate() {
                let now = segment.remaining(l);
                if let (Some(p), Some(n)) = (*previous, now) {
                    assert!(n <= p);
                }
                *previous = now.or(*previous);
            }
        }
    }
}
