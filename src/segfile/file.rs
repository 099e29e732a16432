//! Segmented file with per-chunk availability
//!
//! Every node owns one `SegmentedFile`. The owning node is the only writer;
//! the coordinator takes short read locks to inspect peers.

use crate::segfile::{AvailabilityStatus, ChunkId, FileDescriptor, Segment};
use crate::{Result, SwarmError};
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

/// A file split into segments, guarded by a single lock
#[derive(Debug)]
pub struct SegmentedFile {
    descriptor: FileDescriptor,
    segments: RwLock<Vec<Segment>>,
}

impl SegmentedFile {
    /// Create a file with no chunk available
    pub fn new(descriptor: FileDescriptor) -> Result<Self> {
        descriptor.validate()?;
        let segments = (0..descriptor.num_segments())
            .map(|i| Segment::new(i, descriptor.segment_len(i)))
            .collect();

        Ok(Self {
            descriptor,
            segments: RwLock::new(segments),
        })
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn num_segments(&self) -> usize {
        self.descriptor.num_segments()
    }

    pub fn num_data_chunks(&self) -> usize {
        self.descriptor.num_data_chunks()
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> u64 {
        self.descriptor.chunk_size
    }

    /// Number of data chunks in segment `index`
    pub fn segment_size(&self, index: usize) -> usize {
        self.descriptor.segment_len(index)
    }

    /// Mark a random `ratio` share of the data chunks as available
    pub fn seed_availability<R: Rng + ?Sized>(&self, ratio: f64, rng: &mut R) -> Result<()> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(SwarmError::InvalidConfig(format!(
                "Availability ratio {} outside [0, 1]",
                ratio
            )));
        }

        let total = self.num_data_chunks();
        let count = (ratio * total as f64) as usize;
        for n in rand::seq::index::sample(rng, total, count.min(total)) {
            self.set_chunk(self.descriptor.data_chunk(n), AvailabilityStatus::Available)?;
        }
        Ok(())
    }

    /// Status sequence of one level of one segment
    pub fn chunks(&self, segment: usize, level: usize) -> Result<Vec<AvailabilityStatus>> {
        let segments = self.segments.read();
        segments
            .get(segment)
            .map(|s| s.chunks(level))
            .ok_or(SwarmError::SegmentOutOfRange(segment))
    }

    /// Status of one chunk
    pub fn status(&self, chunk: ChunkId) -> AvailabilityStatus {
        self.segments
            .read()
            .get(chunk.segment)
            .map(|s| s.status(chunk.level, chunk.index))
            .unwrap_or_default()
    }

    /// Update the availability of one chunk.
    ///
    /// Returns the data chunks that became available because the update
    /// completed their segment.
    pub fn set_chunk(&self, chunk: ChunkId, status: AvailabilityStatus) -> Result<Vec<ChunkId>> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(chunk.segment)
            .ok_or(SwarmError::SegmentOutOfRange(chunk.segment))?;

        let forced = segment
            .set(chunk.level, chunk.index, status)
            .ok_or(SwarmError::ChunkOutOfRange(chunk))?;
        Ok(forced
            .into_iter()
            .map(|index| ChunkId::new(chunk.segment, 0, index))
            .collect())
    }

    /// Minimum outstanding work to reconstruct segment `index`
    pub fn check_remaining(&self, index: usize) -> Result<isize> {
        self.with_segment(index, Segment::check_remaining)
    }

    pub fn is_planned_complete(&self, index: usize) -> Result<bool> {
        self.with_segment(index, Segment::is_planned_complete)
    }

    pub fn is_segment_complete(&self, index: usize) -> Result<bool> {
        self.with_segment(index, Segment::is_complete)
    }

    /// Run `f` against one segment under the read lock
    pub fn with_segment<T>(&self, index: usize, f: impl FnOnce(&Segment) -> T) -> Result<T> {
        let segments = self.segments.read();
        segments
            .get(index)
            .map(f)
            .ok_or(SwarmError::SegmentOutOfRange(index))
    }

    /// Whether in-flight transfers suffice to finish every segment
    pub fn all_planned_complete(&self) -> bool {
        self.segments.read().iter().all(Segment::is_planned_complete)
    }

    /// Whether every segment can be reconstructed
    pub fn is_complete(&self) -> bool {
        self.segments.read().iter().all(Segment::is_complete)
    }

    /// First segment, in index order, that still needs scheduling
    pub fn next_schedulable_segment(&self) -> Option<usize> {
        self.segments
            .read()
            .iter()
            .position(Segment::needs_scheduling)
    }

    /// Combined level-0 and level-`level` statuses of a segment, read
    /// atomically
    pub fn segment_view(&self, segment: usize, level: usize) -> Option<SegmentView> {
        let segments = self.segments.read();
        let s = segments.get(segment)?;
        let mut statuses = s.chunks(0);
        let data_width = statuses.len();
        if level > 0 {
            statuses.extend(s.chunks(level));
        }

        Some(SegmentView {
            segment,
            level,
            data_width,
            statuses,
            complete: s.is_complete(),
        })
    }

    /// Fraction of segments complete plus partial credit for data chunks
    pub fn progress(&self) -> f64 {
        let segments = self.segments.read();
        let total = self.num_data_chunks();
        if total == 0 {
            return 1.0;
        }
        let available: usize = segments
            .iter()
            .map(|s| s.size() - s.remaining(0).unwrap_or(0))
            .sum();
        available as f64 / total as f64
    }

    /// Ordered per-segment, per-level status vectors
    pub fn snapshot(&self) -> FileSnapshot {
        let segments = self.segments.read();
        FileSnapshot {
            segments: segments
                .iter()
                .map(|s| SegmentSnapshot {
                    index: s.index(),
                    levels: s
                        .materialized_levels()
                        .into_iter()
                        .map(|level| (level, s.chunks(level)))
                        .collect(),
                    planned_complete: s.is_planned_complete(),
                    complete: s.is_complete(),
                })
                .collect(),
        }
    }
}

/// Statuses over levels {0, r} of one segment
#[derive(Debug, Clone)]
pub struct SegmentView {
    pub segment: usize,
    pub level: usize,
    /// Slots below this index are data chunks, the rest parity
    pub data_width: usize,
    pub statuses: Vec<AvailabilityStatus>,
    pub complete: bool,
}

impl SegmentView {
    /// Number of slots in the combined vector
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn is_data_slot(&self, slot: usize) -> bool {
        slot < self.data_width
    }

    /// Chunk address for a slot of the combined vector
    pub fn chunk_id(&self, slot: usize) -> ChunkId {
        if self.is_data_slot(slot) {
            ChunkId::new(self.segment, 0, slot)
        } else {
            ChunkId::new(self.segment, self.level, slot - self.data_width)
        }
    }
}

/// Availability snapshot of a whole file
#[derive(Debug, Clone, Serialize)]
pub struct FileSnapshot {
    pub segments: Vec<SegmentSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentSnapshot {
    pub index: usize,
    pub levels: BTreeMap<usize, Vec<AvailabilityStatus>>,
    pub planned_complete: bool,
    pub complete: bool,
}
