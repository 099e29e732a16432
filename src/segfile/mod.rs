//! Segmented file model
//!
//! A file is split into fixed-size chunks, and chunks are grouped into
//! segments. Each segment carries its data chunks (redundancy level 0) plus
//! optional parity layers; a parity layer at level `r` can stand in for up to
//! `r` missing data chunks of that segment.

pub mod file;
pub mod segment;

pub use file::{FileSnapshot, SegmentSnapshot, SegmentView, SegmentedFile};
pub use segment::{level_width, Segment};

use crate::{Result, SwarmError};
use serde::{Deserialize, Serialize};

pub const KB: u64 = 1 << 10;
pub const MB: u64 = 1 << 20;
pub const GB: u64 = 1 << 30;

/// Availability of a single chunk at one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    #[default]
    NotAvailable,
    /// A transfer for this chunk is in flight
    PartiallyAvailable,
    Available,
}

impl std::fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvailabilityStatus::NotAvailable => write!(f, "NotAvailable"),
            AvailabilityStatus::PartiallyAvailable => write!(f, "PartiallyAvailable"),
            AvailabilityStatus::Available => write!(f, "Available"),
        }
    }
}

/// Address of a chunk within a segmented file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    /// Segment the chunk belongs to
    pub segment: usize,
    /// Redundancy level, 0 for data chunks
    pub level: usize,
    /// Position within the level
    pub index: usize,
}

impl ChunkId {
    pub fn new(segment: usize, level: usize, index: usize) -> Self {
        Self {
            segment,
            level,
            index,
        }
    }

    /// Whether this addresses a data chunk rather than a parity chunk
    pub fn is_data(&self) -> bool {
        self.level == 0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s:{},r:{},c:{}", self.segment, self.level, self.index)
    }
}

/// Shape of the file shared by every node in a swarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// File size in bytes
    pub file_size: u64,
    /// Number of data chunks per segment
    pub segment_size: usize,
    /// Chunk size in bytes
    pub chunk_size: u64,
}

impl FileDescriptor {
    /// Create a validated descriptor
    pub fn new(file_size: u64, segment_size: usize, chunk_size: u64) -> Result<Self> {
        let descriptor = Self {
            file_size,
            segment_size,
            chunk_size,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Validate the descriptor
    pub fn validate(&self) -> Result<()> {
        if self.file_size == 0 {
            return Err(SwarmError::InvalidConfig(
                "File size must be greater than 0".into(),
            ));
        }
        if self.segment_size == 0 {
            return Err(SwarmError::InvalidConfig(
                "Segment size must be greater than 0".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(SwarmError::InvalidConfig(
                "Chunk size must be greater than 0".into(),
            ));
        }
        if self.file_size % self.chunk_size != 0 {
            return Err(SwarmError::InvalidConfig(format!(
                "Chunk size {} does not evenly divide file size {}",
                self.chunk_size, self.file_size
            )));
        }
        Ok(())
    }

    /// Total number of data chunks in the file
    pub fn num_data_chunks(&self) -> usize {
        (self.file_size / self.chunk_size) as usize
    }

    /// Number of segments, counting a shorter trailing segment
    pub fn num_segments(&self) -> usize {
        (self.num_data_chunks() + self.segment_size - 1) / self.segment_size
    }

    /// Number of data chunks in segment `index`
    pub fn segment_len(&self, index: usize) -> usize {
        let start = index * self.segment_size;
        self.num_data_chunks()
            .saturating_sub(start)
            .min(self.segment_size)
    }

    /// Address of the `n`-th data chunk of the file
    pub fn data_chunk(&self, n: usize) -> ChunkId {
        ChunkId::new(n / self.segment_size, 0, n % self.segment_size)
    }
}
