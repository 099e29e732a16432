//! FEC Swarm
//!
//! Simulates distribution of a large file across a swarm of peers that use
//! forward-error-correction redundancy. Each node schedules its own downloads
//! through a coordinator that weighs chunk availability, parity levels and
//! bandwidth headroom.

pub mod segfile;
pub mod simulation;
pub mod swarm;
pub mod telemetry;
pub mod ui;

pub use segfile::{AvailabilityStatus, ChunkId, FileDescriptor, SegmentedFile};
pub use simulation::{Scenario, SimulationReport, Simulator};
pub use swarm::{Action, Coordinator, Node, NodeId, NodeSpec, NodeState, Scheduler};
pub use telemetry::{TelemetryEvent, TelemetrySink};
pub use ui::SwarmMonitor;

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the swarm simulation
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Segment {0} out of range")]
    SegmentOutOfRange(usize),

    #[error("Chunk {0} out of range")]
    ChunkOutOfRange(ChunkId),

    #[error("Node {0} not found in pool")]
    NodeNotFound(NodeId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Configuration for a simulation run
#[derive(Debug, Clone)]
pub struct Config {
    /// Shape of the shared file
    pub file: FileDescriptor,
    /// Total bandwidth of each node in bytes per second
    pub max_bandwidth: f64,
    /// Share of `max_bandwidth` reserved for downloading
    pub download_ratio: f64,
    /// Smallest bandwidth a transfer may be opened with, in bytes per second.
    /// Peers offering less are treated as busy.
    pub min_bandwidth: f64,
    /// Highest parity level the coordinator evaluates
    pub max_redundancy: usize,
    /// Simulation speed multiplier (higher = faster wall clock)
    pub speed: f64,
    /// Wall-clock pause between polls when a node has nothing to do
    pub poll_interval: Duration,
    /// Wall-clock deadline for the whole swarm to finish
    pub deadline: Duration,
    /// Seed for every random choice made during the run
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file: FileDescriptor {
                file_size: 12 * segfile::MB,
                segment_size: 10,
                chunk_size: 512 * segfile::KB,
            },
            max_bandwidth: (10 * segfile::MB) as f64,
            download_ratio: 1.0 - 1.0 / std::f64::consts::E,
            min_bandwidth: (10 * segfile::MB) as f64 / 50.0,
            max_redundancy: 3,
            speed: 1.0,
            poll_interval: Duration::from_millis(50),
            deadline: Duration::from_secs(300),
            seed: 0,
        }
    }
}

impl Config {
    /// Create a configuration for the given file shape
    pub fn new(file: FileDescriptor) -> Self {
        Self {
            file,
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.file.validate()?;
        if !(self.max_bandwidth > 0.0) {
            return Err(SwarmError::InvalidConfig(
                "Max bandwidth must be greater than 0".into(),
            ));
        }
        if !(self.download_ratio > 0.0 && self.download_ratio < 1.0) {
            return Err(SwarmError::InvalidConfig(
                "Download ratio must be strictly between 0 and 1".into(),
            ));
        }
        if !(self.min_bandwidth >= 0.0 && self.min_bandwidth < self.max_bandwidth) {
            return Err(SwarmError::InvalidConfig(
                "Min bandwidth must be within [0, max bandwidth)".into(),
            ));
        }
        if self.max_redundancy == 0 {
            return Err(SwarmError::InvalidConfig(
                "Max redundancy must be at least 1".into(),
            ));
        }
        if !(self.speed > 0.0) {
            return Err(SwarmError::InvalidConfig(
                "Speed must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
