//! Swarm of downloading peers
//!
//! Nodes run their own download loops and ask a `Scheduler` (implemented by
//! the `Coordinator`) which peer and chunk to pull next.

pub mod coordinator;
pub mod cost;
pub mod node;

pub use coordinator::Coordinator;
pub use cost::SegmentCost;
pub use node::{Node, NodeSpec, NodeState};

use crate::segfile::ChunkId;
use crate::Result;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Identifier of a node, unique within one coordinator's pool
pub type NodeId = usize;

/// A transfer recommended by the coordinator
#[derive(Debug, Clone)]
pub struct Action {
    /// Peer to download from
    pub peer: Arc<Node>,
    /// Chunk to download
    pub chunk: ChunkId,
    /// Negotiated bandwidth in bytes per second
    pub bandwidth: f64,
}

/// Capability handle a node uses to talk to its coordinator
pub trait Scheduler: Send + Sync {
    /// Lowest-cost transfer for `requester`, skipping peers in `connected`
    fn get_optimal_action(&self, requester: &Node, connected: &BTreeSet<NodeId>) -> Option<Action>;

    /// Bandwidth `requester` could currently get from `peer`
    fn get_bandwidth(&self, requester: &Node, peer: &Node) -> f64;

    /// Admit a new node to the pool
    fn add_node(&self, spec: NodeSpec) -> Result<Arc<Node>>;

    /// Remove a node from the pool
    fn remove_node(&self, id: NodeId) -> Result<Arc<Node>>;
}

/// Bandwidth committed to in-flight transfers
#[derive(Debug, Default)]
pub struct Bandwidth {
    value: RwLock<f64>,
}

impl Bandwidth {
    /// Add `delta` (negative to release)
    pub fn update(&self, delta: f64) {
        *self.value.write() += delta;
    }

    pub fn get(&self) -> f64 {
        *self.value.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_accounting() {
        let bw = Bandwidth::default();
        bw.update(3.5);
        bw.update(1.5);
        assert_eq!(bw.get(), 5.0);
        bw.update(-3.5);
        assert_eq!(bw.get(), 1.5);
    }
}
