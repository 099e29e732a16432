//! Cost model for choosing the next transfer
//!
//! The cost of pulling a slot from a peer is `slot_cost / bandwidth`: the
//! relative price of the chunk kind divided by the bandwidth that peer can
//! offer. For a segment evaluated at redundancy level `r`, the `r / 2` most
//! expensive needed slots may be skipped because parity covers them.

use crate::segfile::AvailabilityStatus;
use crate::swarm::Node;
use std::cmp::Ordering;
use std::sync::Arc;

/// Relative price of a data chunk the peer already holds
pub const DATA_COST: f64 = 1.0;
/// Relative price of a parity chunk the peer already holds
pub const PARITY_COST: f64 = 1.05;
/// Relative price of a chunk a complete peer has to produce on demand
pub const RECONSTRUCT_COST: f64 = 1.11;

/// Relative price of pulling one slot from a peer.
///
/// `peer_status` is the peer's status for the slot and `peer_complete`
/// whether the peer has reconstructed the whole segment.
pub fn slot_cost(is_data: bool, peer_status: AvailabilityStatus, peer_complete: bool) -> f64 {
    match peer_status {
        AvailabilityStatus::Available if is_data => DATA_COST,
        AvailabilityStatus::Available => PARITY_COST,
        _ if peer_complete => RECONSTRUCT_COST,
        _ => f64::INFINITY,
    }
}

/// Score of a slot from one peer; zero when the slot is unobtainable
pub fn slot_score(slot_cost: f64, needed: bool, bandwidth: f64) -> f64 {
    if !needed || !slot_cost.is_finite() || bandwidth <= 0.0 {
        return 0.0;
    }
    (1.0 / slot_cost) * bandwidth
}

/// Cheapest known source for one needed slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotEstimate {
    /// Position in the combined {0, r} vector
    pub slot: usize,
    /// Cost from the best peer, infinite if none has it
    pub cost: f64,
    /// Index of the best peer in the candidate list
    pub peer: Option<usize>,
}

/// Aggregate over a segment's needed slots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSummary {
    pub sequential: f64,
    pub parallel: f64,
    /// A slot that cannot be skipped has no source
    pub broken: bool,
    /// Cheapest reachable slot
    pub cheapest: Option<SlotEstimate>,
}

/// Fold per-slot estimates into sequential and parallel cost.
///
/// Estimates are sorted ascending (stable, so equal costs keep slot order)
/// and the `level / 2` most expensive are dropped. Sequential cost sums the
/// rest; parallel cost is their maximum. Infinite entries in the kept range
/// mark the result broken and are skipped.
pub fn summarize(mut estimates: Vec<SlotEstimate>, level: usize) -> CostSummary {
    estimates.sort_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap_or(Ordering::Equal));

    let keep = estimates.len().saturating_sub(level / 2);
    let mut sequential = 0.0;
    let mut parallel: f64 = 0.0;
    let mut broken = false;

    for estimate in &estimates[..keep] {
        if !estimate.cost.is_finite() {
            broken = true;
            continue;
        }
        sequential += estimate.cost;
        parallel = parallel.max(estimate.cost);
    }

    CostSummary {
        sequential,
        parallel,
        broken,
        cheapest: estimates
            .first()
            .copied()
            .filter(|e| e.cost.is_finite() && e.peer.is_some()),
    }
}

/// Result of evaluating one segment at one redundancy level
#[derive(Debug, Clone)]
pub struct SegmentCost {
    pub segment: usize,
    pub level: usize,
    pub sequential: f64,
    pub parallel: f64,
    pub broken: bool,
    /// Peer to pull the cheapest slot from
    pub peer: Option<Arc<Node>>,
    /// Cheapest slot in the combined {0, level} vector
    pub slot: Option<usize>,
}

impl SegmentCost {
    /// Whether this level offers anything to download
    pub fn has_choice(&self) -> bool {
        self.peer.is_some() && self.slot.is_some()
    }
}
