//! Coordinator owning the node pool
//!
//! The coordinator is an arena of nodes keyed by id. It assigns every node a
//! random bandwidth share at admission and answers scheduling queries by
//! comparing, per redundancy level, how cheaply the requester could finish its
//! next segment from the peers it is not already connected to.

use crate::segfile::{AvailabilityStatus, FileDescriptor};
use crate::swarm::cost::{self, SegmentCost, SlotEstimate};
use crate::swarm::node::Pacing;
use crate::swarm::{Action, Node, NodeId, NodeSpec, Scheduler};
use crate::telemetry::{NoopSink, TelemetryEvent, TelemetrySink};
use crate::{Config, Result, SwarmError};
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Range the per-node bandwidth share is drawn from
pub const BANDWIDTH_RATIO_RANGE: Range<f64> = 0.1..1.0;

/// Node pool and scheduler
pub struct Coordinator {
    descriptor: FileDescriptor,
    max_redundancy: usize,
    /// Offers below this are not worth a transfer
    min_bandwidth: f64,
    pacing: Pacing,
    pool: RwLock<BTreeMap<NodeId, Arc<Node>>>,
    /// Share of a peer's upload headroom it grants to a requester
    bandwidth_ratios: RwLock<HashMap<NodeId, f64>>,
    next_id: AtomicUsize,
    rng: Mutex<ChaCha8Rng>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Coordinator {
    /// Create an empty pool
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_telemetry(config, Arc::new(NoopSink))
    }

    /// Create an empty pool reporting to `telemetry`
    pub fn with_telemetry(config: &Config, telemetry: Arc<dyn TelemetrySink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            descriptor: config.file,
            max_redundancy: config.max_redundancy,
            min_bandwidth: config.min_bandwidth,
            pacing: Pacing {
                speed: config.speed,
                poll_interval: config.poll_interval,
            },
            pool: RwLock::new(BTreeMap::new()),
            bandwidth_ratios: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)),
            telemetry,
        })
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Get a node by id
    pub fn get_node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.pool.read().get(&id).cloned()
    }

    /// All nodes, ordered by id
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.pool.read().values().cloned().collect()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.pool.read().keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.pool.read().len()
    }

    /// Bandwidth share assigned to a node at admission
    pub fn bandwidth_ratio(&self, id: NodeId) -> Option<f64> {
        self.bandwidth_ratios.read().get(&id).copied()
    }

    /// Admit a node with an explicit bandwidth share
    fn admit(&self, spec: NodeSpec, ratio: Option<f64>) -> Result<Arc<Node>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (node, ratio) = {
            let mut rng = self.rng.lock();
            let ratio = ratio.unwrap_or_else(|| rng.gen_range(BANDWIDTH_RATIO_RANGE));
            let node = Node::new(
                id,
                self.descriptor,
                spec,
                self.pacing,
                Arc::clone(&self.telemetry),
                &mut *rng,
            )?;
            (Arc::new(node), ratio)
        };

        {
            let mut pool = self.pool.write();
            let mut ratios = self.bandwidth_ratios.write();
            pool.insert(id, Arc::clone(&node));
            ratios.insert(id, ratio);
        }

        info!(
            node = id,
            ratio,
            availability = spec.availability,
            complete = node.is_complete(),
            "node admitted"
        );
        self.telemetry.record(TelemetryEvent::NodeAdded {
            node_id: id,
            snapshot: node.snapshot(),
        });
        Ok(node)
    }

    /// Whether `bandwidth` is enough to open a transfer
    fn is_usable(&self, bandwidth: f64) -> bool {
        bandwidth > 0.0 && bandwidth >= self.min_bandwidth
    }

    /// Peers the requester may pull from, in id order, with their bandwidth
    fn candidates(&self, requester: &Node, connected: &BTreeSet<NodeId>) -> Vec<(Arc<Node>, f64)> {
        let peers: Vec<Arc<Node>> = self
            .pool
            .read()
            .values()
            .filter(|p| p.id != requester.id && !connected.contains(&p.id))
            .cloned()
            .collect();

        peers
            .into_iter()
            .map(|peer| {
                let bandwidth = self.get_bandwidth(requester, &peer);
                (peer, bandwidth)
            })
            .collect()
    }

    /// Evaluate how cheaply `requester` could finish `segment` relying on
    /// data chunks plus parity level `level`.
    pub fn get_cost(
        &self,
        requester: &Node,
        connected: &BTreeSet<NodeId>,
        segment: usize,
        level: usize,
    ) -> SegmentCost {
        let mut result = SegmentCost {
            segment,
            level,
            sequential: 0.0,
            parallel: 0.0,
            broken: false,
            peer: None,
            slot: None,
        };

        let Some(own) = requester.file().segment_view(segment, level) else {
            return result;
        };
        let needed: Vec<bool> = own
            .statuses
            .iter()
            .map(|&s| s == AvailabilityStatus::NotAvailable)
            .collect();

        let peers = self.candidates(requester, connected);
        let mut estimates: Vec<SlotEstimate> = needed
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n)
            .map(|(slot, _)| SlotEstimate {
                slot,
                cost: f64::INFINITY,
                peer: None,
            })
            .collect();

        for (index, (peer, bandwidth)) in peers.iter().enumerate() {
            if !self.is_usable(*bandwidth) {
                continue;
            }
            let Some(view) = peer.file().segment_view(segment, level) else {
                continue;
            };

            for estimate in estimates.iter_mut() {
                let slot = estimate.slot;
                let slot_cost = cost::slot_cost(
                    view.is_data_slot(slot),
                    view.statuses[slot],
                    view.complete,
                );
                let score = cost::slot_score(slot_cost, needed[slot], *bandwidth);
                if score <= 0.0 {
                    continue;
                }
                // Strict comparison keeps the lowest node id on ties
                let candidate = 1.0 / score;
                if candidate < estimate.cost {
                    estimate.cost = candidate;
                    estimate.peer = Some(index);
                }
            }
        }

        let summary = cost::summarize(estimates, level);
        result.sequential = summary.sequential;
        result.parallel = summary.parallel;
        result.broken = summary.broken;
        if let Some(cheapest) = summary.cheapest {
            result.slot = Some(cheapest.slot);
            result.peer = cheapest.peer.map(|i| Arc::clone(&peers[i].0));
        }
        result
    }
}

impl Scheduler for Coordinator {
    fn get_optimal_action(&self, requester: &Node, connected: &BTreeSet<NodeId>) -> Option<Action> {
        let segment = requester.file().next_schedulable_segment()?;

        let mut best: Option<SegmentCost> = None;
        for level in 1..=self.max_redundancy {
            let cost = self.get_cost(requester, connected, segment, level);
            if cost.broken {
                debug!(
                    node = requester.id,
                    segment, level, "segment unreachable at this level"
                );
            }
            if !cost.has_choice() {
                continue;
            }
            if best.as_ref().map_or(true, |b| cost.parallel < b.parallel) {
                best = Some(cost);
            }
        }

        let best = best?;
        let slot = best.slot?;
        let peer = best.peer?;
        let chunk = requester
            .file()
            .segment_view(segment, best.level)?
            .chunk_id(slot);
        let bandwidth = self.get_bandwidth(requester, &peer);
        if !self.is_usable(bandwidth) {
            return None;
        }

        Some(Action {
            peer,
            chunk,
            bandwidth,
        })
    }

    fn get_bandwidth(&self, requester: &Node, peer: &Node) -> f64 {
        let ratio = self.bandwidth_ratio(peer.id).unwrap_or(0.0);
        requester.download_headroom().min(peer.upload_headroom()) * ratio
    }

    fn add_node(&self, spec: NodeSpec) -> Result<Arc<Node>> {
        self.admit(spec, None)
    }

    fn remove_node(&self, id: NodeId) -> Result<Arc<Node>> {
        let node = {
            let mut pool = self.pool.write();
            let mut ratios = self.bandwidth_ratios.write();
            ratios.remove(&id);
            pool.remove(&id).ok_or(SwarmError::NodeNotFound(id))?
        };

        info!(node = id, "node removed");
        self.telemetry.record(TelemetryEvent::NodeRemoved { node_id: id });
        Ok(node)
    }
}
