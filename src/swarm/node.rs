//! Swarm node and its download loop
//!
//! A node owns one `SegmentedFile` and keeps pulling chunks until every
//! segment can be reconstructed. Transfers run as detached tasks that report
//! back on a channel private to the node's loop.

use crate::segfile::{AvailabilityStatus, ChunkId, FileDescriptor, FileSnapshot, SegmentedFile};
use crate::swarm::{Action, Bandwidth, NodeId, Scheduler};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::{Result, SwarmError};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Download state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Node is scheduling transfers
    Downloading,
    /// Node is waiting for an in-flight transfer to land
    Blocked,
    /// Node holds the whole file
    Complete,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Downloading => write!(f, "Downloading"),
            NodeState::Blocked => write!(f, "Blocked"),
            NodeState::Complete => write!(f, "Complete"),
        }
    }
}

/// Parameters for admitting a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSpec {
    /// Total bandwidth in bytes per second
    pub max_bandwidth: f64,
    /// Share of the bandwidth used for downloading; the rest uploads
    pub download_ratio: f64,
    /// Share of data chunks held at start
    pub availability: f64,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            max_bandwidth: (10 * crate::segfile::MB) as f64,
            download_ratio: 1.0 - 1.0 / std::f64::consts::E,
            availability: 0.0,
        }
    }
}

impl NodeSpec {
    pub fn with_availability(mut self, availability: f64) -> Self {
        self.availability = availability;
        self
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<()> {
        if !(self.max_bandwidth > 0.0) {
            return Err(SwarmError::InvalidConfig(
                "Node bandwidth must be greater than 0".into(),
            ));
        }
        if !(self.download_ratio > 0.0 && self.download_ratio < 1.0) {
            return Err(SwarmError::InvalidConfig(
                "Download ratio must be strictly between 0 and 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.availability) {
            return Err(SwarmError::InvalidConfig(
                "Availability must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Wall-clock pacing of a node's loop
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pacing {
    /// Simulated seconds per wall-clock second
    pub speed: f64,
    pub poll_interval: Duration,
}

/// Completion report posted by a transfer task
#[derive(Debug)]
struct TransferResult {
    action: Action,
    /// Simulated time at which the chunk landed
    finish_time: f64,
}

/// A peer in the swarm
pub struct Node {
    /// Identifier assigned by the coordinator
    pub id: NodeId,
    file: SegmentedFile,
    max_bandwidth: f64,
    download_ratio: f64,
    pub(crate) download: Bandwidth,
    pub(crate) upload: Bandwidth,
    state: RwLock<NodeState>,
    /// Simulated clock, merged from transfer finish times
    sim_time: RwLock<f64>,
    pacing: Pacing,
    telemetry: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("sim_time", &self.sim_time())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Build a node and seed its initial availability
    pub(crate) fn new<R: Rng + ?Sized>(
        id: NodeId,
        descriptor: FileDescriptor,
        spec: NodeSpec,
        pacing: Pacing,
        telemetry: Arc<dyn TelemetrySink>,
        rng: &mut R,
    ) -> Result<Self> {
        spec.validate()?;
        let file = SegmentedFile::new(descriptor)?;
        file.seed_availability(spec.availability, rng)?;

        let state = if file.is_complete() {
            NodeState::Complete
        } else {
            NodeState::Downloading
        };

        Ok(Self {
            id,
            file,
            max_bandwidth: spec.max_bandwidth,
            download_ratio: spec.download_ratio,
            download: Bandwidth::default(),
            upload: Bandwidth::default(),
            state: RwLock::new(state),
            sim_time: RwLock::new(0.0),
            pacing,
            telemetry,
        })
    }

    /// The node's copy of the file
    pub fn file(&self) -> &SegmentedFile {
        &self.file
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn is_complete(&self) -> bool {
        self.state() == NodeState::Complete
    }

    /// Simulated time of the latest landed transfer
    pub fn sim_time(&self) -> f64 {
        *self.sim_time.read()
    }

    pub fn max_download_bandwidth(&self) -> f64 {
        self.max_bandwidth * self.download_ratio
    }

    pub fn max_upload_bandwidth(&self) -> f64 {
        self.max_bandwidth * (1.0 - self.download_ratio)
    }

    /// Bandwidth committed to incoming transfers
    pub fn committed_download(&self) -> f64 {
        self.download.get()
    }

    /// Bandwidth committed to outgoing transfers
    pub fn committed_upload(&self) -> f64 {
        self.upload.get()
    }

    pub fn download_headroom(&self) -> f64 {
        self.max_download_bandwidth() - self.committed_download()
    }

    pub fn upload_headroom(&self) -> f64 {
        self.max_upload_bandwidth() - self.committed_upload()
    }

    /// Current availability of the node's file
    pub fn snapshot(&self) -> FileSnapshot {
        self.file.snapshot()
    }

    /// Start the download loop. Returns `None` for a node that already holds
    /// the whole file.
    pub fn start(self: &Arc<Self>, scheduler: Arc<dyn Scheduler>) -> Option<JoinHandle<()>> {
        info!(node = self.id, "starting node");
        if self.is_complete() {
            return None;
        }
        let node = Arc::clone(self);
        Some(tokio::spawn(node.download_loop(scheduler)))
    }

    async fn download_loop(self: Arc<Self>, scheduler: Arc<dyn Scheduler>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<TransferResult>();
        let mut connected: BTreeSet<NodeId> = BTreeSet::new();
        let mut in_flight = 0usize;

        loop {
            if self.file.all_planned_complete() {
                if in_flight > 0 {
                    self.await_completions(&mut rx, &mut connected, &mut in_flight)
                        .await;
                    continue;
                }
                if self.file.is_complete() {
                    self.finish();
                    break;
                }
                // Plan went stale with nothing in flight; schedule again
            }

            match scheduler.get_optimal_action(&self, &connected) {
                Some(action) => {
                    debug!(
                        node = self.id,
                        peer = action.peer.id,
                        chunk = %action.chunk,
                        bandwidth = action.bandwidth,
                        "scheduling transfer"
                    );
                    self.prepare_transfer(&action, &mut connected);
                    in_flight += 1;
                    self.spawn_transfer(action, tx.clone());
                }
                None if in_flight > 0 => {
                    self.await_completions(&mut rx, &mut connected, &mut in_flight)
                        .await;
                }
                None => {
                    trace!(node = self.id, "no eligible peer, polling");
                    tokio::time::sleep(self.pacing.poll_interval).await;
                }
            }
        }
    }

    /// Block until one transfer lands, then drain every ready one
    async fn await_completions(
        &self,
        rx: &mut mpsc::UnboundedReceiver<TransferResult>,
        connected: &mut BTreeSet<NodeId>,
        in_flight: &mut usize,
    ) {
        self.set_state(NodeState::Blocked);

        // The loop holds a sender, so the channel never closes here
        if let Some(result) = rx.recv().await {
            self.transfer_done(result, connected);
            *in_flight -= 1;
        }
        while let Ok(result) = rx.try_recv() {
            self.transfer_done(result, connected);
            *in_flight -= 1;
        }

        self.set_state(NodeState::Downloading);
    }

    fn prepare_transfer(&self, action: &Action, connected: &mut BTreeSet<NodeId>) {
        self.update_chunk(action.chunk, AvailabilityStatus::PartiallyAvailable);
        connected.insert(action.peer.id);
        self.download.update(action.bandwidth);
        action.peer.upload.update(action.bandwidth);
    }

    fn spawn_transfer(&self, action: Action, tx: mpsc::UnboundedSender<TransferResult>) {
        let seconds = self.file.chunk_size() as f64 / action.bandwidth;
        let finish_time = self.sim_time() + seconds;
        let delay = Duration::from_secs_f64(seconds / self.pacing.speed);

        trace!(node = self.id, seconds, "transfer started");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver only goes away when a deadline aborts the loop
            let _ = tx.send(TransferResult {
                action,
                finish_time,
            });
        });
    }

    fn transfer_done(&self, result: TransferResult, connected: &mut BTreeSet<NodeId>) {
        let TransferResult {
            action,
            finish_time,
        } = result;

        {
            let mut now = self.sim_time.write();
            *now = now.max(finish_time);
        }
        self.update_chunk(action.chunk, AvailabilityStatus::Available);
        connected.remove(&action.peer.id);
        self.download.update(-action.bandwidth);
        action.peer.upload.update(-action.bandwidth);
    }

    fn update_chunk(&self, chunk: ChunkId, status: AvailabilityStatus) {
        match self.file.set_chunk(chunk, status) {
            Ok(forced) => {
                self.telemetry.record(TelemetryEvent::AvailabilityUpdated {
                    node_id: self.id,
                    chunk,
                    status,
                });
                for data in forced {
                    self.telemetry.record(TelemetryEvent::AvailabilityUpdated {
                        node_id: self.id,
                        chunk: data,
                        status: AvailabilityStatus::Available,
                    });
                }
            }
            Err(e) => warn!(node = self.id, %chunk, "rejected chunk update: {}", e),
        }
    }

    fn finish(&self) {
        self.set_state(NodeState::Complete);
        let sim_time = self.sim_time();
        info!(node = self.id, sim_time, "download complete");
        self.telemetry.record(TelemetryEvent::NodeCompleted {
            node_id: self.id,
            sim_time,
        });
    }

    fn set_state(&self, state: NodeState) {
        *self.state.write() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segfile::{KB, MB};
    use crate::telemetry::NoopSink;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn pacing() -> Pacing {
        Pacing {
            speed: 1000.0,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn build(id: NodeId, availability: f64) -> Node {
        let descriptor = FileDescriptor::new(12 * MB, 10, 512 * KB).unwrap();
        Node::new(
            id,
            descriptor,
            NodeSpec::default().with_availability(availability),
            pacing(),
            Arc::new(NoopSink),
            &mut ChaCha8Rng::seed_from_u64(id as u64),
        )
        .unwrap()
    }

    #[test]
    fn test_node_creation() {
        let node = build(1, 0.4);
        assert_eq!(node.id, 1);
        assert_eq!(node.state(), NodeState::Downloading);
        assert_eq!(node.sim_time(), 0.0);
        assert_eq!(node.committed_download(), 0.0);
        assert!(!node.file().is_complete());
    }

    #[test]
    fn test_full_node_starts_complete() {
        let node = build(0, 1.0);
        assert_eq!(node.state(), NodeState::Complete);
        assert!(node.file().is_complete());
        for segment in node.snapshot().segments {
            assert!(segment.complete);
        }
    }

    #[test]
    fn test_bandwidth_split() {
        let node = build(0, 0.0);
        let total = node.max_download_bandwidth() + node.max_upload_bandwidth();
        assert!((total - (10 * MB) as f64).abs() < 1e-6);
        assert!(node.max_download_bandwidth() > node.max_upload_bandwidth());

        node.upload.update(node.max_upload_bandwidth());
        assert!(node.upload_headroom().abs() < 1e-6);
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let descriptor = FileDescriptor::new(12 * MB, 10, 512 * KB).unwrap();
        let spec = NodeSpec {
            download_ratio: 0.0,
            ..NodeSpec::default()
        };
        let result = Node::new(
            0,
            descriptor,
            spec,
            pacing(),
            Arc::new(NoopSink),
            &mut ChaCha8Rng::seed_from_u64(0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_transfer_bookkeeping_round_trip() {
        let node = build(1, 0.0);
        let peer = Arc::new(build(2, 1.0));
        let action = Action {
            peer: Arc::clone(&peer),
            chunk: ChunkId::new(0, 0, 3),
            bandwidth: 2.0 * MB as f64,
        };
        let mut connected = BTreeSet::new();

        node.prepare_transfer(&action, &mut connected);
        assert!(connected.contains(&2));
        assert_eq!(node.committed_download(), 2.0 * MB as f64);
        assert_eq!(peer.committed_upload(), 2.0 * MB as f64);
        assert_eq!(
            node.file().status(action.chunk),
            AvailabilityStatus::PartiallyAvailable
        );

        node.transfer_done(
            TransferResult {
                action: action.clone(),
                finish_time: 0.25,
            },
            &mut connected,
        );
        assert!(connected.is_empty());
        assert_eq!(node.committed_download(), 0.0);
        assert_eq!(peer.committed_upload(), 0.0);
        assert_eq!(node.sim_time(), 0.25);
        assert_eq!(node.file().status(action.chunk), AvailabilityStatus::Available);

        // Clock never moves backwards
        let early = Action {
            chunk: ChunkId::new(0, 0, 4),
            ..action
        };
        node.prepare_transfer(&early, &mut connected);
        node.transfer_done(
            TransferResult {
                action: early,
                finish_time: 0.1,
            },
            &mut connected,
        );
        assert_eq!(node.sim_time(), 0.25);
        assert_eq!(node.committed_download(), 0.0);
    }

    #[test]
    fn test_event_replay_matches_snapshot() {
        let descriptor = FileDescriptor::new(12 * MB, 10, 512 * KB).unwrap();
        let (sink, mut rx) = crate::telemetry::ChannelSink::new();
        let node = Node::new(
            1,
            descriptor,
            NodeSpec::default(),
            pacing(),
            Arc::new(sink),
            &mut ChaCha8Rng::seed_from_u64(1),
        )
        .unwrap();
        let mut replayed = node.snapshot();

        // Parity completes segment 0 and marks data chunk 9 as a side effect
        for i in 0..9 {
            node.update_chunk(ChunkId::new(0, 0, i), AvailabilityStatus::Available);
        }
        for i in 0..2 {
            node.update_chunk(ChunkId::new(0, 1, i), AvailabilityStatus::Available);
        }

        while let Ok(event) = rx.try_recv() {
            if let TelemetryEvent::AvailabilityUpdated { chunk, status, .. } = event {
                let width = node.file().chunks(chunk.segment, chunk.level).unwrap().len();
                replayed.segments[chunk.segment]
                    .levels
                    .entry(chunk.level)
                    .or_insert_with(|| vec![AvailabilityStatus::NotAvailable; width])[chunk.index] =
                    status;
            }
        }

        let actual = node.snapshot();
        assert!(actual.segments[0].complete);
        for (replay, truth) in replayed.segments.iter().zip(&actual.segments) {
            assert_eq!(replay.levels, truth.levels, "segment {}", truth.index);
        }
    }

    #[tokio::test]
    async fn test_loop_reschedules_after_parity_lands_short() {
        use crate::swarm::Coordinator;
        use crate::telemetry::ChannelSink;
        use crate::Config;

        let mut config = Config::default();
        config.speed = 10.0;
        config.poll_interval = Duration::from_millis(1);
        let (sink, mut rx) = ChannelSink::new();
        let coordinator = Arc::new(Coordinator::with_telemetry(&config, Arc::new(sink)).unwrap());

        let parity_holder = coordinator.add_node(NodeSpec::default()).unwrap();
        for i in 0..4 {
            parity_holder
                .file()
                .set_chunk(ChunkId::new(0, 2, i), AvailabilityStatus::Available)
                .unwrap();
        }
        // Everything but data chunk 9 of segment 0, which no peer holds
        let requester = coordinator.add_node(NodeSpec::default()).unwrap();
        for n in 0..requester.file().num_data_chunks() {
            let chunk = requester.file().descriptor().data_chunk(n);
            if chunk != ChunkId::new(0, 0, 9) {
                requester
                    .file()
                    .set_chunk(chunk, AvailabilityStatus::Available)
                    .unwrap();
            }
        }

        let scheduler: Arc<dyn Scheduler> = coordinator.clone();
        let handle = requester.start(scheduler).unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(requester.state(), NodeState::Blocked);
        assert!(requester.file().is_planned_complete(0).unwrap());

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(requester.state(), NodeState::Complete);
        assert!(requester.file().is_complete());
        assert_eq!(requester.committed_download(), 0.0);

        // Each landed parity chunk left the plan stale until the third one
        let mut parity_landed = Vec::new();
        let mut forced = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TelemetryEvent::AvailabilityUpdated {
                node_id,
                chunk,
                status: AvailabilityStatus::Available,
            } = event
            {
                if node_id != requester.id {
                    continue;
                }
                if chunk.level == 2 {
                    parity_landed.push(chunk.index);
                } else if chunk == ChunkId::new(0, 0, 9) {
                    forced.push(chunk);
                }
            }
        }
        assert_eq!(parity_landed, vec![0, 1, 2]);
        assert_eq!(forced.len(), 1);
        assert!(requester.sim_time() > 0.0);
    }
}
