//! Simulation driver
//!
//! Builds a swarm from a scenario, starts every node under a completion
//! barrier and collects the outcome.

pub mod scenario;

pub use scenario::Scenario;

use crate::swarm::{Coordinator, NodeId, NodeSpec, NodeState, Scheduler};
use crate::telemetry::{NoopSink, TelemetrySink};
use crate::{Config, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Runs one swarm to completion
pub struct Simulator {
    coordinator: Arc<Coordinator>,
    config: Config,
}

impl Simulator {
    /// Create a simulator with an empty swarm
    pub fn new(config: Config) -> Result<Self> {
        Self::with_telemetry(config, Arc::new(NoopSink))
    }

    /// Create a simulator reporting to `telemetry`
    pub fn with_telemetry(config: Config, telemetry: Arc<dyn TelemetrySink>) -> Result<Self> {
        let coordinator = Arc::new(Coordinator::with_telemetry(&config, telemetry)?);
        Ok(Self {
            coordinator,
            config,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Base spec every scenario node is derived from
    pub fn base_spec(&self) -> NodeSpec {
        NodeSpec {
            max_bandwidth: self.config.max_bandwidth,
            download_ratio: self.config.download_ratio,
            availability: 0.0,
        }
    }

    /// Add the nodes of `scenario` to the swarm
    pub fn populate(&self, scenario: &Scenario) -> Result<Vec<NodeId>> {
        let specs = scenario.specs(self.base_spec())?;
        info!(%scenario, nodes = specs.len(), "populating swarm");

        specs
            .into_iter()
            .map(|spec| self.coordinator.add_node(spec).map(|n| n.id))
            .collect()
    }

    /// Start every node and wait until all finish or the deadline passes
    pub async fn run(&self) -> Result<SimulationReport> {
        let started = Instant::now();
        let scheduler: Arc<dyn Scheduler> = self.coordinator.clone();

        let mut handles = Vec::new();
        for node in self.coordinator.nodes() {
            if let Some(handle) = node.start(Arc::clone(&scheduler)) {
                handles.push((node.id, handle));
            }
        }
        info!(running = handles.len(), "simulation started");

        let barrier = async {
            for (id, handle) in handles.iter_mut() {
                if let Err(e) = handle.await {
                    warn!(node = *id, "node loop ended abnormally: {}", e);
                }
            }
        };
        let timed_out = tokio::time::timeout(self.config.deadline, barrier)
            .await
            .is_err();

        if timed_out {
            warn!(
                deadline = ?self.config.deadline,
                "deadline reached, aborting unfinished nodes"
            );
            for (_, handle) in &handles {
                handle.abort();
            }
        }

        let report = self.report(timed_out, started.elapsed());
        info!(
            complete = report.complete_count(),
            total = report.nodes.len(),
            makespan = report.makespan(),
            "simulation finished"
        );
        Ok(report)
    }

    /// Per-node outcome as it stands now
    pub fn report(&self, timed_out: bool, wall_time: Duration) -> SimulationReport {
        SimulationReport {
            nodes: self
                .coordinator
                .nodes()
                .iter()
                .map(|n| NodeReport {
                    id: n.id,
                    state: n.state(),
                    sim_time: n.sim_time(),
                })
                .collect(),
            timed_out,
            wall_time,
        }
    }

    /// Current state of the swarm
    pub fn status(&self) -> SimulationStatus {
        let nodes = self.coordinator.nodes();
        let count = |state: NodeState| nodes.iter().filter(|n| n.state() == state).count();

        let progress = if nodes.is_empty() {
            1.0
        } else {
            nodes.iter().map(|n| n.file().progress()).sum::<f64>() / nodes.len() as f64
        };

        SimulationStatus {
            total_nodes: nodes.len(),
            complete_nodes: count(NodeState::Complete),
            downloading_nodes: count(NodeState::Downloading),
            blocked_nodes: count(NodeState::Blocked),
            progress,
        }
    }
}

/// Outcome for one node
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub id: NodeId,
    pub state: NodeState,
    /// Simulated seconds until the node's last transfer landed
    pub sim_time: f64,
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub nodes: Vec<NodeReport>,
    /// Whether the deadline cut the run short
    pub timed_out: bool,
    pub wall_time: Duration,
}

impl SimulationReport {
    pub fn complete_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Complete)
            .count()
    }

    pub fn all_complete(&self) -> bool {
        self.complete_count() == self.nodes.len()
    }

    /// Nodes that never reconstructed the file
    pub fn incomplete(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.state != NodeState::Complete)
            .map(|n| n.id)
            .collect()
    }

    /// Latest simulated finish time across the swarm
    pub fn makespan(&self) -> f64 {
        self.nodes.iter().map(|n| n.sim_time).fold(0.0, f64::max)
    }
}

/// Live summary of the swarm
#[derive(Debug, Clone)]
pub struct SimulationStatus {
    pub total_nodes: usize,
    pub complete_nodes: usize,
    pub downloading_nodes: usize,
    pub blocked_nodes: usize,
    /// Mean share of data chunks held across nodes
    pub progress: f64,
}

impl SimulationStatus {
    /// Get the completion percentage
    pub fn completion_percentage(&self) -> f64 {
        if self.total_nodes == 0 {
            return 100.0;
        }
        (self.complete_nodes as f64 / self.total_nodes as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segfile::{FileDescriptor, KB, MB};
    use crate::telemetry::{ChannelSink, TelemetryEvent};

    fn fast_config(seed: u64) -> Config {
        let mut config = Config::new(FileDescriptor::new(12 * MB, 10, 512 * KB).unwrap());
        config.speed = 1000.0;
        config.poll_interval = Duration::from_millis(1);
        config.deadline = Duration::from_secs(30);
        config.seed = seed;
        config
    }

    #[tokio::test]
    async fn test_full_node_needs_no_loop() {
        let simulator = Simulator::new(fast_config(1)).unwrap();
        simulator.populate(&Scenario::Custom(vec![1.0])).unwrap();

        let report = simulator.run().await.unwrap();
        assert!(report.all_complete());
        assert!(!report.timed_out);
        assert_eq!(report.makespan(), 0.0);
    }

    #[tokio::test]
    async fn test_seeder_and_empty_peer() {
        let simulator = Simulator::new(fast_config(2)).unwrap();
        simulator.populate(&Scenario::Custom(vec![1.0, 0.0])).unwrap();

        let report = simulator.run().await.unwrap();
        assert!(report.all_complete(), "incomplete: {:?}", report.incomplete());
        assert!(report.makespan() > 0.0);

        let leecher = simulator.coordinator().get_node(1).unwrap();
        assert!(leecher.file().is_complete());
        assert_eq!(leecher.committed_download(), 0.0);
        let seeder = simulator.coordinator().get_node(0).unwrap();
        assert!(seeder.committed_upload().abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_single_seeder_swarm_completes() {
        let simulator = Simulator::new(fast_config(3)).unwrap();
        simulator
            .populate(&Scenario::SingleSeeder {
                leechers: 3,
                availability: 0.5,
            })
            .unwrap();

        let report = simulator.run().await.unwrap();
        assert!(report.all_complete(), "incomplete: {:?}", report.incomplete());
        let status = simulator.status();
        assert_eq!(status.complete_nodes, 4);
        assert_eq!(status.completion_percentage(), 100.0);
        assert!((status.progress - 1.0).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mixed_swarm_on_worker_pool() {
        let simulator = Simulator::new(fast_config(4)).unwrap();
        simulator
            .populate(&Scenario::Mixed {
                nodes: 10,
                seeders: 1,
                availability: 0.4,
            })
            .unwrap();

        let report = simulator.run().await.unwrap();
        assert!(report.all_complete(), "incomplete: {:?}", report.incomplete());
        assert!(!report.timed_out);
        // No transfer runs below the bandwidth floor, and each of the 60
        // chunk slots (24 data, 12 per parity level up to 3) lands at most once
        let slowest = simulator.config().file.chunk_size as f64 / simulator.config().min_bandwidth;
        assert!(report.makespan() <= 60.0 * slowest + 1e-6);
        for node in simulator.coordinator().nodes() {
            assert!(node.download_headroom() > 0.0);
        }
    }

    #[tokio::test]
    async fn test_unreachable_chunks_hit_deadline() {
        let mut config = fast_config(5);
        config.deadline = Duration::from_millis(200);
        let simulator = Simulator::new(config).unwrap();
        // Nobody holds the whole file and nobody can produce parity
        simulator.populate(&Scenario::Custom(vec![0.0, 0.0])).unwrap();

        let report = simulator.run().await.unwrap();
        assert!(report.timed_out);
        assert_eq!(report.incomplete(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_events_reach_channel_sink() {
        let (sink, mut rx) = ChannelSink::new();
        let simulator = Simulator::with_telemetry(fast_config(6), Arc::new(sink)).unwrap();
        simulator.populate(&Scenario::Custom(vec![1.0, 0.9])).unwrap();
        simulator.run().await.unwrap();

        let mut added = 0;
        let mut in_flight = 0;
        let mut landed = 0;
        let mut completed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                TelemetryEvent::NodeAdded { .. } => added += 1,
                TelemetryEvent::AvailabilityUpdated { status, .. } => match status {
                    crate::AvailabilityStatus::PartiallyAvailable => in_flight += 1,
                    crate::AvailabilityStatus::Available => landed += 1,
                    crate::AvailabilityStatus::NotAvailable => {}
                },
                TelemetryEvent::NodeCompleted { node_id, .. } => completed.push(node_id),
                TelemetryEvent::NodeRemoved { .. } => {}
            }
        }

        assert_eq!(added, 2);
        assert!(in_flight > 0);
        assert_eq!(in_flight, landed);
        assert_eq!(completed, vec![1]);
    }

    #[test]
    fn test_report_helpers() {
        let report = SimulationReport {
            nodes: vec![
                NodeReport {
                    id: 0,
                    state: NodeState::Complete,
                    sim_time: 2.0,
                },
                NodeReport {
                    id: 1,
                    state: NodeState::Blocked,
                    sim_time: 3.5,
                },
            ],
            timed_out: true,
            wall_time: Duration::from_secs(1),
        };
        assert_eq!(report.complete_count(), 1);
        assert!(!report.all_complete());
        assert_eq!(report.incomplete(), vec![1]);
        assert_eq!(report.makespan(), 3.5);
    }
}
