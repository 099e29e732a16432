//! Telemetry events emitted by the swarm
//!
//! Nodes and the coordinator report availability changes to a
//! `TelemetrySink`. Sinks decide what to do with them: drop them, log them
//! through `tracing`, or forward them over a channel to a consumer such as the
//! terminal monitor or a JSON printer.

use crate::segfile::{AvailabilityStatus, ChunkId, FileSnapshot};
use crate::swarm::NodeId;
use crate::Result;
use serde::Serialize;
use tokio::sync::mpsc;

/// A discrete change in swarm state
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A node joined the pool with the given initial availability
    NodeAdded {
        node_id: NodeId,
        snapshot: FileSnapshot,
    },
    /// A node left the pool
    NodeRemoved { node_id: NodeId },
    /// A chunk changed status at a node
    AvailabilityUpdated {
        node_id: NodeId,
        chunk: ChunkId,
        status: AvailabilityStatus,
    },
    /// A node finished reconstructing the whole file
    NodeCompleted { node_id: NodeId, sim_time: f64 },
}

impl TelemetryEvent {
    /// Node the event is about
    pub fn node_id(&self) -> NodeId {
        match self {
            TelemetryEvent::NodeAdded { node_id, .. }
            | TelemetryEvent::NodeRemoved { node_id }
            | TelemetryEvent::AvailabilityUpdated { node_id, .. }
            | TelemetryEvent::NodeCompleted { node_id, .. } => *node_id,
        }
    }

    /// Serialize as a single JSON object
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl std::fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryEvent::NodeAdded { node_id, snapshot } => {
                write!(f, "node {} joined ({} segments)", node_id, snapshot.segments.len())
            }
            TelemetryEvent::NodeRemoved { node_id } => write!(f, "node {} left", node_id),
            TelemetryEvent::AvailabilityUpdated {
                node_id,
                chunk,
                status,
            } => write!(f, "node {} ({}) -> {}", node_id, chunk, status),
            TelemetryEvent::NodeCompleted { node_id, sim_time } => {
                write!(f, "node {} complete at {:.2}s", node_id, sim_time)
            }
        }
    }
}

/// Receiver of telemetry events
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Sink that turns events into `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::AvailabilityUpdated {
                node_id,
                chunk,
                status,
            } => {
                tracing::trace!(node = node_id, %chunk, %status, "availability updated");
            }
            TelemetryEvent::NodeCompleted { node_id, sim_time } => {
                tracing::info!(node = node_id, sim_time, "node completed");
            }
            other => tracing::debug!(node = other.node_id(), "{}", other),
        }
    }
}

/// Sink forwarding events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn record(&self, event: TelemetryEvent) {
        // Receiver dropped means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let event = TelemetryEvent::AvailabilityUpdated {
            node_id: 3,
            chunk: ChunkId::new(1, 0, 4),
            status: AvailabilityStatus::PartiallyAvailable,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["kind"], "availability_updated");
        assert_eq!(value["data"]["node_id"], 3);
        assert_eq!(value["data"]["chunk"]["segment"], 1);
        assert_eq!(value["data"]["chunk"]["index"], 4);
        assert_eq!(value["data"]["status"], "partially_available");
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.record(TelemetryEvent::NodeRemoved { node_id: 9 });
        sink.record(TelemetryEvent::NodeCompleted {
            node_id: 2,
            sim_time: 1.5,
        });

        assert_eq!(rx.recv().await.unwrap().node_id(), 9);
        assert!(matches!(
            rx.recv().await,
            Some(TelemetryEvent::NodeCompleted { node_id: 2, .. })
        ));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.record(TelemetryEvent::NodeRemoved { node_id: 1 });
    }
}
