//! Predefined swarm layouts

use crate::swarm::NodeSpec;
use crate::{Result, SwarmError};

/// How a swarm is populated before the run starts
#[derive(Debug, Clone)]
pub enum Scenario {
    /// One node holds the whole file, the others a random share of it
    SingleSeeder { leechers: usize, availability: f64 },
    /// `seeders` full nodes among `nodes` total, the rest partially seeded
    Mixed {
        nodes: usize,
        seeders: usize,
        availability: f64,
    },
    /// One availability ratio per node
    Custom(Vec<f64>),
}

impl Scenario {
    /// Node specs for this scenario, derived from `base`
    pub fn specs(&self, base: NodeSpec) -> Result<Vec<NodeSpec>> {
        let specs: Vec<NodeSpec> = match self {
            Scenario::SingleSeeder {
                leechers,
                availability,
            } => std::iter::once(base.with_availability(1.0))
                .chain((0..*leechers).map(|_| base.with_availability(*availability)))
                .collect(),
            Scenario::Mixed {
                nodes,
                seeders,
                availability,
            } => {
                if seeders > nodes {
                    return Err(SwarmError::InvalidConfig(format!(
                        "{} seeders requested for {} nodes",
                        seeders, nodes
                    )));
                }
                (0..*nodes)
                    .map(|i| {
                        if i < *seeders {
                            base.with_availability(1.0)
                        } else {
                            base.with_availability(*availability)
                        }
                    })
                    .collect()
            }
            Scenario::Custom(ratios) => ratios
                .iter()
                .map(|&ratio| base.with_availability(ratio))
                .collect(),
        };

        if specs.is_empty() {
            return Err(SwarmError::InvalidConfig(
                "Scenario has no nodes".into(),
            ));
        }
        for spec in &specs {
            spec.validate()?;
        }
        Ok(specs)
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scenario::SingleSeeder {
                leechers,
                availability,
            } => write!(
                f,
                "Single Seeder (1 + {} at {:.0}%)",
                leechers,
                availability * 100.0
            ),
            Scenario::Mixed {
                nodes,
                seeders,
                availability,
            } => write!(
                f,
                "Mixed ({} nodes, {} seeders, {:.0}%)",
                nodes,
                seeders,
                availability * 100.0
            ),
            Scenario::Custom(ratios) => write!(f, "Custom ({} nodes)", ratios.len()),
        }
    }
}
