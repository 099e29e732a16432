//! FEC Swarm - Main Application
//!
//! Runs a swarm of peers downloading one FEC-segmented file from each other
//! and reports how long every node took to reconstruct it.

use clap::{value_parser, Arg, ArgAction, Command};
use fec_swarm::segfile::{KB, MB};
use fec_swarm::telemetry::{ChannelSink, TracingSink};
use fec_swarm::{
    Config, FileDescriptor, Result, Scenario, SimulationReport, Simulator, SwarmError, SwarmMonitor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("fec-swarm")
        .version("0.1.0")
        .about("Simulates FEC-coded file distribution across a peer swarm")
        .arg(
            Arg::new("file-size")
                .long("file-size")
                .value_name("MB")
                .help("Size of the shared file in megabytes")
                .value_parser(value_parser!(u64))
                .default_value("12"),
        )
        .arg(
            Arg::new("segment-size")
                .long("segment-size")
                .value_name("CHUNKS")
                .help("Data chunks per segment")
                .value_parser(value_parser!(usize))
                .default_value("10"),
        )
        .arg(
            Arg::new("chunk-size")
                .long("chunk-size")
                .value_name("KB")
                .help("Chunk size in kilobytes")
                .value_parser(value_parser!(u64))
                .default_value("512"),
        )
        .arg(
            Arg::new("nodes")
                .short('n')
                .long("nodes")
                .value_name("COUNT")
                .help("Number of nodes in the swarm")
                .value_parser(value_parser!(usize))
                .default_value("10"),
        )
        .arg(
            Arg::new("seeders")
                .short('s')
                .long("seeders")
                .value_name("COUNT")
                .help("Nodes that start with the whole file")
                .value_parser(value_parser!(usize))
                .default_value("1"),
        )
        .arg(
            Arg::new("availability")
                .short('a')
                .long("availability")
                .value_name("RATIO")
                .help("Share of data chunks every other node starts with")
                .value_parser(value_parser!(f64))
                .default_value("0.5"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for bandwidth ratios")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("speed")
                .long("speed")
                .value_name("FACTOR")
                .help("Simulated seconds per wall-clock second")
                .value_parser(value_parser!(f64))
                .default_value("1.0"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .help("Wall-clock deadline for the whole run")
                .value_parser(value_parser!(u64))
                .default_value("300"),
        )
        .arg(
            Arg::new("events")
                .long("events")
                .help("Print telemetry events as JSON lines")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("monitor")
                .long("monitor")
                .help("Show the terminal monitor while running")
                .action(ArgAction::SetTrue)
                .conflicts_with("events"),
        )
        .get_matches();

    let monitor = matches.get_flag("monitor");
    // Log lines would tear the monitor's alternate screen
    let default_filter = if monitor { "off" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let arg = |name: &str| matches.get_one::<u64>(name).copied().unwrap_or_default();
    let count = |name: &str| matches.get_one::<usize>(name).copied().unwrap_or_default();

    let file = FileDescriptor::new(
        scaled(arg("file-size"), MB, "file size")?,
        count("segment-size"),
        scaled(arg("chunk-size"), KB, "chunk size")?,
    )?;
    let mut config = Config::new(file);
    config.seed = arg("seed");
    config.speed = matches.get_one::<f64>("speed").copied().unwrap_or(1.0);
    config.deadline = Duration::from_secs(arg("timeout"));
    config.validate()?;

    let scenario = Scenario::Mixed {
        nodes: count("nodes"),
        seeders: count("seeders"),
        availability: matches.get_one::<f64>("availability").copied().unwrap_or(0.5),
    };

    if !monitor {
        println!("🚀 FEC Swarm starting...");
        println!(
            "   File: {} MB in {} segments of {} x {} KB chunks",
            file.file_size / MB,
            file.num_segments(),
            file.segment_size,
            file.chunk_size / KB
        );
        println!("   Scenario: {}", scenario);
        println!("   Speed: {:.1}x, deadline {:?}", config.speed, config.deadline);
        println!();
    }

    let report = if monitor {
        run_monitor(config, &scenario).await?
    } else if matches.get_flag("events") {
        run_with_events(config, &scenario).await?
    } else {
        run_headless(config, &scenario).await?
    };

    print_report(&report);
    if !report.all_complete() {
        std::process::exit(2);
    }
    Ok(())
}

/// Convert a CLI size to bytes
fn scaled(value: u64, unit: u64, what: &str) -> Result<u64> {
    value
        .checked_mul(unit)
        .ok_or_else(|| SwarmError::InvalidConfig(format!("{} of {} overflows", what, value)))
}

/// Run with structured logging only
async fn run_headless(config: Config, scenario: &Scenario) -> Result<SimulationReport> {
    let simulator = Simulator::with_telemetry(config, Arc::new(TracingSink))?;
    simulator.populate(scenario)?;
    simulator.run().await
}

/// Run while printing every telemetry event as a JSON line
async fn run_with_events(config: Config, scenario: &Scenario) -> Result<SimulationReport> {
    let (sink, mut events) = ChannelSink::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.to_json() {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("dropping unserializable event: {}", e),
            }
        }
    });

    let simulator = Simulator::with_telemetry(config, Arc::new(sink))?;
    simulator.populate(scenario)?;
    let report = simulator.run().await?;

    // Closing the sink lets the printer drain and stop
    drop(simulator);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    Ok(report)
}

/// Run under the terminal monitor
async fn run_monitor(config: Config, scenario: &Scenario) -> Result<SimulationReport> {
    let (sink, events) = ChannelSink::new();
    let simulator = Simulator::with_telemetry(config, Arc::new(sink))?;
    simulator.populate(scenario)?;

    let report = {
        let mut monitor = SwarmMonitor::new()?;
        monitor.run(simulator, events).await?
    };
    Ok(report)
}

fn print_report(report: &SimulationReport) {
    println!();
    println!("📊 Simulation report");
    for node in &report.nodes {
        let mark = if node.state == fec_swarm::NodeState::Complete {
            "✓"
        } else {
            "✗"
        };
        println!(
            "   {} node {:<3} {:<11} {:>9.2}s simulated",
            mark,
            node.id,
            node.state.to_string(),
            node.sim_time
        );
    }
    println!();
    println!(
        "   Complete: {}/{} nodes",
        report.complete_count(),
        report.nodes.len()
    );
    println!("   Makespan: {:.2}s simulated", report.makespan());
    println!("   Wall time: {:.2?}", report.wall_time);

    if report.timed_out {
        println!("⚠ Deadline reached before every node finished");
    } else if report.all_complete() {
        println!("✅ Every node reconstructed the file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_sizes() {
        assert_eq!(scaled(12, MB, "file size").unwrap(), 12 * MB);
        assert!(matches!(
            scaled(u64::MAX / 2, KB, "chunk size"),
            Err(SwarmError::InvalidConfig(_))
        ));
    }
}
