//! LEACH Node - host runner
//!
//! CLI for running LEACH sensor nodes away from hardware:
//! - `simulate` - Boot a fleet of simulated nodes for a number of rounds
//! - `state` - Show the round file in a directory
//! - `reset` - Force the round file back to the start of an epoch

use clap::{Parser, Subcommand};
use leach_core::hal::RngSource;
use leach_core::sim::{Fleet, FleetError, FleetRound, SimMedium};
use leach_core::{FileStore, NodeConfig, RoundStore};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "leach-node")]
#[command(about = "Host runner for LEACH sensor nodes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Node configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a fleet of simulated nodes on a shared medium
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u16).range(1..))]
        nodes: u16,

        /// Number of rounds
        #[arg(short, long, default_value = "14")]
        rounds: usize,

        /// Seed for the nodes' random draws
        #[arg(short, long, default_value = "1")]
        seed: u64,

        /// Path to write per-round reports as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the persisted round state
    State {
        /// Directory holding the round file
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Reset the persisted round state to round 0, eligible
    Reset {
        /// Directory holding the round file
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NodeConfig::from_json_file(path)?,
        None => NodeConfig::default(),
    };
    config.validate()?;

    let filter = if cli.verbose || config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate {
            nodes,
            rounds,
            seed,
            output,
        } => {
            info!(
                "Simulating {} nodes for {} rounds (epoch {}, seed {})",
                nodes, rounds, config.epoch_length, seed
            );

            // Virtual time: collection windows and sleeps complete instantly
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()?;
            let results = runtime.block_on(simulate(&config, nodes, rounds, seed))?;

            print_summary(&results);

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&results)?)?;
                info!("Reports written to: {}", path.display());
            }
        }

        Commands::State { dir } => {
            let mut store = RoundStore::new(FileStore::new(&dir), config.epoch_length);
            match store.load() {
                Ok(state) => println!("{}", state),
                Err(e) => {
                    warn!("No usable round state in {}: {}", dir.display(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Reset { dir } => {
            let mut store = RoundStore::new(FileStore::new(&dir), config.epoch_length);
            store.reset()?;
            info!("Round state in {} reset", dir.display());
        }
    }

    Ok(())
}

async fn simulate(
    config: &NodeConfig,
    nodes: u16,
    rounds: usize,
    seed: u64,
) -> Result<Vec<FleetRound>, FleetError> {
    let medium = SimMedium::new();
    medium.add_base_station(&config.base_station_name, &config.network_secret);

    let sources = (0..u64::from(nodes))
        .map(|i| RngSource::seeded(seed.wrapping_add(i)))
        .collect();
    let mut fleet = Fleet::new(medium, config, sources)?;

    let mut results = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        let round = fleet.run_round().await;
        info!(
            "Round {}: heads {:?}, {} uplinks",
            round.index,
            round.heads(),
            round.uplinks.len()
        );
        results.push(round);
    }
    Ok(results)
}

fn print_summary(results: &[FleetRound]) {
    println!("\nSimulation Results:");
    for round in results {
        let delivered = round
            .reports
            .iter()
            .filter(|r| r.outcome.delivered())
            .count();
        println!(
            "  Round {:>3}: {} heads, {}/{} delivered, {} uplinks",
            round.index,
            round.heads().len(),
            delivered,
            round.reports.len(),
            round.uplinks.len()
        );
    }
}
