//! shardsim: run a sharded chain simulation in one process

use anyhow::Context;
use chain_cli::{Simulation, SimulationSettings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shardsim")]
#[command(version, about = "Sharded chain simulator with PBFT committees", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a simulation and print its outcome as JSON
    Run {
        /// TOML settings file
        #[arg(short, long, env = "SHARDSIM_CONFIG")]
        config: Option<PathBuf>,

        /// Override the workload seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the number of shards
        #[arg(short, long)]
        shards: Option<u32>,

        /// Override the number of clients
        #[arg(long)]
        clients: Option<u32>,
    },
    /// Print the default settings as TOML
    DefaultConfig {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run {
            config,
            seed,
            shards,
            clients,
        } => {
            let mut settings = SimulationSettings::load(config.as_deref())
                .context("Failed to load simulation settings")?;
            if let Some(seed) = seed {
                settings.seed = seed;
            }
            if let Some(shards) = shards {
                settings.shard_count = shards;
            }
            if let Some(clients) = clients {
                settings.client_count = clients;
            }

            info!(
                shards = settings.shard_count,
                clients = settings.client_count,
                txs_per_client = settings.txs_per_client,
                seed = settings.seed,
                "Starting simulation"
            );
            let simulation = Simulation::start(settings).context("Failed to start simulation")?;
            let outcome = simulation.run_to_completion().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            if !outcome.finished {
                anyhow::bail!("simulation hit its deadline before every transfer settled");
            }
        }
        Command::DefaultConfig { output } => {
            let rendered = SimulationSettings::default().to_toml()?;
            match output {
                Some(path) => std::fs::write(&path, rendered)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => print!("{}", rendered),
            }
        }
    }
    Ok(())
}
