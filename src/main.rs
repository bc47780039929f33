//! crash-engine binary
//!
//! Without a subcommand it serves the HTTP/WebSocket API and runs rounds.

use clap::{Parser, Subcommand};
use crash_engine::{
    api::ApiServer,
    config::{ConfigLoader, PriceSourceKind},
    fairness,
    games::types::Multiplier,
    BroadcastHub, CrashEngine, EngineConfig, MemoryStore, PriceOracle, RocksStore, RoundDriver,
    RoundStore,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "crash-engine")]
#[command(about = "Provably fair crash round engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// RocksDB directory
    #[arg(long)]
    db_path: Option<String>,

    /// Keep rounds and wallets in memory only
    #[arg(long)]
    in_memory: bool,

    /// Register the demo players on start-up
    #[arg(long)]
    seed_demo_players: bool,

    /// Use the configured fixed prices instead of the upstream oracle
    #[arg(long)]
    fixed_prices: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a revealed round offline
    Verify {
        #[arg(long)]
        seed: String,
        #[arg(long)]
        round_id: u64,
        /// Published commitment; defaults to the hash of the seed
        #[arg(long)]
        public_hash: Option<String>,
        /// Claimed crash point, e.g. 2.10
        #[arg(long)]
        crash_point: Option<f64>,
    },
    /// Write the effective configuration to a TOML file
    GenerateConfig {
        #[arg(short, long, default_value = "crash-engine.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    apply_cli_overrides(&cli, &mut config);
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.clone().into()),
        )
        .init();

    match cli.command {
        Some(Commands::Verify {
            seed,
            round_id,
            public_hash,
            crash_point,
        }) => run_verify(&seed, round_id, public_hash, crash_point),
        Some(Commands::GenerateConfig { output }) => {
            loader.save(&config, &output)?;
            println!("Configuration written to {}", output);
            Ok(())
        }
        None => serve(config, cli.seed_demo_players).await,
    }
}

fn apply_cli_overrides(cli: &Cli, config: &mut EngineConfig) {
    if let Some(host) = &cli.host {
        config.api.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(path) = &cli.db_path {
        config.storage.data_directory = path.clone();
    }
    if cli.in_memory {
        config.storage.in_memory = true;
    }
    if cli.fixed_prices {
        config.price.source = PriceSourceKind::Fixed;
    }
}

async fn serve(config: EngineConfig, seed_demo_players: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn RoundStore> = if config.storage.in_memory {
        warn!("Running with in-memory storage; nothing survives a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(RocksStore::open(&config.storage.data_directory)?)
    };

    let oracle = PriceOracle::from_config(&config);
    let hub = BroadcastHub::new(config.api.event_buffer);

    info!(
        store = store.name(),
        prices = oracle.source_name(),
        data_dir = %config.storage.data_directory,
        "Starting crash engine"
    );

    let engine = CrashEngine::new(config.clone(), store, oracle, Arc::new(hub.clone()));
    let restored = engine.restore().await?;
    info!(players = restored, "Wallets restored");

    if seed_demo_players {
        let players = engine.seed_demo_players().await;
        info!(count = players.len(), "Demo players ready");
    }

    let driver = RoundDriver::spawn(engine.clone());

    let result = ApiServer::new(config.api.clone(), engine, hub).run().await;

    driver.stop();
    driver.join().await;
    result
}

fn run_verify(
    seed: &str,
    round_id: u64,
    public_hash: Option<String>,
    crash_point: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let public_hash = public_hash.unwrap_or_else(|| fairness::commit(seed));
    let claimed = match crash_point {
        Some(value) => serde_json::from_value::<Multiplier>(serde_json::json!(value))?,
        None => fairness::reveal(seed, round_id)?,
    };

    let verification = fairness::verify(seed, round_id, &public_hash, claimed)?;
    println!("{}", serde_json::to_string_pretty(&verification)?);

    if verification.is_valid() {
        println!("Round {} verified: crash point {}", round_id, verification.computed_crash_point);
        Ok(())
    } else {
        Err(format!("Round {} failed verification", round_id).into())
    }
}
