use anyhow::Context;
use blockworld_common::{ChunkPos, SimConfig, WorldPersistence};
use blockworld_ecs::types::ids;
use blockworld_ecs::{Clock, ManualClock};
use blockworld_kernel::WorldStore;
use blockworld_persist::{FileStore, MemoryStore};
use blockworld_sim::{AutoSaver, EntitySimulation, save_state};
use clap::{Parser, Subcommand};
use glam::DVec3;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Seconds of simulated time per tick (20 ticks per second).
const TICK_SECS: f64 = 0.05;

#[derive(Parser)]
#[command(name = "blockworld-cli", about = "Inspect, pre-generate and simulate blockworld worlds")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with simulation settings; missing keys use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Save directory. Without it the world lives in memory only
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// World name, overriding the config file
    #[arg(short, long)]
    world: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, effective settings and the stored world record
    Info,
    /// Generate and save every chunk within a radius of a chunk
    Pregenerate {
        /// Radius in chunks
        #[arg(short, long, default_value = "4")]
        radius: u32,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        x: i32,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        z: i32,
    },
    /// Run the tick loop with synthetic players and mobs
    Simulate {
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "200")]
        ticks: u64,
        #[arg(short, long, default_value = "2")]
        players: usize,
        #[arg(short, long, default_value = "50")]
        mobs: usize,
    },
    /// Check every stored file against the integrity manifest
    Verify,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(world) = cli.world {
        config.world_name = world;
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Info => {
            let store = open_store(cli.data.as_deref())?;
            println!("blockworld-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("config: {}", serde_json::to_string_pretty(&config)?);
            println!("chunk capacity: {}", config.chunk_capacity());
            match store.load_world(&config.world_name)? {
                Some(record) => println!(
                    "world '{}': seed={} type={} spawn={:?}",
                    record.name, record.seed, record.world_type, record.spawn
                ),
                None => println!("world '{}' has not been created yet", config.world_name),
            }
        }
        Commands::Pregenerate { radius, x, z } => {
            let store = open_store(cli.data.as_deref())?;
            // Size the store to the whole square so nothing is evicted mid-run.
            let sized = SimConfig {
                view_distance: radius.max(1),
                ..config.clone()
            };
            let mut world = WorldStore::open(&sized, store);

            let start = Instant::now();
            tracing::info!(x, z, radius, "pregenerating");
            let resident = world.pregenerate(ChunkPos::new(x, z), radius);
            let saved = world.save_all();
            let stats = world.stats();
            println!(
                "pregenerated {resident} chunks around ({x}, {z}) in {:.2?}: generated={} loaded={} saved={saved}",
                start.elapsed(),
                stats.generated,
                stats.loaded
            );
        }
        Commands::Simulate { ticks, players, mobs } => {
            let store = open_store(cli.data.as_deref())?;
            simulate(&config, store, ticks, players, mobs)?;
        }
        Commands::Verify => {
            let dir = cli.data.context("verify needs --data")?;
            let store = FileStore::open(&dir)?;
            store.verify_integrity()?;
            println!("integrity OK: {}", dir.display());
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SimConfig> {
    let Some(path) = path else {
        return Ok(SimConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn open_store(data: Option<&Path>) -> anyhow::Result<Arc<dyn WorldPersistence>> {
    Ok(match data {
        Some(dir) => Arc::new(FileStore::open(dir).with_context(|| format!("opening {}", dir.display()))?),
        None => Arc::new(MemoryStore::new()),
    })
}

fn simulate(
    config: &SimConfig,
    store: Arc<dyn WorldPersistence>,
    ticks: u64,
    players: usize,
    mobs: usize,
) -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::new(0.0));
    let mut world = WorldStore::open(config, store.clone());
    let mut sim = EntitySimulation::new(config, clock.clone());
    let mut saver = AutoSaver::new(config.auto_save_interval_secs, clock.now());

    let spawn = world.world().spawn;
    let origin = DVec3::new(f64::from(spawn.x) + 0.5, f64::from(spawn.y) + 40.0, f64::from(spawn.z) + 0.5);
    let spawn_chunk = ChunkPos::from_block(spawn.x, spawn.z);
    sim.load_chunk_entities(spawn_chunk, &config.world_name, store.as_ref());

    for i in 0..players {
        let name = format!("player{i}");
        let fallback = origin + DVec3::new(i as f64 * 24.0, 0.0, 0.0);
        sim.join_player(&name, Uuid::new_v4(), fallback, store.as_ref())?;
    }

    let kinds = [ids::ZOMBIE, ids::SKELETON, ids::PIG, ids::COW, ids::SHEEP, ids::ITEM];
    let mut spawned = 0;
    for i in 0..mobs {
        let offset = DVec3::new((i % 16) as f64 * 2.0, 0.0, (i / 16) as f64 * 2.0);
        match sim.spawn_entity(kinds[i % kinds.len()], origin + offset, None) {
            Ok(_) => spawned += 1,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, spawned, "stopping spawns early");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    println!("simulating {ticks} ticks: players={players} entities={spawned}");

    let start = Instant::now();
    for tick in 0..ticks {
        let report = sim.update(tick, &mut world);
        if !report.removed.is_empty() {
            tracing::debug!(tick, removed = report.removed.len(), "entities removed");
        }
        clock.advance(TICK_SECS);
        saver.check(clock.now(), &mut world, &mut sim, store.as_ref());
    }
    let elapsed = start.elapsed();

    let player_ids: Vec<_> = sim.players().map(|p| p.id).collect();
    for id in player_ids {
        sim.leave_player(id, store.as_ref())?;
    }
    let report = save_state(&mut world, &mut sim, store.as_ref());

    let stats = sim.stats(&world);
    let world_stats = world.stats();
    println!(
        "done in {elapsed:.2?}: avg tick {:.2?}, max tick {:.2?}",
        stats.avg_tick, stats.max_tick
    );
    println!(
        "entities: loaded={} active={}",
        stats.entities_loaded, stats.active_entities
    );
    println!(
        "chunks: resident={}/{} generated={} loaded={} evicted={} saved={}",
        stats.chunks_resident,
        stats.chunk_capacity,
        world_stats.generated,
        world_stats.loaded,
        world_stats.evicted,
        world_stats.saved
    );
    println!(
        "final save: chunks={} entities={} deleted={} failures={}",
        report.chunks_saved,
        report.entities_saved,
        report.entities_deleted,
        report.failures()
    );
    Ok(())
}
