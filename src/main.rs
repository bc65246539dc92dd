// shard-sync - In-process collation sync network
//
// Wires several sync engines together over in-memory links, lets them
// propose collations and reports how far each collation spread.

use clap::{Parser, Subcommand, ValueEnum};
use shard_sync::collation::{Availability, Collation, MemoryShard, Shard};
use shard_sync::merkle::{calc_chunk_root, zpad_right};
use shard_sync::peer::{PeerId, PeerLink};
use shard_sync::storage::ShardStore;
use shard_sync::sync::{ManualPeriodClock, PeerPoolEvent, SyncConfig, SyncEngine, COLLATION_SIZE};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shard-sync", version, about = "Collation sync sub-protocol playground")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run several nodes in one process and propagate collations between them
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value_t = 3)]
        nodes: usize,

        /// Proposal rounds; every node proposes once per round
        #[arg(short, long, default_value_t = 2)]
        rounds: u64,

        /// How nodes are connected
        #[arg(short, long, value_enum, default_value_t = Topology::Line)]
        topology: Topology,

        /// Shard all nodes serve
        #[arg(long, default_value_t = 0)]
        shard_id: u64,

        /// Collation body size in bytes
        #[arg(long, default_value_t = 4096)]
        collation_size: usize,

        /// Fetch timeout in seconds
        #[arg(long, default_value_t = 10)]
        request_timeout: u64,

        /// Store each node's shard under this directory instead of memory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seconds to wait for collations to spread
        #[arg(long, default_value_t = 5)]
        settle_secs: u64,
    },

    /// Print the chunk root of a text body padded to the collation size
    ChunkRoot {
        /// Body content
        text: String,

        /// Collation body size in bytes
        #[arg(long, default_value_t = COLLATION_SIZE)]
        collation_size: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Topology {
    /// node i connects to node i+1
    Line,
    /// every pair of nodes connects
    Mesh,
}

struct Node {
    name: String,
    peer_id: PeerId,
    engine: SyncEngine,
    clock: Arc<ManualPeriodClock>,
    events: mpsc::Sender<PeerPoolEvent>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            nodes,
            rounds,
            topology,
            shard_id,
            collation_size,
            request_timeout,
            data_dir,
            settle_secs,
        } => {
            let base = SyncConfig::new()
                .with_collation_size(collation_size)
                .with_request_timeout(request_timeout);
            let settings = Simulation {
                nodes,
                rounds,
                topology,
                shard_id,
                data_dir,
                settle: Duration::from_secs(settle_secs),
            };
            simulate(base, settings).await?;
        }
        Commands::ChunkRoot {
            text,
            collation_size,
        } => {
            let body = zpad_right(text.as_bytes(), collation_size);
            let root = calc_chunk_root(&body)?;
            println!("{}", root);
        }
    }

    Ok(())
}

struct Simulation {
    nodes: usize,
    rounds: u64,
    topology: Topology,
    shard_id: u64,
    data_dir: Option<PathBuf>,
    settle: Duration,
}

fn open_shard(settings: &Simulation, name: &str) -> Result<Arc<dyn Shard>, Box<dyn std::error::Error>> {
    match &settings.data_dir {
        Some(dir) => Ok(Arc::new(ShardStore::open(dir.join(name), settings.shard_id)?)),
        None => Ok(Arc::new(MemoryShard::new(settings.shard_id))),
    }
}

fn edges(count: usize, topology: Topology) -> Vec<(usize, usize)> {
    match topology {
        Topology::Line => (1..count).map(|i| (i - 1, i)).collect(),
        Topology::Mesh => (0..count)
            .flat_map(|i| (i + 1..count).map(move |j| (i, j)))
            .collect(),
    }
}

async fn simulate(base: SyncConfig, settings: Simulation) -> Result<(), Box<dyn std::error::Error>> {
    let mut nodes = Vec::with_capacity(settings.nodes);
    for index in 0..settings.nodes {
        let name = format!("node-{}", index);
        let clock = Arc::new(ManualPeriodClock::new(0));
        let config = base.clone().with_node_name(&name);
        let engine = SyncEngine::with_clock(open_shard(&settings, &name)?, config, clock.clone())?;

        let (events, pool) = mpsc::channel(16);
        let runner = engine.clone();
        tokio::spawn(async move { runner.run(pool).await });

        nodes.push(Node {
            name,
            peer_id: PeerId::generate(),
            engine,
            clock,
            events,
        });
    }

    for (a, b) in edges(nodes.len(), settings.topology) {
        let (link_a, link_b) = PeerLink::pair();
        nodes[a]
            .events
            .send(PeerPoolEvent::Joined(nodes[b].peer_id, link_a))
            .await?;
        nodes[b]
            .events
            .send(PeerPoolEvent::Joined(nodes[a].peer_id, link_b))
            .await?;
        info!(from = %nodes[a].name, to = %nodes[b].name, "linked");
    }

    // Let handshakes finish before anything is announced
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut proposed: Vec<Collation> = Vec::new();
    for round in 0..settings.rounds {
        for node in &nodes {
            node.clock.set(round);
            let collation = node.engine.propose()?;
            info!(node = %node.name, hash = %collation.hash(), period = round, "proposed");
            proposed.push(collation);
        }
    }

    let deadline = tokio::time::Instant::now() + settings.settle;
    while tokio::time::Instant::now() < deadline && !fully_spread(&nodes, &proposed) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for node in &nodes {
        let held = available_count(node, &proposed);
        let stats = node.engine.stats();
        println!(
            "{:<8} {}/{} collations  peers={} announced={} served={} imported={}",
            node.name,
            held,
            proposed.len(),
            node.engine.peers().len(),
            stats.announcements_sent,
            stats.requests_served,
            stats.collations_imported,
        );
    }

    if !fully_spread(&nodes, &proposed) {
        warn!("not every collation reached every node");
    }

    for node in &nodes {
        node.engine.stop();
    }
    Ok(())
}

fn available_count(node: &Node, collations: &[Collation]) -> usize {
    collations
        .iter()
        .filter(|c| node.engine.shard().get_availability(c.header()) == Availability::Available)
        .count()
}

fn fully_spread(nodes: &[Node], collations: &[Collation]) -> bool {
    nodes
        .iter()
        .all(|node| available_count(node, collations) == collations.len())
}
