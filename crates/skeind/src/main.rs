//! `skeind`: the skein storage daemon.
//!
//! Runs one host of a skein ring: its vnode stores, the RPC server other
//! hosts talk to over iroh QUIC, the replication engine, and the HTTP
//! front-end.
//!
//! # Usage
//!
//! ```text
//! skeind keygen -d ./node1                    # create the node key, print its id
//! skeind start                                # start with defaults
//! skeind start -c skein.toml                  # start with a config file
//! skeind start -d ./node2 -l 127.0.0.1:4921   # second instance
//! skeind start --peer <endpoint_id>@<ip:port> # list the other hosts of the ring
//! ```
//!
//! Every host must be started with the same peer set (itself excluded) so
//! that all hosts build the same ring.

mod config;
mod http;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iroh::protocol::Router;
use iroh::{Endpoint, EndpointAddr, SecretKey};
use skein_engine::{ConsistentStore, ReplicationEngine};
use skein_net::{ConnPool, NetTransport, QuicDialer, RpcProtocol, RpcServer};
use skein_ring::{Ring, SharedRing};
use skein_store::{FjallStore, LocalStore, MemoryStore};
use skein_txlog::Ed25519Signer;
use skein_types::Vnode;
use tracing::{info, warn};

use config::CliConfig;
use http::HttpServer;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "skeind", version, about = "skein distributed key-value daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node.
    Start {
        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Override the HTTP listen address (e.g. "127.0.0.1:4921").
        #[arg(short = 'l', long)]
        http_listen_addr: Option<String>,

        /// Other host of the ring. Can be specified multiple times.
        ///
        /// Format: `<endpoint_id>` or `<endpoint_id>@<ip:port>`.
        #[arg(short, long)]
        peer: Vec<String>,

        /// Cluster secret; hosts must share it to connect.
        #[arg(long, env = "SKEIN_SECRET")]
        secret: Option<String>,

        /// Keep everything in memory.
        #[arg(short, long)]
        memory: bool,
    },

    /// Create the node key if needed and print the endpoint id.
    Keygen {
        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Start {
            data_dir,
            http_listen_addr,
            peer,
            secret,
            memory,
        } => {
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if let Some(addr) = http_listen_addr {
                config.node.http_listen_addr = addr;
            }
            if !peer.is_empty() {
                config.cluster.peers = peer;
            }
            if let Some(s) = secret {
                config.cluster.secret = s;
            }
            if memory {
                config.store.backend = "memory".to_string();
            }
            cmd_start(config).await
        }
        Commands::Keygen { data_dir } => {
            let dir = data_dir.unwrap_or(config.node.data_dir);
            std::fs::create_dir_all(&dir).context("failed to create data directory")?;
            let key = load_or_create_secret_key(&dir)?;
            println!("{}", key.public());
            Ok(())
        }
    }
}

// -----------------------------------------------------------------------
// skeind start
// -----------------------------------------------------------------------

async fn cmd_start(mut config: CliConfig) -> Result<()> {
    let memory_mode = config.is_memory();
    info!(
        data_dir = %config.node.data_dir.display(),
        http_addr = %config.node.http_listen_addr,
        backend = %config.store.backend,
        vnodes_per_host = config.ring.vnodes_per_host,
        replicas = config.ring.replicas,
        "starting skeind"
    );

    if !memory_mode {
        std::fs::create_dir_all(&config.node.data_dir)
            .context("failed to create data directory")?;
    }

    // --- Identity ---
    let secret_key = if memory_mode {
        info!("generated ephemeral node key (memory mode)");
        SecretKey::from(random_bytes::<32>())
    } else {
        load_or_create_secret_key(&config.node.data_dir)?
    };

    let generated_secret = config.cluster.secret.is_empty();
    if generated_secret {
        config.cluster.secret = hex::encode(random_bytes::<16>());
    }
    let alpn = skein_net::cluster_alpn(config.cluster.secret.as_bytes());
    info!(
        cluster_id = %&blake3::hash(config.cluster.secret.as_bytes()).to_hex()[..16],
        "cluster identity derived from secret"
    );

    // --- Endpoint ---
    let endpoint = Endpoint::builder()
        .secret_key(secret_key.clone())
        .alpns(vec![alpn.clone()])
        .relay_mode(iroh::RelayMode::Default)
        .bind()
        .await
        .context("failed to bind iroh endpoint")?;
    let host = endpoint.id().to_string();
    info!(endpoint_id = %endpoint.id().fmt_short(), "iroh endpoint ready");
    for addr in endpoint.addr().ip_addrs() {
        info!(%addr, "listening on");
    }

    // --- Ring ---
    let peers = parse_peers(&config.cluster.peers);
    let ring = build_ring(&config, &host, &peers);
    info!(
        hosts = ring.host_count(),
        vnodes = ring.vnode_count(),
        "ring built"
    );

    // --- Transport and local vnodes ---
    let dialer = Arc::new(QuicDialer::new(endpoint.clone(), alpn.clone()));
    for peer in &peers {
        dialer.add_peer(peer.clone());
    }
    let transport = Arc::new(NetTransport::new(&host, Arc::new(ConnPool::new(dialer))));
    for vnode in ring.vnodes_for(&host) {
        let store = open_store(&config, &vnode)?;
        info!(vnode = %vnode.short_id(), "serving vnode");
        transport.register(vnode.id, store);
    }

    // --- Engine ---
    let engine = ReplicationEngine::start(config.replication_config(), transport.clone());
    let store = Arc::new(ConsistentStore::new(
        config.store_config(),
        Arc::new(SharedRing::new(ring)),
        transport.clone(),
        Arc::new(Ed25519Signer::from_bytes(&secret_key.to_bytes())),
        engine.clone(),
    ));

    // --- Incoming RPC ---
    let server = Arc::new(RpcServer::new(transport));
    server.set_leader_service(store.clone());
    let router = Router::builder(endpoint.clone())
        .accept(alpn, RpcProtocol::new(server))
        .spawn();

    if generated_secret {
        info!("cluster secret (generated): {}", config.cluster.secret);
    }
    info!(
        "to add this host to a ring: skeind start --secret {} --peer {}",
        config.cluster.secret,
        endpoint.id()
    );

    // --- HTTP front-end ---
    HttpServer::new(store)
        .serve_with_shutdown(&config.node.http_listen_addr, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("shutting down");
    engine.shutdown();
    router.shutdown().await.context("router shutdown failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Parse configured peers, skipping (and logging) malformed entries.
fn parse_peers(peers: &[String]) -> Vec<EndpointAddr> {
    peers
        .iter()
        .filter_map(|p| match skein_net::parse_host(p) {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(peer = %p, %e, "invalid peer, skipping");
                None
            }
        })
        .collect()
}

/// The ring of this host plus its peers. Hosts are named by bare endpoint
/// id so that every host derives the same ring regardless of addresses.
fn build_ring(config: &CliConfig, host: &str, peers: &[EndpointAddr]) -> Ring {
    let mut ring = Ring::new(config.ring.vnodes_per_host, config.ring.replicas);
    ring.add_host(host);
    for peer in peers {
        ring.add_host(&peer.id.to_string());
    }
    ring
}

fn open_store(config: &CliConfig, vnode: &Vnode) -> Result<Arc<dyn LocalStore>> {
    if config.is_memory() {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let path = config
        .node
        .data_dir
        .join("vnodes")
        .join(vnode.id.to_string());
    let store = FjallStore::open(&path)
        .with_context(|| format!("failed to open vnode store at {}", path.display()))?;
    Ok(Arc::new(store))
}

// -----------------------------------------------------------------------
// Key management
// -----------------------------------------------------------------------

fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Load or create a persistent secret key at `data_dir/node.key`.
///
/// The key names the host on the ring and signs its transactions, so it
/// must survive restarts.
fn load_or_create_secret_key(data_dir: &Path) -> Result<SecretKey> {
    let key_path = data_dir.join("node.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("failed to read node.key")?;
        anyhow::ensure!(bytes.len() == 32, "node.key must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        let key = SecretKey::from_bytes(&arr);
        info!(endpoint_id = %key.public().fmt_short(), "loaded existing node key");
        Ok(key)
    } else {
        let key = SecretKey::from(random_bytes::<32>());
        std::fs::write(&key_path, key.to_bytes()).context("failed to write node.key")?;
        info!(
            path = %key_path.display(),
            endpoint_id = %key.public().fmt_short(),
            "generated new node key"
        );
        Ok(key)
    }
}
