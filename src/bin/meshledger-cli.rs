//! Operator CLI. Unlike the source tree's `time-cli`, which spoke JSON-RPC to
//! a running daemon, this CLI operates in-process: it opens the node's own
//! store and identity directly and performs one operation per invocation.
//! There is no RPC surface in this crate to talk to instead.

use clap::{Parser, Subcommand};
use meshledger::config::Config;
use meshledger::identity::NodeIdentity;
use meshledger::ledger::store::LedgerStore;
use meshledger::node::Node;

#[derive(Parser, Debug)]
#[command(name = "meshledger-cli")]
#[command(about = "Inspect and operate a mesh ledger node's local state", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(long, env = "MESHLEDGER_IDENTITY_PASSWORD", default_value = "")]
    identity_password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate (or reuse) this node's identity keypair and print its id.
    Identity,

    /// Print the node's id, known senders, mempool size, and peer count.
    Status,

    /// List pending mempool entries, highest fee first.
    Mempool,

    /// List known peers.
    Peers,

    /// Build, sign, and commit a local transfer, then queue it for gossip.
    Send {
        #[arg(long)]
        receiver: String,
        #[arg(long)]
        amount: i64,
        #[arg(long, default_value_t = 1)]
        fee: i64,
        /// Hex-encoded input UTXO hash, if spending an existing one.
        #[arg(long)]
        input_utxo: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load_or_create(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let identity_path = std::path::Path::new(&config.storage.data_dir).join(&config.node.identity_path);

    if matches!(args.command, Commands::Identity) {
        match NodeIdentity::load_or_create(&identity_path, &args.identity_password) {
            Ok(identity) => println!("{}", identity.node_id()),
            Err(e) => {
                eprintln!("failed to load or create identity: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let identity = match NodeIdentity::load_or_create(&identity_path, &args.identity_password) {
        Ok(identity) => identity,
        Err(e) => {
            eprintln!("failed to load identity: {e}");
            std::process::exit(1);
        }
    };

    let node_id = identity.node_id();
    let node = match Node::new(config, identity) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("failed to initialize node: {e}");
            std::process::exit(1);
        }
    };

    match args.command {
        Commands::Identity => unreachable!("handled above"),
        Commands::Status => {
            let watermarks = node.ledger.mempool().len().await.unwrap_or(0);
            let peers = node.peer_table.active_peers(usize::MAX).await.unwrap_or_default();
            println!("node_id: {node_id}");
            println!("mempool_size: {watermarks}");
            println!("known_peers: {}", peers.len());
        }
        Commands::Mempool => match node.store.mempool_list_ordered().await {
            Ok(entries) => {
                for entry in entries {
                    println!(
                        "{} fee={} seq={} sender={}",
                        entry.entry.entry_id, entry.fee, entry.entry.sequence_number, entry.entry.sender_id
                    );
                }
            }
            Err(e) => {
                eprintln!("failed to read mempool: {e}");
                std::process::exit(1);
            }
        },
        Commands::Peers => match node.peer_table.active_peers(usize::MAX).await {
            Ok(peers) => {
                for peer in peers {
                    println!("{} last_seen={} failures={}", peer.peer_id, peer.last_seen, peer.failure_count);
                }
            }
            Err(e) => {
                eprintln!("failed to read peer table: {e}");
                std::process::exit(1);
            }
        },
        Commands::Send {
            receiver,
            amount,
            fee,
            input_utxo,
        } => {
            let input_hash = match input_utxo {
                Some(hex_str) => match hex::decode(&hex_str) {
                    Ok(bytes) if bytes.len() == 32 => {
                        let mut hash = [0u8; 32];
                        hash.copy_from_slice(&bytes);
                        Some(hash)
                    }
                    _ => {
                        eprintln!("--input-utxo must be a 32-byte hex string");
                        std::process::exit(1);
                    }
                },
                None => None,
            };

            match node.submit_transfer(&node_id, &receiver, amount, fee, input_hash).await {
                Ok(entry) => println!("submitted entry {} (seq {})", entry.entry_id, entry.sequence_number),
                Err(e) => {
                    eprintln!("failed to submit transfer: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
