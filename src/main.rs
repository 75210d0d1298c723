use std::sync::Arc;

use clap::Parser;
use meshledger::config::Config;
use meshledger::identity::NodeIdentity;
use meshledger::logging::setup_logging;
use meshledger::node::Node;
use meshledger::shutdown::ShutdownManager;

#[derive(Parser, Debug)]
#[command(name = "meshledgerd")]
#[command(about = "Decentralized mesh ledger node daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Password protecting the node's identity keypair. Prompted for
    /// interactively in a future revision; read from the environment for now.
    #[arg(long, env = "MESHLEDGER_IDENTITY_PASSWORD", default_value = "")]
    identity_password: String,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Ok(hostname) = hostname::get() {
        if let Ok(hostname_str) = hostname.into_string() {
            let short_name = hostname_str.split('.').next().unwrap_or(&hostname_str);
            eprintln!("\n╔═══════════════════════════════════════════╗");
            eprintln!("║  NODE: {:<37} ║", short_name);
            eprintln!("╚═══════════════════════════════════════════╝\n");
        }
    }

    if args.generate_config {
        let config = Config::default();
        match config.save_to_file(&args.config) {
            Ok(_) => {
                println!("Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let config = match Config::load_or_create(&args.config) {
        Ok(cfg) => {
            println!("Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let _logging_guard = setup_logging(&config.logging, args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    tracing::info!(version, git_hash, "starting meshledgerd");
    tracing::info!(data_dir = %config.storage.data_dir, backend = %config.storage.backend, "storage configured");

    let identity_path = std::path::Path::new(&config.storage.data_dir).join(&config.node.identity_path);
    let identity = match NodeIdentity::load_or_create(&identity_path, &args.identity_password) {
        Ok(identity) => {
            tracing::info!(node_id = %identity.node_id(), "identity loaded");
            identity
        }
        Err(e) => {
            eprintln!("Failed to load node identity: {}", e);
            std::process::exit(1);
        }
    };

    let node = match Node::new(config, identity) {
        Ok(node) => Arc::new(node),
        Err(e) => {
            eprintln!("Failed to initialize node: {}", e);
            std::process::exit(1);
        }
    };

    let mut shutdown_manager = ShutdownManager::new();
    let shutdown_token = shutdown_manager.token();
    node.spawn_tasks(shutdown_token, |handle| shutdown_manager.register_task(handle));

    tracing::info!("node running, awaiting shutdown signal");
    shutdown_manager.wait_for_shutdown().await;
}
