//! imgring node binary.
//!
//! # Usage
//!
//! ```bash
//! # Start a new ring
//! imgring-node --images ./images
//!
//! # Join an existing ring through a known member
//! imgring-node -p ring.example.edu:8912
//!
//! # Force an identifier (tests)
//! imgring-node -I 100
//! ```
//!
//! The node is controlled from stdin: `p` reports the ring neighborhood,
//! `q` (or EOF) shuts down cleanly.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use imgring_node::{BootstrapTarget, DhtNode, NodeConfig, NodeHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chord-style image-cache DHT node
#[derive(Parser, Debug)]
#[command(name = "imgring-node")]
#[command(about = "Chord-style image-cache DHT node")]
#[command(version)]
struct Args {
    /// Bootstrap peer as fqdn:port; omit to start a new ring
    #[arg(short = 'p', long = "peer")]
    peer: Option<BootstrapTarget>,

    /// Override the derived identifier (0-255, for tests)
    #[arg(short = 'I', long = "id")]
    id: Option<u8>,

    /// Address to bind both receivers on
    #[arg(long, default_value = "127.0.0.1")]
    bind: Ipv4Addr,

    /// Image directory holding FILELIST.txt and the image files
    #[arg(long, default_value = "images")]
    images: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = NodeConfig {
        bind_ip: args.bind,
        id: args.id,
        bootstrap: args.peer,
        images_dir: args.images,
    };

    let node = DhtNode::bind(config).await?;
    let handle = node.handle();

    tracing::info!("DHT receiver on {}", handle.dht_addr());
    tracing::info!("Image receiver on {}", handle.image_addr());

    tokio::spawn(operator_loop(handle));

    node.run().await?;
    Ok(())
}

/// Translate stdin lines into node commands. EOF quits like `q`.
async fn operator_loop(handle: NodeHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    report_instructions();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match line.trim() {
                "q" | "Q" => {
                    handle.shutdown().await;
                    break;
                },
                "p" => handle.report().await,
                "" => {},
                _ => report_instructions(),
            },
            Ok(None) | Err(_) => {
                handle.shutdown().await;
                break;
            },
        }
    }
}

fn report_instructions() {
    tracing::info!("commands: 'p' report predecessor/successor, 'q' or EOF quit");
}
