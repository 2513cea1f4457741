//! Terminal image-query client.
//!
//! Sends one IQRY to a node's image receiver and reports the outcome. On
//! FOUND, the raw pixel payload is written to a file for inspection (there
//! is no built-in viewer).
//!
//! ```bash
//! imgring-get --server 127.0.0.1:41373 vinci.tga -o vinci.pix
//! ```

use std::path::PathBuf;

use clap::Parser;
use imgring_node::net::{read_packet, write_packet};
use imgring_proto::netimg::{Imsg, Iqry, found};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Query one image from an imgring node
#[derive(Parser, Debug)]
#[command(name = "imgring-get")]
#[command(about = "Query one image from an imgring node")]
#[command(version)]
struct Args {
    /// Image receiver address of the node to query (host:port)
    #[arg(short, long)]
    server: String,

    /// Image file name to search for
    name: String,

    /// Where to write the raw pixel payload (default: <name>.pix)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut stream = TcpStream::connect(&args.server).await?;
    tracing::info!(server = %args.server, name = %args.name, "sending IQRY");

    let query = Iqry::new(&args.name)?;
    write_packet(&mut stream, &query).await?;

    let reply: Imsg = read_packet(&mut stream).await?;
    reply.validate()?;

    match reply.im_found() {
        found::FOUND => {
            tracing::info!(
                width = reply.width(),
                height = reply.height(),
                depth = reply.depth(),
                format = reply.format(),
                "image found, receiving pixels"
            );

            let mut pixels = vec![0u8; reply.payload_len()];
            stream.read_exact(&mut pixels).await?;

            let output = args.output.unwrap_or_else(|| PathBuf::from(format!("{}.pix", args.name)));
            std::fs::write(&output, &pixels)?;
            tracing::info!(bytes = pixels.len(), path = %output.display(), "pixels written");
            Ok(())
        },
        found::NFOUND => {
            tracing::warn!("image not found in the ring");
            Err("image not found".into())
        },
        found::BUSY => {
            tracing::warn!("node is busy with another query, retry later");
            Err("node busy".into())
        },
        other => Err(format!("unknown reply outcome {other:#04x}").into()),
    }
}
