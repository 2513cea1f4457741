//! Shared fixtures for node integration tests.
//!
//! Nodes run for real: bound on loopback ephemeral ports, spawned onto the
//! test runtime, observed through their snapshot channels. Image fixtures
//! are generated on the fly - a manifest plus minimal true-color TGA files -
//! and scenario names are found by searching the hash space for a file name
//! whose folded id lands where the scenario needs it.

#![allow(dead_code)] // each test binary uses a subset

use std::fs::OpenOptions;
use std::io::Write as _;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use imgring_core::id::name_id;
use imgring_core::store::MANIFEST;
use imgring_node::net::{read_packet, write_packet};
use imgring_node::{BootstrapTarget, DhtNode, NodeConfig, NodeError, NodeHandle, NodeSnapshot};
use imgring_proto::netimg::{Imsg, Iqry};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use zerocopy::{Immutable, IntoBytes};

/// Generous bound for ring convergence and query resolution.
pub const CONVERGE: Duration = Duration::from_secs(10);

/// A node running on the test runtime.
pub struct TestNode {
    /// Control/observation handle.
    pub handle: NodeHandle,
    /// The spawned run loop.
    pub task: JoinHandle<Result<(), NodeError>>,
}

/// Bind and spawn a node with a forced id.
pub async fn spawn_node(
    id: Option<u8>,
    bootstrap: Option<SocketAddrV4>,
    images: &Path,
) -> TestNode {
    let config = NodeConfig {
        bind_ip: Ipv4Addr::LOCALHOST,
        id,
        bootstrap: bootstrap
            .map(|addr| BootstrapTarget { host: addr.ip().to_string(), port: addr.port() }),
        images_dir: images.to_path_buf(),
    };

    let node = DhtNode::bind(config).await.expect("node should bind");
    let handle = node.handle();
    let task = tokio::spawn(node.run());

    TestNode { handle, task }
}

/// Await a snapshot satisfying `pred`, bounded by [`CONVERGE`].
pub async fn converged(
    node: &mut TestNode,
    pred: impl FnMut(&NodeSnapshot) -> bool,
) -> NodeSnapshot {
    timeout(CONVERGE, node.handle.snapshots.wait_for(pred))
        .await
        .expect("timed out waiting for convergence")
        .expect("node terminated early")
        .clone()
}

/// Fresh image directory with an empty manifest.
pub fn empty_image_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join(MANIFEST), "").expect("manifest");
    dir
}

/// Add a `width x height` true-color image to the directory and manifest.
/// Returns the RGB pixel payload a client should receive for it.
pub fn add_image(dir: &Path, name: &str, width: u16, height: u16) -> Vec<u8> {
    let mut manifest =
        OpenOptions::new().create(true).append(true).open(dir.join(MANIFEST)).expect("manifest");
    writeln!(manifest, "{name}").expect("manifest entry");
    write_tga(&dir.join(name), width, height)
}

/// Write an uncompressed 24-bit TGA; returns the expected RGB payload.
pub fn write_tga(path: &Path, width: u16, height: u16) -> Vec<u8> {
    let count = usize::from(width) * usize::from(height);

    let mut file = vec![0u8; 18];
    file[2] = 2; // uncompressed true-color
    file[12..14].copy_from_slice(&width.to_le_bytes());
    file[14..16].copy_from_slice(&height.to_le_bytes());
    file[16] = 24;

    let mut expected = Vec::with_capacity(count * 3);
    for i in 0..count {
        let (b, g, r) = ((i % 251) as u8, (i % 13) as u8, (i % 7) as u8);
        file.extend_from_slice(&[b, g, r]);
        expected.extend_from_slice(&[r, g, b]);
    }

    std::fs::write(path, file).expect("tga file");
    expected
}

/// First name of the form `img-N.tga` whose folded id satisfies `pred`.
/// SHA-1 is fixed, so the search is deterministic.
pub fn name_with_id(pred: impl Fn(u8) -> bool) -> String {
    (0u32..100_000)
        .map(|i| format!("img-{i}.tga"))
        .find(|name| pred(name_id(name)))
        .expect("id space exhausted")
}

/// Run one image query against a node: send IQRY, read the IMSG and any
/// pixel payload.
pub async fn query_image(addr: SocketAddrV4, name: &str) -> (Imsg, Vec<u8>) {
    timeout(CONVERGE, async {
        let mut stream = TcpStream::connect(addr).await.expect("connect image receiver");
        write_packet(&mut stream, &Iqry::new(name).expect("query name")).await.expect("send IQRY");

        let reply: Imsg = read_packet(&mut stream).await.expect("read IMSG");
        reply.validate().expect("valid IMSG");

        let mut pixels = vec![0u8; reply.payload_len()];
        if !pixels.is_empty() {
            stream.read_exact(&mut pixels).await.expect("read pixels");
        }
        (reply, pixels)
    })
    .await
    .expect("query timed out")
}

/// One-shot send of a DHT packet to a node's receiver.
pub async fn send_to<T: IntoBytes + Immutable>(addr: SocketAddrV4, packet: &T) {
    let mut stream = TcpStream::connect(addr).await.expect("connect dht receiver");
    write_packet(&mut stream, packet).await.expect("send packet");
}
