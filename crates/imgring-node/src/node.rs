//! Node orchestrator.
//!
//! A [`DhtNode`] owns everything: the two receivers, the finger table, the
//! image store, and the (at most one) retained image-client connection. It
//! binds with [`DhtNode::bind`], hands out observation/control handles with
//! [`DhtNode::handle`], and then [`DhtNode::run`] is the whole node: emit the
//! bootstrap JOIN if a peer was configured, then loop on the multiplexer,
//! dispatching each ready event to the ring or lookup engine.
//!
//! Handlers run to completion before the next event is polled. The only
//! nested waits are the deliberate at-location sub-exchanges inside the
//! forwarding paths.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;

use imgring_core::{FingerTable, ImageStore, Peer, RingSnapshot, id};
use imgring_proto::{DEFAULT_TTL, DhtMsg, MsgKind, NodeDescr};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::error::NodeError;
use crate::mux::{Command, Event, EventMux, local_v4};
use crate::net;

/// Bootstrap peer named on the command line as `fqdn:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapTarget {
    /// Host name or address of an existing ring member.
    pub host: String,
    /// DHT receiver port of that member.
    pub port: u16,
}

impl std::fmt::Display for BootstrapTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BootstrapTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| format!("expected fqdn:port, got '{s}'"))?;
        if host.is_empty() {
            return Err(format!("expected fqdn:port, got '{s}'"));
        }
        let port = port.parse::<u16>().map_err(|err| format!("bad port in '{s}': {err}"))?;
        Ok(Self { host: host.to_owned(), port })
    }
}

/// Node configuration, assembled from the command line (or a test).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address both receivers bind on (ephemeral ports).
    pub bind_ip: Ipv4Addr,
    /// Identifier override for tests; derivation is used when absent, and
    /// again after any REID.
    pub id: Option<u8>,
    /// Existing ring member to join through; `None` starts a new ring.
    pub bootstrap: Option<BootstrapTarget>,
    /// Directory holding `FILELIST.txt` and the image files.
    pub images_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_ip: Ipv4Addr::LOCALHOST,
            id: None,
            bootstrap: None,
            images_dir: PathBuf::from("images"),
        }
    }
}

/// Observable node state, published after every handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Ring state: own id, predecessor, successor, finger coverage.
    pub ring: RingSnapshot,
    /// Whether an image query is outstanding.
    pub busy: bool,
    /// Records currently admitted to the image store.
    pub images: usize,
}

/// Control and observation handle to a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    /// Snapshot feed; use `wait_for` to await convergence.
    pub snapshots: watch::Receiver<NodeSnapshot>,
    dht_addr: SocketAddrV4,
    image_addr: SocketAddrV4,
}

impl NodeHandle {
    /// Ask the node to shut down cleanly.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Ask the node to log its ring neighborhood.
    pub async fn report(&self) {
        let _ = self.commands.send(Command::Report).await;
    }

    /// DHT receiver address at bind time (a REID moves it).
    #[must_use]
    pub fn dht_addr(&self) -> SocketAddrV4 {
        self.dht_addr
    }

    /// Image receiver address.
    #[must_use]
    pub fn image_addr(&self) -> SocketAddrV4 {
        self.image_addr
    }
}

/// One DHT node: ring participant and image proxy.
pub struct DhtNode {
    pub(crate) table: FingerTable,
    pub(crate) store: ImageStore,
    pub(crate) mux: EventMux,
    /// Retained connection to the image client being serviced; `Some` is the
    /// Busy state of the query machine.
    pub(crate) client: Option<TcpStream>,
    pub(crate) bootstrap: Option<BootstrapTarget>,
    pub(crate) bind_ip: Ipv4Addr,
    snapshots: watch::Sender<NodeSnapshot>,
    handle: NodeHandle,
}

impl DhtNode {
    /// Bind both receivers, derive the identifier, and build the
    /// self-pointing ring state.
    pub async fn bind(config: NodeConfig) -> Result<Self, NodeError> {
        let dht = TcpListener::bind((config.bind_ip, 0))
            .await
            .map_err(|source| NodeError::Bind { source })?;
        let image = TcpListener::bind((config.bind_ip, 0))
            .await
            .map_err(|source| NodeError::Bind { source })?;

        let dht_addr = local_v4(&dht)?;
        let image_addr = local_v4(&image)?;

        let own_id = config.id.unwrap_or_else(|| id::node_id(dht_addr));
        let table = FingerTable::new(Peer::new(own_id, dht_addr));
        let store = ImageStore::open(&config.images_dir, own_id);

        tracing::info!(id = own_id, dht = %dht_addr, image = %image_addr, "node up");

        let (commands_tx, commands_rx) = mpsc::channel(16);
        let mux = EventMux::new(dht, image, commands_rx);

        let initial = NodeSnapshot { ring: table.snapshot(), busy: false, images: store.len() };
        let (snapshots, snapshots_rx) = watch::channel(initial);

        let handle =
            NodeHandle { commands: commands_tx, snapshots: snapshots_rx, dht_addr, image_addr };

        Ok(Self {
            table,
            store,
            mux,
            client: None,
            bootstrap: config.bootstrap,
            bind_ip: config.bind_ip,
            snapshots,
            handle,
        })
    }

    /// A control/observation handle. Clonable; any number may exist.
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Current DHT receiver address.
    pub fn dht_addr(&self) -> Result<SocketAddrV4, NodeError> {
        self.mux.dht_addr()
    }

    /// Image receiver address.
    pub fn image_addr(&self) -> Result<SocketAddrV4, NodeError> {
        self.mux.image_addr()
    }

    /// Run the node until the operator quits or a fatal protocol error.
    pub async fn run(mut self) -> Result<(), NodeError> {
        if let Some(target) = self.bootstrap.clone() {
            self.send_join(&target).await?;
        }
        self.publish();

        loop {
            let event = self.mux.next().await?;
            match event {
                Event::Command(Command::Shutdown) => {
                    tracing::info!("shutting down");
                    break;
                },
                Event::Command(Command::Report) => self.report(),
                Event::Dht(stream, peer) => {
                    tracing::debug!(%peer, "dht connection accepted");
                    self.handle_dht_conn(stream).await?;
                },
                Event::Image(stream, peer) => {
                    tracing::debug!(%peer, "image connection accepted");
                    self.handle_image_conn(stream).await?;
                },
            }
            self.publish();
        }

        Ok(())
    }

    /// Our descriptor as it goes on the wire.
    pub(crate) fn self_descr(&self) -> NodeDescr {
        self.table.own().into()
    }

    /// Replace the predecessor and reload the store to the new purview.
    pub(crate) fn set_predecessor_and_reload(&mut self, peer: Peer) {
        self.table.set_predecessor(peer);
        let records = self.store.load(self.table.predecessor().id, self.table.id());
        tracing::info!(records, "image store reloaded");
    }

    /// Emit the one-shot bootstrap JOIN; does not wait for a response.
    pub(crate) async fn send_join(&self, target: &BootstrapTarget) -> Result<(), NodeError> {
        let addr = resolve_v4(target).await?;
        let join = DhtMsg::new(MsgKind::Join, false, DEFAULT_TTL, self.self_descr());

        tracing::info!(%target, %addr, ttl = DEFAULT_TTL, "sending JOIN");

        let mut conn = TcpStream::connect(addr).await.map_err(|source| NodeError::Bootstrap {
            target: target.to_string(),
            reason: source.to_string(),
        })?;
        net::write_packet(&mut conn, &join).await.map_err(|source| NodeError::Bootstrap {
            target: target.to_string(),
            reason: source.to_string(),
        })?;

        Ok(())
    }

    fn report(&self) {
        let snapshot = self.table.snapshot();
        let own = self.table.id();
        tracing::info!(
            predecessor = snapshot.predecessor.id,
            predecessor_is_self = snapshot.predecessor.id == own,
            successor = snapshot.successor.id,
            successor_is_self = snapshot.successor.id == own,
            "adjacent nodes"
        );
        for slot in 0..imgring_core::FINGER_COUNT {
            let finger = self.table.finger(slot);
            tracing::info!(
                slot,
                finger_id = finger.finger_id(),
                node = %finger.peer(),
                "finger"
            );
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(NodeSnapshot {
            ring: self.table.snapshot(),
            busy: self.client.is_some(),
            images: self.store.len(),
        });
    }
}

/// Resolve a bootstrap target to an IPv4 socket address.
async fn resolve_v4(target: &BootstrapTarget) -> Result<SocketAddrV4, NodeError> {
    let addrs = tokio::net::lookup_host((target.host.as_str(), target.port)).await.map_err(
        |source| NodeError::Bootstrap { target: target.to_string(), reason: source.to_string() },
    )?;

    for addr in addrs {
        if let std::net::SocketAddr::V4(v4) = addr {
            return Ok(v4);
        }
    }

    Err(NodeError::Bootstrap {
        target: target.to_string(),
        reason: "no IPv4 address found".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_target_parses() {
        let target: BootstrapTarget = "ring.example.edu:8912".parse().unwrap();
        assert_eq!(target.host, "ring.example.edu");
        assert_eq!(target.port, 8912);
    }

    #[test]
    fn bootstrap_target_rejects_garbage() {
        assert!("no-port".parse::<BootstrapTarget>().is_err());
        assert!(":8912".parse::<BootstrapTarget>().is_err());
        assert!("host:not-a-port".parse::<BootstrapTarget>().is_err());
    }

    #[tokio::test]
    async fn bind_derives_identity_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            id: Some(100),
            images_dir: dir.path().to_path_buf(),
            ..NodeConfig::default()
        };

        let node = DhtNode::bind(config).await.unwrap();
        let handle = node.handle();

        let snapshot = handle.snapshots.borrow().clone();
        assert_eq!(snapshot.ring.id, 100);
        assert_eq!(snapshot.ring.predecessor.id, 100, "lone node points home");
        assert_eq!(snapshot.ring.successor.id, 100);
        assert!(!snapshot.busy);
        assert_eq!(node.dht_addr().unwrap(), handle.dht_addr());
    }
}
