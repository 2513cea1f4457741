//! Ring membership engine: JOIN, WLCM, REID, REDRT.
//!
//! All DHT connections are one-shot: read (or write) one message, close.
//! The single exception is the outbound half of an at-location forward,
//! which stays open to await either a REDRT packet or the peer's close -
//! close meaning the forwarded message was accepted onward.
//!
//! TTL discipline: the forwarder decrements. A received message about to be
//! forwarded has its TTL decremented first and is silently dropped when the
//! result reaches zero; REDRT-driven retries re-enter the same decrement, so
//! redirect loops are bounded by the same budget.

use imgring_core::Peer;
use imgring_proto::{DhtMsg, ImgDescr, MsgKind, NodeDescr, WlcmMsg};
use tokio::net::{TcpListener, TcpStream};

use crate::error::NodeError;
use crate::net::{self, NetError};
use crate::node::DhtNode;

impl DhtNode {
    /// Read one DHT message and dispatch on its type byte.
    ///
    /// Transport failures on the incoming connection tear down that
    /// connection only; version and type violations are fatal.
    pub(crate) async fn handle_dht_conn(&mut self, mut stream: TcpStream) -> Result<(), NodeError> {
        let msg: DhtMsg = match net::read_packet(&mut stream).await {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(%err, "dropping unreadable dht connection");
                return Ok(());
            },
        };

        let (kind, atloc) = msg.kind()?;
        tracing::debug!(kind = kind.name(), atloc, from = msg.node().id(), "dht message");

        match kind {
            MsgKind::Join => self.handle_join(msg, atloc, stream).await,
            MsgKind::Wlcm => {
                let predecessor: NodeDescr = match net::read_packet(&mut stream).await {
                    Ok(descr) => descr,
                    Err(err) => {
                        tracing::warn!(%err, "dropping truncated WLCM");
                        return Ok(());
                    },
                };
                drop(stream);
                self.handle_wlcm(&msg, predecessor);
                Ok(())
            },
            MsgKind::Reid => {
                drop(stream);
                self.handle_reid().await
            },
            MsgKind::Srch | MsgKind::Rply | MsgKind::Miss => {
                let img: ImgDescr = match net::read_packet(&mut stream).await {
                    Ok(img) => img,
                    Err(err) => {
                        tracing::warn!(%err, "dropping truncated search message");
                        return Ok(());
                    },
                };
                self.handle_search_family(kind, atloc, msg, img, stream).await
            },
            // REDRT only exists as a reply on a connection we opened.
            MsgKind::Redrt => Err(NodeError::Unexpected { kind: kind.name() }),
        }
    }

    /// Join reception: collision, acceptance, redirect, or forward, in that
    /// order of precedence.
    async fn handle_join(
        &mut self,
        msg: DhtMsg,
        atloc: bool,
        mut stream: TcpStream,
    ) -> Result<(), NodeError> {
        let joiner = Peer::from(msg.node());

        if self.table.collides(joiner.id) {
            drop(stream);
            tracing::info!(
                joiner = %joiner,
                own = self.table.id(),
                predecessor = self.table.predecessor().id,
                "join id collides, sending REID"
            );
            self.send_reid(joiner).await
        } else if self.table.owns(joiner.id) {
            drop(stream);
            self.accept_join(joiner).await
        } else if atloc {
            // Sender expected us to own the joiner; correct it with our
            // predecessor and let it retarget.
            tracing::info!(joiner = %joiner, "join misdirected, replying REDRT");
            self.write_redrt(&mut stream).await;
            Ok(())
        } else {
            drop(stream);
            let ttl = msg.ttl();
            if ttl <= 1 {
                tracing::info!(joiner = %joiner, "join dropped, ttl exhausted");
                return Ok(());
            }
            let mut forward = msg;
            forward.set_ttl(ttl - 1);
            self.forward_join(forward).await
        }
    }

    /// Tell a colliding joiner to rederive: one-shot REID carrying us.
    async fn send_reid(&self, joiner: Peer) -> Result<(), NodeError> {
        let reid = DhtMsg::new(MsgKind::Reid, false, 0, self.self_descr());
        let mut conn = net::connect(joiner.addr).await?;
        net::write_packet(&mut conn, &reid).await?;
        Ok(())
    }

    /// Welcome a joiner we own: send WLCM, then adopt it as predecessor
    /// (and as successor too if we were alone).
    async fn accept_join(&mut self, joiner: Peer) -> Result<(), NodeError> {
        // The WLCM carries our state from before the adoption: we become the
        // joiner's successor, our current predecessor becomes its predecessor.
        let wlcm = WlcmMsg::new(self.self_descr(), self.table.predecessor().into());

        let mut conn = net::connect(joiner.addr).await?;
        net::write_packet(&mut conn, &wlcm).await?;
        drop(conn);

        tracing::info!(joiner = %joiner, "join accepted, WLCM sent");
        self.set_predecessor_and_reload(joiner);

        if self.table.successor().id == self.table.id() {
            tracing::info!(joiner = %joiner, "was alone, joiner is also our successor");
            self.table.set_successor(joiner);
        }

        Ok(())
    }

    /// Write a REDRT carrying our predecessor on an open connection.
    ///
    /// A failed write is equivalent to closing without answering: the peer
    /// treats the close as acceptance and the ring corrects itself on later
    /// traffic, so this never kills the node.
    pub(crate) async fn write_redrt(&self, stream: &mut TcpStream) {
        let redrt = DhtMsg::new(MsgKind::Redrt, false, 0, self.table.predecessor().into());
        if let Err(err) = net::write_packet(stream, &redrt).await {
            tracing::warn!(%err, "failed to send REDRT");
        }
    }

    /// Forward a JOIN along the finger table, retargeting on REDRT.
    async fn forward_join(&mut self, mut msg: DhtMsg) -> Result<(), NodeError> {
        loop {
            let target = msg.node().id();
            let (slot, finger, atloc) = self.pick_finger(target);
            msg.set_kind(MsgKind::Join, atloc);

            tracing::info!(
                slot,
                finger = %finger,
                atloc,
                ttl = msg.ttl(),
                joiner = target,
                "forwarding JOIN"
            );

            let mut conn = net::connect(finger.addr).await?;
            net::write_packet(&mut conn, &msg).await?;

            if !atloc {
                return Ok(());
            }

            match self.await_redirect(&mut conn).await? {
                None => return Ok(()),
                Some(better) => {
                    self.apply_redirect(slot, better.into());
                    let ttl = msg.ttl();
                    if ttl <= 1 {
                        tracing::info!("join dropped after redirect, ttl exhausted");
                        return Ok(());
                    }
                    msg.set_ttl(ttl - 1);
                },
            }
        }
    }

    /// Finger selection for a forward: slot, peer, and the expectation bit.
    pub(crate) fn pick_finger(&self, target: u8) -> (usize, Peer, bool) {
        let slot = self.table.forward_slot(target);
        let finger = self.table.finger(slot).peer();
        debug_assert_ne!(finger.id, self.table.id(), "forwarding to self");
        (slot, finger, self.table.expect_at(target, slot))
    }

    /// Await the outcome of an at-location forward on its connection.
    ///
    /// `None` means the peer closed without answering - the message was
    /// accepted onward. `Some(node)` is the REDRT correction.
    pub(crate) async fn await_redirect(
        &self,
        conn: &mut TcpStream,
    ) -> Result<Option<NodeDescr>, NodeError> {
        match net::read_packet::<DhtMsg>(conn).await {
            Ok(reply) => {
                let (kind, _) = reply.kind()?;
                if kind != MsgKind::Redrt {
                    return Err(NodeError::Unexpected { kind: kind.name() });
                }
                Ok(Some(reply.node()))
            },
            Err(NetError::PrematureClose) => {
                tracing::debug!("peer closed, forward accepted");
                Ok(None)
            },
            Err(err @ NetError::Io(_)) => Err(NodeError::Exchange(err)),
        }
    }

    /// Install a redirect's node at the finger slot that produced it.
    pub(crate) fn apply_redirect(&mut self, slot: usize, better: Peer) {
        tracing::info!(slot, node = %better, "REDRT received, updating finger");
        self.table.update(slot, better);
    }

    /// WLCM reception: adopt the carried predecessor and the sender as
    /// successor; the predecessor change reloads the store.
    fn handle_wlcm(&mut self, msg: &DhtMsg, predecessor: NodeDescr) {
        tracing::info!(
            successor = msg.node().id(),
            predecessor = predecessor.id(),
            "welcomed into the ring"
        );
        self.set_predecessor_and_reload(predecessor.into());
        self.table.set_successor(msg.node().into());
    }

    /// REID reception: rebuild the DHT receiver on a fresh ephemeral port,
    /// rederive the identifier, reset ring state, and retry the join.
    async fn handle_reid(&mut self) -> Result<(), NodeError> {
        let Some(target) = self.bootstrap.clone() else {
            // Only a joiner can be told to rederive.
            return Err(NodeError::Unexpected { kind: MsgKind::Reid.name() });
        };

        let listener = TcpListener::bind((self.bind_ip, 0))
            .await
            .map_err(|source| NodeError::Bind { source })?;
        self.mux.replace_dht(listener);

        let dht_addr = self.mux.dht_addr()?;
        let own = Peer::new(imgring_core::id::node_id(dht_addr), dht_addr);
        self.table.reinit(own);
        let records = self.store.load(own.id, own.id);

        tracing::info!(id = own.id, addr = %dht_addr, records, "REID: new identity derived");

        self.send_join(&target).await
    }
}
