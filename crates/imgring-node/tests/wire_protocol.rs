//! Wire-level scenarios driven against a real node.
//!
//! Here the tests speak the protocol themselves - a bare listener plays the
//! part of a remote node - to pin down exchanges that are awkward to observe
//! between two real nodes: the join idempotence law (WLCM then REID), and
//! the one-outstanding-query rule with its BUSY rejection.

mod common;

use common::{converged, empty_image_dir, name_with_id, query_image, send_to, spawn_node};
use imgring_core::id::in_range;
use imgring_node::net::{read_packet, write_packet};
use imgring_proto::netimg::{Imsg, Iqry, found};
use imgring_proto::{DEFAULT_TTL, DhtMsg, MsgKind, NodeDescr, SrchMsg, WlcmMsg};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Bind a listener that stands in for a remote node's DHT receiver.
async fn fake_receiver() -> (TcpListener, std::net::SocketAddrV4) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake receiver");
    let addr = match listener.local_addr().expect("local addr") {
        std::net::SocketAddr::V4(addr) => addr,
        std::net::SocketAddr::V6(_) => unreachable!("bound v4"),
    };
    (listener, addr)
}

#[tokio::test]
async fn join_twice_welcomes_then_reids() {
    let dir = empty_image_dir();
    let mut node = spawn_node(Some(100), None, dir.path()).await;

    let (fake, fake_addr) = fake_receiver().await;
    let joiner = NodeDescr::new(30, fake_addr);
    let join = DhtMsg::new(MsgKind::Join, false, DEFAULT_TTL, joiner);

    // First join: the lone node owns everything and welcomes us, carrying
    // itself as both our successor and (it was alone) our predecessor.
    send_to(node.handle.dht_addr(), &join).await;
    let (mut conn, _) = timeout(common::CONVERGE, fake.accept()).await.expect("wlcm").expect("accept");
    let wlcm: WlcmMsg = read_packet(&mut conn).await.expect("read WLCM");
    drop(conn);

    assert_eq!(wlcm.msg().kind().expect("valid"), (MsgKind::Wlcm, false));
    assert_eq!(wlcm.msg().node().id(), 100);
    assert_eq!(wlcm.predecessor().id(), 100);
    converged(&mut node, |s| s.ring.predecessor.id == 30).await;

    // Same join again: id 30 now collides with the node's predecessor, so
    // the answer is a REID carrying the node's own descriptor.
    send_to(node.handle.dht_addr(), &join).await;
    let (mut conn, _) = timeout(common::CONVERGE, fake.accept()).await.expect("reid").expect("accept");
    let reid: DhtMsg = read_packet(&mut conn).await.expect("read REID");

    assert_eq!(reid.kind().expect("valid"), (MsgKind::Reid, false));
    assert_eq!(reid.node().id(), 100);
    assert_eq!(reid.node().addr(), node.handle.dht_addr());
}

#[tokio::test]
async fn forwarded_join_decrements_ttl() {
    let dir = empty_image_dir();
    let mut node = spawn_node(Some(100), None, dir.path()).await;

    let (fake, fake_addr) = fake_receiver().await;
    let neighbor = NodeDescr::new(60, fake_addr);
    send_to(node.handle.dht_addr(), &WlcmMsg::new(neighbor, neighbor)).await;
    converged(&mut node, |s| s.ring.predecessor.id == 60).await;

    // Id 30 is outside (60, 100], so the node forwards - decrementing first.
    let join = DhtMsg::new(MsgKind::Join, false, DEFAULT_TTL, NodeDescr::new(30, fake_addr));
    send_to(node.handle.dht_addr(), &join).await;

    let (mut conn, _) =
        timeout(common::CONVERGE, fake.accept()).await.expect("join").expect("accept");
    let forwarded: DhtMsg = read_packet(&mut conn).await.expect("read JOIN");
    drop(conn);

    let (kind, atloc) = forwarded.kind().expect("valid");
    assert_eq!(kind, MsgKind::Join);
    assert!(atloc, "the only known finger is expected to own the id");
    assert_eq!(forwarded.ttl(), DEFAULT_TTL - 1);
    assert_eq!(forwarded.node().id(), 30, "joiner descriptor is forwarded unchanged");
}

#[tokio::test]
async fn exhausted_ttl_drops_the_join() {
    let dir = empty_image_dir();
    let mut node = spawn_node(Some(100), None, dir.path()).await;

    let (fake, fake_addr) = fake_receiver().await;
    let neighbor = NodeDescr::new(60, fake_addr);
    send_to(node.handle.dht_addr(), &WlcmMsg::new(neighbor, neighbor)).await;
    converged(&mut node, |s| s.ring.predecessor.id == 60).await;

    // TTL 1 would decrement to zero: the join is dropped silently.
    let join = DhtMsg::new(MsgKind::Join, false, 1, NodeDescr::new(30, fake_addr));
    send_to(node.handle.dht_addr(), &join).await;

    let outcome = timeout(std::time::Duration::from_millis(500), fake.accept()).await;
    assert!(outcome.is_err(), "nothing may be forwarded for an exhausted ttl");

    // The node is still alive afterwards: an owned-but-absent query resolves
    // locally without touching the ring.
    let owned = name_with_id(|id| in_range(id, 60, 100));
    let (reply, _) = query_image(node.handle.image_addr(), &owned).await;
    assert_eq!(reply.im_found(), found::NFOUND);
}

#[tokio::test]
async fn busy_node_rejects_second_client() {
    let dir = empty_image_dir();
    let mut node = spawn_node(Some(100), None, dir.path()).await;

    // Wire a fake neighbor in as both predecessor and successor.
    let (fake, fake_addr) = fake_receiver().await;
    let neighbor = NodeDescr::new(60, fake_addr);
    send_to(node.handle.dht_addr(), &WlcmMsg::new(neighbor, neighbor)).await;
    converged(&mut node, |s| s.ring.predecessor.id == 60 && s.ring.successor.id == 60).await;

    // Client 1 asks for an image outside the node's purview; the query goes
    // to the ring and the node stays busy until the ring answers.
    let outside = name_with_id(|id| !in_range(id, 60, 100));
    let mut client1 = TcpStream::connect(node.handle.image_addr()).await.expect("client 1");
    write_packet(&mut client1, &Iqry::new(&outside).expect("name")).await.expect("send IQRY");

    // The fake neighbor receives the forwarded SRCH and closes without
    // answering - acceptance, in at-location terms.
    let (mut conn, _) =
        timeout(common::CONVERGE, fake.accept()).await.expect("srch").expect("accept");
    let srch: SrchMsg = read_packet(&mut conn).await.expect("read SRCH");
    drop(conn);

    let (kind, _) = srch.msg().kind().expect("valid");
    assert_eq!(kind, MsgKind::Srch);
    assert_eq!(srch.msg().node().id(), 100, "the proxy names itself as origin");
    assert_eq!(srch.msg().node().addr(), node.handle.dht_addr());
    assert_eq!(srch.img().name().expect("name"), outside);
    // An initial emission goes out with the full budget; only forwards of
    // received messages decrement.
    assert_eq!(srch.msg().ttl(), DEFAULT_TTL);

    converged(&mut node, |s| s.busy).await;

    // Client 2 is turned away immediately.
    let (busy_reply, _) = query_image(node.handle.image_addr(), "other.tga").await;
    assert_eq!(busy_reply.im_found(), found::BUSY);

    // The ring reports a miss; client 1 hears not-found and the node idles.
    let miss = SrchMsg::new(MsgKind::Miss, false, 0, neighbor, srch.img());
    send_to(node.handle.dht_addr(), &miss).await;

    let reply: Imsg = timeout(common::CONVERGE, read_packet(&mut client1))
        .await
        .expect("nfound timed out")
        .expect("read IMSG");
    assert_eq!(reply.im_found(), found::NFOUND);

    converged(&mut node, |s| !s.busy).await;
}
