//! Lookup engine: the image-query state machine and SRCH/RPLY/MISS.
//!
//! The node services at most one image query at a time. Accepting a query
//! moves it Idle → Busy and retains the client connection; a local hit, a
//! ring RPLY, or a ring MISS resolves the query, answers the client, and
//! returns to Idle. A client arriving while Busy is turned away with a BUSY
//! reply immediately.

use imgring_core::{Query, id};
use imgring_proto::netimg::{Imsg, Iqry, found};
use imgring_proto::{DEFAULT_TTL, DhtMsg, ImgDescr, MsgKind, SrchMsg};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::NodeError;
use crate::net;
use crate::node::DhtNode;
use crate::tga::TgaImage;

impl DhtNode {
    /// Accept an image-client connection and start (or reject) its query.
    pub(crate) async fn handle_image_conn(
        &mut self,
        mut stream: TcpStream,
    ) -> Result<(), NodeError> {
        let query: Iqry = match net::read_packet(&mut stream).await {
            Ok(query) => query,
            Err(err) => {
                tracing::warn!(%err, "dropping unreadable image connection");
                return Ok(());
            },
        };
        query.validate()?;

        let name = match query.name() {
            Ok(name) => name.to_owned(),
            Err(err) => {
                tracing::warn!(%err, "dropping image query with bad name");
                return Ok(());
            },
        };

        if self.client.is_some() {
            tracing::info!(name, "busy, rejecting image query");
            let busy = Imsg::outcome(found::BUSY);
            if let Err(err) = net::write_packet(&mut stream, &busy).await {
                tracing::warn!(%err, "failed to send BUSY");
            }
            return Ok(());
        }

        tracing::info!(name, "image query accepted");
        self.client = Some(stream);
        self.resolve_local(&name).await
    }

    /// Local resolution: hit streams back, an owned miss is final, anything
    /// else goes to the ring.
    async fn resolve_local(&mut self, name: &str) -> Result<(), NodeError> {
        match self.store.query(name) {
            Query::Hit => {
                tracing::info!(name, "image found locally");
                self.stream_image(name).await;
                Ok(())
            },
            result @ (Query::Miss | Query::FalsePositive) => {
                tracing::debug!(name, ?result, "not in local store");
                let img_id = id::name_id(name);

                if self.table.owns(img_id) {
                    // In our purview but absent: it is nowhere.
                    tracing::info!(name, img_id, "image in our purview but absent");
                    self.reply_not_found().await;
                    Ok(())
                } else {
                    let img = ImgDescr::new(img_id, name)?;
                    let srch =
                        SrchMsg::new(MsgKind::Srch, false, DEFAULT_TTL, self.self_descr(), img);
                    tracing::info!(name, img_id, ttl = DEFAULT_TTL, "querying the ring");
                    self.forward_search(srch).await
                }
            },
        }
    }

    /// Dispatch a fully read search-family message.
    pub(crate) async fn handle_search_family(
        &mut self,
        kind: MsgKind,
        atloc: bool,
        msg: DhtMsg,
        img: ImgDescr,
        stream: TcpStream,
    ) -> Result<(), NodeError> {
        let pkt = SrchMsg::from_parts(msg, img);
        match kind {
            MsgKind::Srch => self.handle_srch(pkt, atloc, stream).await,
            MsgKind::Rply => {
                drop(stream);
                self.handle_rply(&pkt).await;
                Ok(())
            },
            MsgKind::Miss => {
                drop(stream);
                self.handle_miss(&pkt).await;
                Ok(())
            },
            // Only the search family is routed here.
            _ => Err(NodeError::Unexpected { kind: kind.name() }),
        }
    }

    /// SRCH reception: answer, squash, redirect, or forward.
    async fn handle_srch(
        &mut self,
        mut pkt: SrchMsg,
        atloc: bool,
        mut stream: TcpStream,
    ) -> Result<(), NodeError> {
        let name = match pkt.img().name() {
            Ok(name) => name.to_owned(),
            Err(err) => {
                tracing::warn!(%err, "dropping search with bad name");
                return Ok(());
            },
        };
        tracing::info!(name, img_id = pkt.img().id(), from = pkt.msg().node().id(), "SRCH");

        match self.store.query(&name) {
            Query::Hit => {
                drop(stream);
                tracing::info!(name, "image found, sending RPLY to proxy");
                self.answer_proxy(&pkt, MsgKind::Rply).await
            },
            Query::Miss | Query::FalsePositive => {
                if self.table.owns(pkt.img().id()) {
                    drop(stream);
                    tracing::info!(name, "image absent from the ring, sending MISS to proxy");
                    self.answer_proxy(&pkt, MsgKind::Miss).await
                } else if atloc {
                    tracing::info!(name, "search misdirected, replying REDRT");
                    self.write_redrt(&mut stream).await;
                    Ok(())
                } else {
                    drop(stream);
                    let ttl = pkt.msg().ttl();
                    if ttl <= 1 {
                        tracing::info!(name, "search dropped, ttl exhausted");
                        return Ok(());
                    }
                    pkt.msg_mut().set_ttl(ttl - 1);
                    self.forward_search(pkt).await
                }
            },
        }
    }

    /// One-shot RPLY or MISS back to the originating proxy.
    async fn answer_proxy(&self, pkt: &SrchMsg, kind: MsgKind) -> Result<(), NodeError> {
        let proxy = pkt.msg().node().addr();
        let answer = SrchMsg::new(kind, false, 0, self.self_descr(), pkt.img());

        let mut conn = net::connect(proxy).await?;
        net::write_packet(&mut conn, &answer).await?;
        Ok(())
    }

    /// Forward a SRCH along the finger table, retargeting on REDRT.
    pub(crate) async fn forward_search(&mut self, mut pkt: SrchMsg) -> Result<(), NodeError> {
        loop {
            let target = pkt.img().id();
            let (slot, finger, atloc) = self.pick_finger(target);
            pkt.msg_mut().set_kind(MsgKind::Srch, atloc);

            tracing::info!(
                slot,
                finger = %finger,
                atloc,
                ttl = pkt.msg().ttl(),
                img_id = target,
                "forwarding SRCH"
            );

            let mut conn = net::connect(finger.addr).await?;
            net::write_packet(&mut conn, &pkt).await?;

            if !atloc {
                return Ok(());
            }

            match self.await_redirect(&mut conn).await? {
                None => return Ok(()),
                Some(better) => {
                    self.apply_redirect(slot, better.into());
                    let ttl = pkt.msg().ttl();
                    if ttl <= 1 {
                        tracing::info!("search dropped after redirect, ttl exhausted");
                        return Ok(());
                    }
                    pkt.msg_mut().set_ttl(ttl - 1);
                },
            }
        }
    }

    /// RPLY reception: the image exists somewhere - cache the name and
    /// stream it to the waiting client from the shared image directory.
    async fn handle_rply(&mut self, pkt: &SrchMsg) {
        let Ok(name) = pkt.img().name().map(str::to_owned) else {
            tracing::warn!("dropping RPLY with bad name");
            return;
        };
        tracing::info!(name, from = pkt.msg().node().id(), "RPLY: image located");

        self.store.cache(&name);
        self.stream_image(&name).await;
    }

    /// MISS reception: the ring has confirmed absence.
    async fn handle_miss(&mut self, pkt: &SrchMsg) {
        tracing::info!(from = pkt.msg().node().id(), "MISS: image absent");
        self.reply_not_found().await;
    }

    /// Stream a named image to the retained client, then return to Idle.
    /// A load failure degrades to a not-found reply.
    async fn stream_image(&mut self, name: &str) {
        let Some(mut client) = self.client.take() else {
            tracing::warn!(name, "no image client waiting, reply dropped");
            return;
        };

        match TgaImage::load(&self.store.image_path(name)) {
            Ok(image) => {
                let reply = Imsg::found(image.depth, image.format, image.width, image.height);
                let outcome = async {
                    net::write_packet(&mut client, &reply).await?;
                    client.write_all(&image.pixels).await.map_err(net::NetError::Io)?;
                    Ok::<_, net::NetError>(())
                }
                .await;

                match outcome {
                    Ok(()) => {
                        tracing::info!(name, bytes = image.payload_len(), "image streamed");
                    },
                    Err(err) => tracing::warn!(%err, "client went away mid-stream"),
                }
            },
            Err(err) => {
                tracing::warn!(name, %err, "image load failed, reporting not found");
                let reply = Imsg::outcome(found::NFOUND);
                if let Err(err) = net::write_packet(&mut client, &reply).await {
                    tracing::warn!(%err, "failed to send NFOUND");
                }
            },
        }
    }

    /// Send NFOUND to the retained client, then return to Idle.
    async fn reply_not_found(&mut self) {
        let Some(mut client) = self.client.take() else {
            tracing::warn!("no image client waiting, NFOUND dropped");
            return;
        };

        let reply = Imsg::outcome(found::NFOUND);
        if let Err(err) = net::write_packet(&mut client, &reply).await {
            tracing::warn!(%err, "failed to send NFOUND");
        }
    }
}
