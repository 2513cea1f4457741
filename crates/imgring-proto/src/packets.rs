//! Fixed-layout DHT packets.
//!
//! Layouts are byte-exact: every field is a `u8` or a `[u8; N]`
//! in network byte order, so each struct has alignment 1 and no padding.
//! `zerocopy` verifies the layout at compile time and lets us cast packets
//! to and from raw bytes without copying or unsafe code - the same pattern
//! as any untrusted-input codec: all bit patterns are structurally valid,
//! and semantic validation (version, type byte) happens separately in
//! [`Header::validate`].

use std::net::{Ipv4Addr, SocketAddrV4};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MAX_NAME, VERSION,
    errors::{ProtocolError, Result},
    kind::MsgKind,
};

/// Two-byte packet header: `{ vers, type }`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Header {
    vers: u8,
    ty: u8,
}

impl Header {
    /// Serialized size (2 bytes).
    pub const SIZE: usize = 2;

    /// Header for a DHT message of the given class.
    #[must_use]
    pub fn new(kind: MsgKind, atloc: bool) -> Self {
        Self { vers: VERSION, ty: kind.wire_byte(atloc) }
    }

    /// Header with a raw type byte (image-client packets).
    #[must_use]
    pub fn raw(ty: u8) -> Self {
        Self { vers: VERSION, ty }
    }

    /// Version byte as received.
    #[must_use]
    pub fn vers(&self) -> u8 {
        self.vers
    }

    /// Type byte as received.
    #[must_use]
    pub fn ty(&self) -> u8 {
        self.ty
    }

    /// Check the version byte and decode the DHT type byte.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnsupportedVersion` on a version mismatch
    /// - `ProtocolError::UnknownType` for unassigned type bytes
    pub fn validate(&self) -> Result<(MsgKind, bool)> {
        if self.vers != VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.vers));
        }
        MsgKind::from_byte(self.ty)
    }
}

/// Node descriptor: `{ rsvd, id, port, ipv4 }` (8 bytes).
///
/// The address is the node's DHT receiver. `rsvd` is always zero on send
/// and ignored on receive.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct NodeDescr {
    rsvd: u8,
    id: u8,
    port: [u8; 2],
    ipv4: [u8; 4],
}

impl NodeDescr {
    /// Serialized size (8 bytes).
    pub const SIZE: usize = 8;

    /// Descriptor for a node with the given ring id and receiver address.
    #[must_use]
    pub fn new(id: u8, addr: SocketAddrV4) -> Self {
        Self { rsvd: 0, id, port: addr.port().to_be_bytes(), ipv4: addr.ip().octets() }
    }

    /// Ring identifier of the node.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    /// DHT receiver port (host byte order).
    #[must_use]
    pub fn port(&self) -> u16 {
        u16::from_be_bytes(self.port)
    }

    /// IPv4 address of the DHT receiver.
    #[must_use]
    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ipv4)
    }

    /// Receiver address as a socket address.
    #[must_use]
    pub fn addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ipv4(), self.port())
    }
}

/// Base DHT message: `{ header, ttl, node }` (12 bytes).
///
/// The TTL is only meaningful for JOIN and SRCH; WLCM, REID, REDRT, RPLY and
/// MISS carry zero. The node descriptor's meaning depends on the type byte:
/// the joining node for JOIN, the sender's predecessor for REDRT, the
/// accepting node for WLCM, the originating proxy for SRCH.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DhtMsg {
    header: Header,
    ttl: [u8; 2],
    node: NodeDescr,
}

impl DhtMsg {
    /// Serialized size (12 bytes).
    pub const SIZE: usize = 12;

    /// Assemble a message.
    #[must_use]
    pub fn new(kind: MsgKind, atloc: bool, ttl: u16, node: NodeDescr) -> Self {
        Self { header: Header::new(kind, atloc), ttl: ttl.to_be_bytes(), node }
    }

    /// Parse from raw bytes, checking length and version.
    ///
    /// # Errors
    ///
    /// `ProtocolError::TooShort` on a truncated buffer, plus the
    /// [`Header::validate`] errors.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let msg = Self::read_from_bytes(bytes)
            .map_err(|_| ProtocolError::TooShort { expected: Self::SIZE, actual: bytes.len() })?;
        msg.header.validate()?;
        Ok(msg)
    }

    /// Packet header.
    #[must_use]
    pub fn header(&self) -> Header {
        self.header
    }

    /// Decoded `(class, at_location)` of the type byte.
    pub fn kind(&self) -> Result<(MsgKind, bool)> {
        self.header.validate()
    }

    /// Rewrite the type byte, preserving the version.
    pub fn set_kind(&mut self, kind: MsgKind, atloc: bool) {
        self.header = Header::new(kind, atloc);
    }

    /// Remaining time-to-live (host byte order).
    #[must_use]
    pub fn ttl(&self) -> u16 {
        u16::from_be_bytes(self.ttl)
    }

    /// Overwrite the time-to-live.
    pub fn set_ttl(&mut self, ttl: u16) {
        self.ttl = ttl.to_be_bytes();
    }

    /// Node descriptor carried by the message.
    #[must_use]
    pub fn node(&self) -> NodeDescr {
        self.node
    }
}

/// WLCM message: the base message plus the accepting node's predecessor
/// (20 bytes). The base descriptor is the joiner's new successor; the
/// trailing descriptor is its new predecessor.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct WlcmMsg {
    msg: DhtMsg,
    predecessor: NodeDescr,
}

impl WlcmMsg {
    /// Serialized size (20 bytes).
    pub const SIZE: usize = 20;

    /// Assemble a welcome from the accepting node and its predecessor.
    #[must_use]
    pub fn new(successor: NodeDescr, predecessor: NodeDescr) -> Self {
        Self { msg: DhtMsg::new(MsgKind::Wlcm, false, 0, successor), predecessor }
    }

    /// Base message (header + joiner's new successor).
    #[must_use]
    pub fn msg(&self) -> DhtMsg {
        self.msg
    }

    /// The joiner's new predecessor.
    #[must_use]
    pub fn predecessor(&self) -> NodeDescr {
        self.predecessor
    }
}

/// Image descriptor: folded id plus NUL-terminated name (257 bytes).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ImgDescr {
    id: u8,
    name: [u8; MAX_NAME],
}

impl ImgDescr {
    /// Serialized size (257 bytes).
    pub const SIZE: usize = 1 + MAX_NAME;

    /// Descriptor for a named image.
    ///
    /// # Errors
    ///
    /// `ProtocolError::NameTooLong` if the name does not leave room for the
    /// terminating NUL.
    pub fn new(id: u8, name: &str) -> Result<Self> {
        if name.len() >= MAX_NAME {
            return Err(ProtocolError::NameTooLong { len: name.len() });
        }
        let mut field = [0u8; MAX_NAME];
        field[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { id, name: field })
    }

    /// Folded identifier of the image name.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Image name up to the first NUL.
    ///
    /// # Errors
    ///
    /// `ProtocolError::InvalidName` if the field is not valid UTF-8.
    pub fn name(&self) -> Result<&str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        std::str::from_utf8(&self.name[..end]).map_err(|_| ProtocolError::InvalidName)
    }
}

impl std::fmt::Debug for ImgDescr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImgDescr")
            .field("id", &self.id)
            .field("name", &String::from_utf8_lossy(&self.name).trim_end_matches('\0'))
            .finish()
    }
}

impl PartialEq for ImgDescr {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name[..] == other.name[..]
    }
}

impl Eq for ImgDescr {}

/// Search-family message: the base message plus an image descriptor
/// (269 bytes). Used by SRCH, RPLY and MISS.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SrchMsg {
    msg: DhtMsg,
    img: ImgDescr,
}

impl SrchMsg {
    /// Serialized size (269 bytes).
    pub const SIZE: usize = DhtMsg::SIZE + ImgDescr::SIZE;

    /// Assemble a search-family message.
    #[must_use]
    pub fn new(kind: MsgKind, atloc: bool, ttl: u16, node: NodeDescr, img: ImgDescr) -> Self {
        Self { msg: DhtMsg::new(kind, atloc, ttl, node), img }
    }

    /// Reassemble from a base message read off the wire and its tail.
    #[must_use]
    pub fn from_parts(msg: DhtMsg, img: ImgDescr) -> Self {
        Self { msg, img }
    }

    /// Base message (header + originating proxy descriptor).
    #[must_use]
    pub fn msg(&self) -> DhtMsg {
        self.msg
    }

    /// Mutable base message, for TTL and type-byte rewrites while forwarding.
    pub fn msg_mut(&mut self) -> &mut DhtMsg {
        &mut self.msg
    }

    /// Image being searched for.
    #[must_use]
    pub fn img(&self) -> ImgDescr {
        self.img
    }
}
