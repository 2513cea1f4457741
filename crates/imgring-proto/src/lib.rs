//! Wire format for the imgring DHT and its image-client protocol.
//!
//! Every packet on the wire has a fixed, byte-exact layout with multi-byte
//! integers in network byte order (Big Endian). Packets are represented as
//! `#[repr(C)]` structs over `u8` and `[u8; N]` fields - alignment 1, no
//! padding - so they can be cast to and from untrusted network bytes with
//! `zerocopy` without any unsafe code.
//!
//! Two packet families share the version byte [`VERSION`]:
//!
//! - DHT messages ([`DhtMsg`], [`WlcmMsg`], [`SrchMsg`]) exchanged between
//!   ring nodes over one-shot TCP connections.
//! - Image-client messages ([`Iqry`], [`Imsg`]) exchanged between a node and
//!   the external image client it proxies for.
//!
//! A packet with any other version byte is a fatal protocol error; the node
//! that reads one exits.

mod errors;
mod kind;
pub mod netimg;
mod packets;

pub use errors::{ProtocolError, Result};
pub use kind::{ATLOC_BIT, MsgKind};
pub use netimg::{Imsg, Iqry};
pub use packets::{DhtMsg, Header, ImgDescr, NodeDescr, SrchMsg, WlcmMsg};

/// Protocol version carried in the first byte of every packet.
pub const VERSION: u8 = 0x02;

/// Initial time-to-live for JOIN and SRCH messages.
pub const DEFAULT_TTL: u16 = 10;

/// Size of the image-name field, including the terminating NUL.
pub const MAX_NAME: usize = 256;
