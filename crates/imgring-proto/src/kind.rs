//! DHT message type bytes and the at-location flag.

use crate::errors::{ProtocolError, Result};

/// Flag bit a forwarder sets when it expects the recipient to be the owner
/// of the forwarded identifier. Only meaningful on JOIN and SRCH.
pub const ATLOC_BIT: u8 = 0x80;

/// DHT message classes, without the at-location flag.
///
/// The wire carries `base_byte | ATLOC_BIT` for an expectant JOIN/SRCH;
/// [`MsgKind::from_byte`] strips and returns the flag separately so handlers
/// can match on the class alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    /// A node wants to join the ring; may be forwarded.
    Join,
    /// Join accepted; carries the joiner's new successor and predecessor.
    Wlcm,
    /// Identifier collision; the joiner must rederive and retry.
    Reid,
    /// "You are not the owner"; carries the sender's current predecessor.
    Redrt,
    /// Content query; carries the originating proxy and an image descriptor.
    Srch,
    /// Image found; the sender is the node holding it.
    Rply,
    /// Image confirmed absent from the ring.
    Miss,
}

impl MsgKind {
    /// Wire byte of this class with the at-location flag clear.
    #[must_use]
    pub const fn base_byte(self) -> u8 {
        match self {
            Self::Join => 0x08,
            Self::Wlcm => 0x04,
            Self::Reid => 0x0c,
            Self::Redrt => 0x40,
            Self::Srch => 0x10,
            Self::Rply => 0x20,
            Self::Miss => 0x22,
        }
    }

    /// Wire byte with the at-location flag applied.
    ///
    /// The flag is only defined for JOIN and SRCH; asking for it on any other
    /// class is a caller bug and is ignored.
    #[must_use]
    pub const fn wire_byte(self, atloc: bool) -> u8 {
        let base = self.base_byte();
        if atloc && matches!(self, Self::Join | Self::Srch) { base | ATLOC_BIT } else { base }
    }

    /// Decode a wire byte into `(class, at_location)`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::UnknownType` for unassigned bytes and for the
    /// at-location flag on classes that cannot carry it.
    pub fn from_byte(byte: u8) -> Result<(Self, bool)> {
        let atloc = byte & ATLOC_BIT != 0;
        let kind = match byte & !ATLOC_BIT {
            0x08 => Self::Join,
            0x04 => Self::Wlcm,
            0x0c => Self::Reid,
            0x40 => Self::Redrt,
            0x10 => Self::Srch,
            0x20 => Self::Rply,
            0x22 => Self::Miss,
            _ => return Err(ProtocolError::UnknownType(byte)),
        };

        if atloc && !matches!(kind, Self::Join | Self::Srch) {
            return Err(ProtocolError::UnknownType(byte));
        }

        Ok((kind, atloc))
    }

    /// Short name for log lines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Join => "JOIN",
            Self::Wlcm => "WLCM",
            Self::Reid => "REID",
            Self::Redrt => "REDRT",
            Self::Srch => "SRCH",
            Self::Rply => "RPLY",
            Self::Miss => "MISS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_byte_round_trip() {
        let kinds = [
            MsgKind::Join,
            MsgKind::Wlcm,
            MsgKind::Reid,
            MsgKind::Redrt,
            MsgKind::Srch,
            MsgKind::Rply,
            MsgKind::Miss,
        ];
        for kind in kinds {
            assert_eq!(MsgKind::from_byte(kind.wire_byte(false)), Ok((kind, false)));
        }
        for kind in [MsgKind::Join, MsgKind::Srch] {
            assert_eq!(MsgKind::from_byte(kind.wire_byte(true)), Ok((kind, true)));
        }
    }

    #[test]
    fn atloc_is_ignored_on_replies() {
        // wire_byte never produces a flagged WLCM even if asked to
        assert_eq!(MsgKind::Wlcm.wire_byte(true), 0x04);
    }

    #[test]
    fn flagged_reply_bytes_are_rejected() {
        for base in [0x04u8, 0x0c, 0x40, 0x20, 0x22] {
            let byte = base | ATLOC_BIT;
            assert_eq!(MsgKind::from_byte(byte), Err(ProtocolError::UnknownType(byte)));
        }
    }

    #[test]
    fn unassigned_bytes_are_rejected() {
        for byte in [0x00u8, 0x01, 0x3f, 0xff] {
            assert!(MsgKind::from_byte(byte).is_err());
        }
    }
}
