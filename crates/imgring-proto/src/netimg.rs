//! Image-client packets.
//!
//! The external image client speaks a tiny query/reply protocol on the
//! node's image receiver: it sends one [`Iqry`] and gets back exactly one
//! [`Imsg`]. When the reply says [`found::FOUND`], `width * height * depth`
//! raw pixel bytes follow on the same connection.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MAX_NAME, VERSION,
    errors::{ProtocolError, Result},
    packets::Header,
};

/// Type byte of an image query.
pub const IQRY: u8 = 0x01;

/// Type byte of an image reply.
pub const IMSG: u8 = 0x02;

/// Values of the `im_found` field of an [`Imsg`].
pub mod found {
    /// Image located; pixels follow.
    pub const FOUND: u8 = 0x01;
    /// Image absent from the ring.
    pub const NFOUND: u8 = 0x00;
    /// Node is already servicing another query.
    pub const BUSY: u8 = 0x0d;
}

/// Pixel-format codes carried in `im_format`.
///
/// These are GL texture-format constants a viewer can feed straight to a
/// renderer; on the wire they are opaque values.
pub mod format {
    /// 3-byte RGB pixels.
    pub const RGB: u16 = 0x1907;
    /// 4-byte RGBA pixels.
    pub const RGBA: u16 = 0x1908;
    /// 1-byte grayscale pixels.
    pub const LUMINANCE: u16 = 0x1909;
    /// 2-byte grayscale+alpha pixels.
    pub const LUMINANCE_ALPHA: u16 = 0x190A;
}

/// Image query: header plus NUL-terminated file name (258 bytes).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Iqry {
    header: Header,
    name: [u8; MAX_NAME],
}

impl Iqry {
    /// Serialized size (258 bytes).
    pub const SIZE: usize = Header::SIZE + MAX_NAME;

    /// Query for a named image.
    ///
    /// # Errors
    ///
    /// `ProtocolError::NameTooLong` if the name does not leave room for the
    /// terminating NUL.
    pub fn new(name: &str) -> Result<Self> {
        if name.len() >= MAX_NAME {
            return Err(ProtocolError::NameTooLong { len: name.len() });
        }
        let mut field = [0u8; MAX_NAME];
        field[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { header: Header::raw(IQRY), name: field })
    }

    /// Check version and type byte.
    pub fn validate(&self) -> Result<()> {
        if self.header.vers() != VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.header.vers()));
        }
        if self.header.ty() != IQRY {
            return Err(ProtocolError::UnknownType(self.header.ty()));
        }
        Ok(())
    }

    /// Queried name up to the first NUL.
    ///
    /// # Errors
    ///
    /// `ProtocolError::InvalidName` if the field is not valid UTF-8.
    pub fn name(&self) -> Result<&str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        std::str::from_utf8(&self.name[..end]).map_err(|_| ProtocolError::InvalidName)
    }
}

impl std::fmt::Debug for Iqry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iqry")
            .field("name", &String::from_utf8_lossy(&self.name).trim_end_matches('\0'))
            .finish()
    }
}

/// Image reply: header, outcome, and pixel metadata (12 bytes).
///
/// The metadata fields are only meaningful when `im_found` is
/// [`found::FOUND`]; the other outcomes carry zeros. `adepth` and `rle` are
/// reserved and always zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Imsg {
    header: Header,
    im_found: u8,
    im_depth: u8,
    im_format: [u8; 2],
    im_width: [u8; 2],
    im_height: [u8; 2],
    im_adepth: u8,
    im_rle: u8,
}

impl Imsg {
    /// Serialized size (12 bytes).
    pub const SIZE: usize = 12;

    /// Reply announcing a located image; pixels follow on the connection.
    #[must_use]
    pub fn found(depth: u8, fmt: u16, width: u16, height: u16) -> Self {
        Self {
            header: Header::raw(IMSG),
            im_found: found::FOUND,
            im_depth: depth,
            im_format: fmt.to_be_bytes(),
            im_width: width.to_be_bytes(),
            im_height: height.to_be_bytes(),
            im_adepth: 0,
            im_rle: 0,
        }
    }

    /// Reply with a non-FOUND outcome and zeroed metadata.
    #[must_use]
    pub fn outcome(im_found: u8) -> Self {
        Self {
            header: Header::raw(IMSG),
            im_found,
            im_depth: 0,
            im_format: [0; 2],
            im_width: [0; 2],
            im_height: [0; 2],
            im_adepth: 0,
            im_rle: 0,
        }
    }

    /// Check version and type byte.
    pub fn validate(&self) -> Result<()> {
        if self.header.vers() != VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.header.vers()));
        }
        if self.header.ty() != IMSG {
            return Err(ProtocolError::UnknownType(self.header.ty()));
        }
        Ok(())
    }

    /// Outcome byte (`found::*`).
    #[must_use]
    pub fn im_found(&self) -> u8 {
        self.im_found
    }

    /// Bytes per pixel.
    #[must_use]
    pub fn depth(&self) -> u8 {
        self.im_depth
    }

    /// Pixel format (`format::*`).
    #[must_use]
    pub fn format(&self) -> u16 {
        u16::from_be_bytes(self.im_format)
    }

    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> u16 {
        u16::from_be_bytes(self.im_width)
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> u16 {
        u16::from_be_bytes(self.im_height)
    }

    /// Number of pixel bytes that follow a FOUND reply.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        usize::from(self.width()) * usize::from(self.height()) * usize::from(self.im_depth)
    }
}
