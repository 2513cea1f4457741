//! Truevision TGA loader.
//!
//! Decodes the subset of TGA the image directory actually contains:
//! uncompressed and RLE-compressed true-color (types 2/10) and grayscale
//! (types 3/11). Color pixels are stored BGR(A) in the file and returned
//! RGB(A), matching the pixel format codes the image client is told.
//!
//! A load failure is never fatal to the node: the lookup engine degrades a
//! failed hit to a not-found reply.

use std::io;
use std::path::{Path, PathBuf};

use imgring_proto::netimg::format;
use thiserror::Error;

/// Errors while reading or decoding a TGA file.
#[derive(Debug, Error)]
pub enum TgaError {
    /// File could not be read at all.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path we tried to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// File ends before the 18-byte header does.
    #[error("file too short for a TGA header")]
    Truncated,

    /// Image type outside the supported true-color/grayscale subset.
    #[error("unsupported TGA image type {0}")]
    UnsupportedType(u8),

    /// Pixel depth that does not match the image type.
    #[error("unsupported pixel depth of {0} bits")]
    UnsupportedDepth(u8),

    /// Pixel data ends before `width * height` pixels were decoded.
    #[error("pixel data shorter than the header claims")]
    ShortPixelData,
}

/// A decoded image: dimensions, wire pixel format, and raw pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TgaImage {
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Bytes per pixel.
    pub depth: u8,
    /// Pixel format code for the image-client reply (`format::*`).
    pub format: u16,
    /// `width * height * depth` pixel bytes, RGB(A) or grayscale order.
    pub pixels: Vec<u8>,
}

impl TgaImage {
    /// Load and decode a TGA file.
    pub fn load(path: &Path) -> Result<Self, TgaError> {
        let bytes = std::fs::read(path)
            .map_err(|source| TgaError::Read { path: path.to_path_buf(), source })?;
        Self::decode(&bytes)
    }

    /// Decode from in-memory file bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, TgaError> {
        let header: &[u8; 18] = bytes.get(..18).and_then(|h| h.try_into().ok()).ok_or(TgaError::Truncated)?;

        let id_len = usize::from(header[0]);
        let image_type = header[2];
        // Color-mapped images never occur in the image directory; a present
        // color map is only skipped over.
        let cmap_entries = usize::from(u16::from_le_bytes([header[5], header[6]]));
        let cmap_entry_bits = usize::from(header[7]);
        let width = u16::from_le_bytes([header[12], header[13]]);
        let height = u16::from_le_bytes([header[14], header[15]]);
        let pixel_bits = header[16];

        let (rle, grayscale) = match image_type {
            2 => (false, false),
            3 => (false, true),
            10 => (true, false),
            11 => (true, true),
            other => return Err(TgaError::UnsupportedType(other)),
        };

        let depth = match (grayscale, pixel_bits) {
            (true, 8) => 1,
            (true, 16) => 2,
            (false, 24) => 3,
            (false, 32) => 4,
            (_, bits) => return Err(TgaError::UnsupportedDepth(bits)),
        };

        let fmt = match depth {
            1 => format::LUMINANCE,
            2 => format::LUMINANCE_ALPHA,
            3 => format::RGB,
            _ => format::RGBA,
        };

        let data_start = 18 + id_len + cmap_entries * cmap_entry_bits.div_ceil(8);
        let data = bytes.get(data_start..).ok_or(TgaError::ShortPixelData)?;

        let count = usize::from(width) * usize::from(height);
        let mut pixels = if rle {
            decode_rle(data, count, usize::from(depth))?
        } else {
            let want = count * usize::from(depth);
            data.get(..want).ok_or(TgaError::ShortPixelData)?.to_vec()
        };

        if !grayscale {
            // BGR(A) -> RGB(A)
            for pixel in pixels.chunks_exact_mut(usize::from(depth)) {
                pixel.swap(0, 2);
            }
        }

        Ok(Self { width, height, depth, format: fmt, pixels })
    }

    /// Total pixel payload size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Expand RLE packets into `count` pixels of `depth` bytes each.
fn decode_rle(data: &[u8], count: usize, depth: usize) -> Result<Vec<u8>, TgaError> {
    let mut pixels = Vec::with_capacity(count * depth);
    let mut cursor = 0usize;

    while pixels.len() < count * depth {
        let control = *data.get(cursor).ok_or(TgaError::ShortPixelData)?;
        cursor += 1;
        let run = usize::from(control & 0x7f) + 1;

        if control & 0x80 != 0 {
            let pixel = data.get(cursor..cursor + depth).ok_or(TgaError::ShortPixelData)?;
            cursor += depth;
            for _ in 0..run {
                pixels.extend_from_slice(pixel);
            }
        } else {
            let literal = data.get(cursor..cursor + run * depth).ok_or(TgaError::ShortPixelData)?;
            cursor += run * depth;
            pixels.extend_from_slice(literal);
        }
    }

    pixels.truncate(count * depth);
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(image_type: u8, width: u16, height: u16, bits: u8) -> Vec<u8> {
        let mut h = vec![0u8; 18];
        h[2] = image_type;
        h[12..14].copy_from_slice(&width.to_le_bytes());
        h[14..16].copy_from_slice(&height.to_le_bytes());
        h[16] = bits;
        h
    }

    #[test]
    fn decodes_uncompressed_true_color() {
        let mut file = header(2, 2, 1, 24);
        // Two BGR pixels: blue, then red.
        file.extend_from_slice(&[255, 0, 0, 0, 0, 255]);

        let image = TgaImage::decode(&file).unwrap();
        assert_eq!((image.width, image.height, image.depth), (2, 1, 3));
        assert_eq!(image.format, format::RGB);
        // Returned RGB: blue is (0,0,255), red is (255,0,0).
        assert_eq!(image.pixels, vec![0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn decodes_rle_run() {
        let mut file = header(10, 4, 1, 24);
        // One run packet: repeat BGR (1,2,3) four times.
        file.extend_from_slice(&[0x83, 1, 2, 3]);

        let image = TgaImage::decode(&file).unwrap();
        assert_eq!(image.pixels, vec![3, 2, 1, 3, 2, 1, 3, 2, 1, 3, 2, 1]);
    }

    #[test]
    fn decodes_grayscale_without_swap() {
        let mut file = header(3, 3, 1, 8);
        file.extend_from_slice(&[9, 8, 7]);

        let image = TgaImage::decode(&file).unwrap();
        assert_eq!(image.format, format::LUMINANCE);
        assert_eq!(image.pixels, vec![9, 8, 7]);
    }

    #[test]
    fn rejects_color_mapped_files() {
        let file = header(1, 1, 1, 24);
        assert!(matches!(TgaImage::decode(&file), Err(TgaError::UnsupportedType(1))));
    }

    #[test]
    fn rejects_truncated_pixels() {
        let mut file = header(2, 4, 4, 24);
        file.extend_from_slice(&[0u8; 5]);
        assert!(matches!(TgaImage::decode(&file), Err(TgaError::ShortPixelData)));
    }
}
