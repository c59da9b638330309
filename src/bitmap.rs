//! Header access for cached grayscale rasters.
//!
//! Image codecs write an uncompressed BMP with a small grayscale palette.
//! Pagination only needs the final dimensions back, so this module reads the
//! fixed header and leaves pixel data alone. [`write_grayscale_header`] is
//! offered to codec implementations so every producer agrees on the layout.

use std::io::{Read, Write};

use crate::error::BitmapError;

const FILE_HEADER_BYTES: u32 = 14;
const INFO_HEADER_BYTES: u32 = 40;

/// Parsed raster header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitmapHeader {
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u16,
    /// Rows stored first-to-last instead of bottom-up.
    pub top_down: bool,
    /// Byte offset of the first pixel row.
    pub data_offset: u32,
}

impl BitmapHeader {
    /// Parse the file and info headers from the start of `input`.
    pub fn parse<R: Read>(input: &mut R) -> Result<Self, BitmapError> {
        let mut file_header = [0u8; FILE_HEADER_BYTES as usize];
        input.read_exact(&mut file_header)?;
        if &file_header[0..2] != b"BM" {
            return Err(BitmapError::BadSignature);
        }
        let data_offset = le_u32(&file_header[10..14]);

        let mut size_bytes = [0u8; 4];
        input.read_exact(&mut size_bytes)?;
        let info_size = u32::from_le_bytes(size_bytes);
        // BITMAPINFOHEADER and its V4/V5 extensions share the first 40 bytes.
        if !matches!(info_size, 40 | 108 | 124) {
            return Err(BitmapError::UnsupportedHeader(info_size));
        }
        let mut info = [0u8; (INFO_HEADER_BYTES - 4) as usize];
        input.read_exact(&mut info)?;

        let width = le_i32(&info[0..4]);
        let height = le_i32(&info[4..8]);
        let bits_per_pixel = u16::from_le_bytes([info[10], info[11]]);
        let compression = le_u32(&info[12..16]);

        if width <= 0 || height == 0 || width > i32::from(u16::MAX) {
            return Err(BitmapError::BadDimensions { width, height });
        }
        let abs_height = height.unsigned_abs();
        if abs_height > u32::from(u16::MAX) {
            return Err(BitmapError::BadDimensions { width, height });
        }
        if !matches!(bits_per_pixel, 1 | 2 | 4 | 8 | 24) {
            return Err(BitmapError::UnsupportedDepth(bits_per_pixel));
        }
        if compression != 0 {
            return Err(BitmapError::Compressed(compression));
        }

        Ok(Self {
            width: width as u16,
            height: abs_height as u16,
            bits_per_pixel,
            top_down: height < 0,
            data_offset,
        })
    }
}

/// Bytes per stored row, padded to four bytes.
pub fn row_stride(width: u16, bits_per_pixel: u16) -> u32 {
    (u32::from(width) * u32::from(bits_per_pixel)).div_ceil(32) * 4
}

/// Write a top-down grayscale BMP header with a linear gray palette.
///
/// `bits_per_pixel` must be 1, 2, 4 or 8. Pixel rows follow directly.
pub fn write_grayscale_header<W: Write>(
    out: &mut W,
    width: u16,
    height: u16,
    bits_per_pixel: u16,
) -> Result<(), BitmapError> {
    if !matches!(bits_per_pixel, 1 | 2 | 4 | 8) {
        return Err(BitmapError::UnsupportedDepth(bits_per_pixel));
    }
    if width == 0 || height == 0 {
        return Err(BitmapError::BadDimensions {
            width: i32::from(width),
            height: i32::from(height),
        });
    }
    let palette_entries = 1u32 << bits_per_pixel;
    let data_offset = FILE_HEADER_BYTES + INFO_HEADER_BYTES + palette_entries * 4;
    let image_bytes = row_stride(width, bits_per_pixel) * u32::from(height);

    out.write_all(b"BM")?;
    out.write_all(&(data_offset + image_bytes).to_le_bytes())?;
    out.write_all(&[0u8; 4])?;
    out.write_all(&data_offset.to_le_bytes())?;

    out.write_all(&INFO_HEADER_BYTES.to_le_bytes())?;
    out.write_all(&i32::from(width).to_le_bytes())?;
    out.write_all(&(-i32::from(height)).to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?;
    out.write_all(&bits_per_pixel.to_le_bytes())?;
    out.write_all(&0u32.to_le_bytes())?;
    out.write_all(&image_bytes.to_le_bytes())?;
    out.write_all(&2835i32.to_le_bytes())?;
    out.write_all(&2835i32.to_le_bytes())?;
    out.write_all(&palette_entries.to_le_bytes())?;
    out.write_all(&palette_entries.to_le_bytes())?;

    let max = palette_entries - 1;
    for idx in 0..palette_entries {
        let level = (idx * 255 / max) as u8;
        out.write_all(&[level, level, level, 0])?;
    }
    Ok(())
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
