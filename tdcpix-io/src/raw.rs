//! Raw binary histogram files.
//!
//! Layout: three 32-bit integers (width, height, bytes per pixel) followed by
//! the pixel payload, all in either native or big-endian byte order.

use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::{Error, Result};

/// Byte order of a raw file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Native,
    BigEndian,
}

/// Header and payload of a raw file; `data` is in native byte order.
#[derive(Clone, Debug)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    /// Number of stacked frames (t-slices for cubes).
    pub zsize: usize,
    pub order: ByteOrder,
    pub data: Vec<u8>,
}

impl RawImage {
    /// Pixels as native `u32` values.
    ///
    /// # Errors
    /// `UnsupportedDepth` unless 4 bytes per pixel.
    pub fn values_u32(&self) -> Result<Vec<u32>> {
        if self.bytes_per_pixel != 4 {
            return Err(Error::UnsupportedDepth(self.bytes_per_pixel * 8));
        }
        Ok(tdcpix_core::pixels::u32_values(&self.data).collect())
    }
}

/// Re-encode native pixels of `bpp` bytes into big-endian order.
fn to_big_endian(payload: &[u8], bpp: usize, out: &mut Vec<u8>) {
    for px in payload.chunks_exact(bpp) {
        if cfg!(target_endian = "little") {
            out.extend(px.iter().rev());
        } else {
            out.extend_from_slice(px);
        }
    }
}

/// Write a raw file from the start of `sink`, truncating what follows.
///
/// # Errors
/// I/O errors from the sink.
pub fn write_raw_to<W: Write + Seek>(
    sink: &mut W,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    payload: &[u8],
    order: ByteOrder,
) -> Result<()> {
    sink.seek(SeekFrom::Start(0))?;
    let mut out = Vec::with_capacity(12 + payload.len());
    for v in [width, height, bytes_per_pixel] {
        match order {
            ByteOrder::Native => out.extend_from_slice(&v.to_ne_bytes()),
            ByteOrder::BigEndian => out.extend_from_slice(&v.to_be_bytes()),
        }
    }
    match order {
        ByteOrder::Native => out.extend_from_slice(payload),
        ByteOrder::BigEndian => to_big_endian(payload, bytes_per_pixel as usize, &mut out),
    }
    sink.write_all(&out)?;
    sink.flush()?;
    Ok(())
}

fn parse_header(bytes: &[u8], order: ByteOrder) -> Option<(u32, u32, u32)> {
    let word = |i: usize| {
        let b = [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        match order {
            ByteOrder::Native => u32::from_ne_bytes(b),
            ByteOrder::BigEndian => u32::from_be_bytes(b),
        }
    };
    let (w, h, bpp) = (word(0), word(4), word(8));
    let payload = bytes.len() - 12;
    let frame = (w as usize)
        .checked_mul(h as usize)?
        .checked_mul(bpp as usize)?;
    let plausible = w > 0
        && h > 0
        && matches!(bpp, 1 | 2 | 4 | 8)
        && payload > 0
        && payload % frame == 0;
    plausible.then_some((w, h, bpp))
}

/// Parse a raw file, detecting the byte order from header plausibility.
///
/// Native order wins when both interpretations are plausible.
///
/// # Errors
/// `InvalidFormat` when neither order yields a consistent header.
pub fn parse_raw(bytes: &[u8]) -> Result<RawImage> {
    if bytes.len() < 12 {
        return Err(Error::InvalidFormat("raw file shorter than header".into()));
    }
    let (order, (width, height, bpp)) = parse_header(bytes, ByteOrder::Native)
        .map(|h| (ByteOrder::Native, h))
        .or_else(|| parse_header(bytes, ByteOrder::BigEndian).map(|h| (ByteOrder::BigEndian, h)))
        .ok_or_else(|| Error::InvalidFormat("inconsistent raw header".into()))?;

    let payload = &bytes[12..];
    let data = match order {
        ByteOrder::Native => payload.to_vec(),
        // swapping back is the same byte reversal
        ByteOrder::BigEndian => {
            let mut out = Vec::with_capacity(payload.len());
            to_big_endian(payload, bpp as usize, &mut out);
            out
        }
    };
    let frame = width as usize * height as usize * bpp as usize;
    Ok(RawImage {
        width,
        height,
        bytes_per_pixel: bpp,
        zsize: payload.len() / frame,
        order,
        data,
    })
}

/// Read a raw file from disk.
///
/// # Errors
/// I/O errors or `InvalidFormat`.
pub fn read_raw<P: AsRef<Path>>(path: P) -> Result<RawImage> {
    let bytes = std::fs::read(path)?;
    parse_raw(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn payload(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn test_big_endian_layout() {
        let mut cur = Cursor::new(Vec::new());
        write_raw_to(&mut cur, 2, 1, 4, &payload(&[1, 0x0102_0304]), ByteOrder::BigEndian).unwrap();
        let bytes = cur.into_inner();
        assert_eq!(&bytes[..12], &[0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 4]);
        assert_eq!(&bytes[12..], &[0, 0, 0, 1, 1, 2, 3, 4]);

        let img = parse_raw(&bytes).unwrap();
        assert_eq!(img.order, ByteOrder::BigEndian);
        assert_eq!(img.values_u32().unwrap(), vec![1, 0x0102_0304]);
    }

    #[test]
    fn test_native_roundtrip_with_frames() {
        let values: Vec<u32> = (0..12).collect();
        let mut cur = Cursor::new(Vec::new());
        write_raw_to(&mut cur, 3, 2, 4, &payload(&values), ByteOrder::Native).unwrap();
        let img = parse_raw(&cur.into_inner()).unwrap();
        assert_eq!(img.order, ByteOrder::Native);
        assert_eq!((img.width, img.height, img.zsize), (3, 2, 2));
        assert_eq!(img.values_u32().unwrap(), values);
    }

    #[test]
    fn test_rewrite_starts_at_beginning() {
        let mut cur = Cursor::new(Vec::new());
        write_raw_to(&mut cur, 1, 1, 4, &payload(&[7]), ByteOrder::Native).unwrap();
        write_raw_to(&mut cur, 1, 1, 4, &payload(&[9]), ByteOrder::Native).unwrap();
        let bytes = cur.into_inner();
        assert_eq!(bytes.len(), 16);
        assert_eq!(parse_raw(&bytes).unwrap().values_u32().unwrap(), vec![9]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_raw(&[1, 2, 3]).is_err());
        assert!(parse_raw(&[0xFF; 20]).is_err());
    }
}
