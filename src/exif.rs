//! Minimal EXIF APP1 segment carrying only the orientation tag.

use bytes::{BufMut, Bytes, BytesMut};

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP1: [u8; 2] = [0xFF, 0xE1];
const ORIENTATION_TAG: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;

/// Build an APP1 segment (marker included) declaring `orientation`.
///
/// Returns `None` unless `orientation` is a valid EXIF orientation (1..=8).
pub fn orientation_header(orientation: u8) -> Option<Bytes> {
    if !(1..=8).contains(&orientation) {
        return None;
    }

    let mut payload = BytesMut::with_capacity(32);
    payload.put_slice(b"Exif\0\0");
    // Big-endian TIFF header, first IFD right after it.
    payload.put_slice(b"MM");
    payload.put_u16(42);
    payload.put_u32(8);
    // IFD0 with a single entry.
    payload.put_u16(1);
    payload.put_u16(ORIENTATION_TAG);
    payload.put_u16(TYPE_SHORT);
    payload.put_u32(1);
    payload.put_u16(orientation as u16);
    payload.put_u16(0);
    // No next IFD.
    payload.put_u32(0);

    let mut segment = BytesMut::with_capacity(payload.len() + 4);
    segment.put_slice(&APP1);
    segment.put_u16((payload.len() + 2) as u16);
    segment.put_slice(&payload);
    Some(segment.freeze())
}

/// Insert `header` right after the JPEG start-of-image marker.
///
/// Data that is not a JPEG is returned untouched.
pub fn splice_after_soi(jpeg: &[u8], header: &[u8]) -> Bytes {
    if !jpeg.starts_with(&SOI) {
        return Bytes::copy_from_slice(jpeg);
    }
    let mut out = BytesMut::with_capacity(jpeg.len() + header.len());
    out.put_slice(&SOI);
    out.put_slice(header);
    out.put_slice(&jpeg[SOI.len()..]);
    out.freeze()
}
