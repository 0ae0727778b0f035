//! Length-prefixed framing.
//!
//! Every frame is a 4-byte little-endian body length followed by the body.
//! A one byte body `H` is a heartbeat, an empty body is a no-op, anything
//! else is a BSON document.

use zerocopy::{FromBytes, IntoBytes};

use crate::error::{Error, Result};

use super::types::U32LE;

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest body accepted from the server.
pub const MAX_FRAME_LEN: usize = 512 << 20;

/// Heartbeat body.
pub const HEARTBEAT: u8 = b'H';

/// What a received frame body carries.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// Zero-length body, skipped
    Noop,
    /// Keep-alive; must be answered with a heartbeat frame
    Heartbeat,
    /// A result document
    Document(&'a [u8]),
}

/// Classify a received body. Heartbeats are recognized before any decoding.
pub fn classify(body: &[u8]) -> FrameKind<'_> {
    match body {
        [] => FrameKind::Noop,
        [HEARTBEAT] => FrameKind::Heartbeat,
        document => FrameKind::Document(document),
    }
}

/// Read the body length from a length prefix.
///
/// Lengths above [`MAX_FRAME_LEN`] are rejected before anything is allocated.
#[inline]
pub fn read_length(head: &[u8; LENGTH_PREFIX_LEN]) -> Result<usize> {
    let len = U32LE::ref_from_bytes(&head[..])
        .map_err(|e| Error::Protocol(format!("read_length: {e:?}")))?
        .get();
    match usize::try_from(len) {
        Ok(len) if len <= MAX_FRAME_LEN => Ok(len),
        _ => Err(Error::Protocol(format!("frame too large: {} bytes", len))),
    }
}

/// Append a length-prefixed frame holding `body` to `out`.
pub fn write_frame(out: &mut Vec<u8>, body: &[u8]) -> Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| Error::InvalidUsage(format!("frame too large: {} bytes", body.len())))?;
    out.reserve(LENGTH_PREFIX_LEN + body.len());
    out.extend_from_slice(U32LE::new(len).as_bytes());
    out.extend_from_slice(body);
    Ok(())
}

/// A complete heartbeat frame.
pub fn heartbeat_frame() -> [u8; LENGTH_PREFIX_LEN + 1] {
    [1, 0, 0, 0, HEARTBEAT]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(b""), FrameKind::Noop);
        assert_eq!(classify(b"H"), FrameKind::Heartbeat);
        assert_eq!(classify(b"HH"), FrameKind::Document(b"HH"));
        assert_eq!(classify(&[5, 0, 0, 0, 0]), FrameKind::Document(&[5, 0, 0, 0, 0]));
    }

    #[test]
    fn test_write_frame_prefix_is_little_endian() {
        let mut out = Vec::new();
        write_frame(&mut out, &[0xAA; 258]).unwrap();
        assert_eq!(&out[..4], &[2, 1, 0, 0]);
        assert_eq!(out.len(), 262);
        let head: [u8; 4] = out[..4].try_into().unwrap();
        assert_eq!(read_length(&head).unwrap(), 258);
    }

    #[test]
    fn test_oversized_length_rejected() {
        assert!(matches!(
            read_length(&[0xFF, 0xFF, 0xFF, 0xFF]),
            Err(Error::Protocol(_))
        ));
        let largest = U32LE::new(512 << 20);
        let head: [u8; 4] = largest.as_bytes().try_into().unwrap();
        assert_eq!(read_length(&head).unwrap(), MAX_FRAME_LEN);
    }

    #[test]
    fn test_heartbeat_frame() {
        let frame = heartbeat_frame();
        let head: [u8; 4] = frame[..4].try_into().unwrap();
        assert_eq!(read_length(&head).unwrap(), 1);
        assert_eq!(classify(&frame[4..]), FrameKind::Heartbeat);
    }
}
