//! Frame encoding/decoding for the tunnel wire protocol
//!
//! Frame format:
//! ```text
//! +----------------+----------------------------------+
//! | Length (2B BE) |   Payload (length bytes, masked) |
//! +----------------+----------------------------------+
//! ```
//!
//! Every payload byte is XORed with [`FRAME_MASK`] on the wire; the mask is
//! its own inverse. This is obfuscation, not encryption. A payload length
//! above [`crate::TUNNEL_MTU`] is a framing error; a zero-length frame is
//! the orderly-close sentinel in the adapter-to-transport direction and is
//! skipped in the other (the asymmetry is deliberate).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::TunnelError;
use crate::TUNNEL_MTU;

/// Single-byte XOR mask applied to every payload byte on the wire.
pub const FRAME_MASK: u8 = 0x0e;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Apply the wire mask in place. Applying it twice restores the input.
pub fn mask_in_place(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        *byte ^= FRAME_MASK;
    }
}

/// Encode one packet as a masked, length-prefixed frame.
pub fn encode(packet: &[u8]) -> Result<BytesMut, TunnelError> {
    if packet.len() > TUNNEL_MTU {
        return Err(TunnelError::FrameTooLarge(packet.len(), TUNNEL_MTU));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + packet.len());
    buf.put_u16(packet.len() as u16);
    buf.extend_from_slice(packet);
    mask_in_place(&mut buf[LENGTH_PREFIX_LEN..]);
    Ok(buf)
}

/// Decode one frame from the front of `buf`, unmasking the payload.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
/// the declared length is validated before any payload bytes are required,
/// so an oversized frame fails immediately.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Bytes>, TunnelError> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if len > TUNNEL_MTU {
        return Err(TunnelError::FrameTooLarge(len, TUNNEL_MTU));
    }
    if buf.len() < LENGTH_PREFIX_LEN + len {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_LEN);
    let mut payload = buf.split_to(len);
    mask_in_place(&mut payload);
    Ok(Some(payload.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let packet = b"\x45\x00\x00\x1c raw ip packet bytes";
        let mut wire = encode(packet).unwrap();

        let decoded = decode(&mut wire).unwrap().unwrap();
        assert_eq!(&decoded[..], packet);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_roundtrip_at_bounds() {
        for len in [0usize, TUNNEL_MTU] {
            let packet = vec![0xA5u8; len];
            let mut wire = encode(&packet).unwrap();
            assert_eq!(wire.len(), LENGTH_PREFIX_LEN + len);
            let decoded = decode(&mut wire).unwrap().unwrap();
            assert_eq!(decoded.len(), len);
            assert_eq!(&decoded[..], &packet[..]);
        }
    }

    #[test]
    fn test_mask_is_involution() {
        let mut data: Vec<u8> = (0..=255).collect();
        let original = data.clone();
        mask_in_place(&mut data);
        assert_ne!(data, original);
        mask_in_place(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_payload_is_masked_on_wire() {
        let wire = encode(b"\x00\x00\x00").unwrap();
        assert_eq!(&wire[LENGTH_PREFIX_LEN..], &[FRAME_MASK; 3]);
    }

    #[test]
    fn test_encode_rejects_oversized_packet() {
        let packet = vec![0u8; TUNNEL_MTU + 1];
        assert!(matches!(
            encode(&packet),
            Err(TunnelError::FrameTooLarge(_, TUNNEL_MTU))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut buf = BytesMut::new();
        buf.put_u16((TUNNEL_MTU + 1) as u16);
        assert!(matches!(
            decode(&mut buf),
            Err(TunnelError::FrameTooLarge(_, TUNNEL_MTU))
        ));
    }

    #[test]
    fn test_decode_partial_input() {
        let full = encode(b"abcdef").unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..1]);
        assert!(decode(&mut buf).unwrap().is_none()); // length incomplete

        buf.extend_from_slice(&full[1..4]);
        assert!(decode(&mut buf).unwrap().is_none()); // payload incomplete

        buf.extend_from_slice(&full[4..]);
        let decoded = decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"abcdef");
    }

    #[test]
    fn test_decode_consecutive_frames_in_order() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(b"first").unwrap());
        buf.extend_from_slice(&encode(b"").unwrap());
        buf.extend_from_slice(&encode(b"second").unwrap());

        assert_eq!(&decode(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(decode(&mut buf).unwrap().unwrap().len(), 0);
        assert_eq!(&decode(&mut buf).unwrap().unwrap()[..], b"second");
        assert!(decode(&mut buf).unwrap().is_none());
    }
}
