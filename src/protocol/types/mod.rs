//! Wire-level value types shared by every packet definition.

mod primitives;
mod sequence;

pub use sequence::Sequence24;

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes};

use crate::protocol::packet::{DecodeError, RaknetEncodable};

pub type Magic = [u8; 16];

/// 24-bit little-endian unsigned integer.
pub struct U24LE(pub u32);

impl RaknetEncodable for U24LE {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        let v = self.0;
        dst.put_u8((v & 0xFF) as u8);
        dst.put_u8(((v >> 8) & 0xFF) as u8);
        dst.put_u8(((v >> 16) & 0xFF) as u8);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < 3 {
            return Err(DecodeError::UnexpectedEof);
        }
        let b0 = src.get_u8() as u32;
        let b1 = src.get_u8() as u32;
        let b2 = src.get_u8() as u32;
        Ok(U24LE(b0 | (b1 << 8) | (b2 << 16)))
    }
}

/// Millisecond timestamp as carried on the wire.
///
/// Clients embed time relative to their own start, so absolute epochs never
/// cross the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaknetTime(pub u64);

impl RaknetEncodable for RaknetTime {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        self.0.encode_raknet(dst);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self(u64::decode_raknet(src)?))
    }
}

impl From<RaknetTime> for Duration {
    fn from(value: RaknetTime) -> Self {
        Duration::from_millis(value.0)
    }
}

/// Opaque identifier bytes advertised in an unconnected pong.
///
/// Encoded as a u16 length prefix plus the raw bytes; a pong with nothing
/// after the magic omits the field entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement(pub Option<Bytes>);

impl RaknetEncodable for Advertisement {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        if let Some(ad_bytes) = &self.0 {
            let len = ad_bytes.len().min(u16::MAX as usize) as u16;
            dst.put_u16(len);
            dst.put_slice(&ad_bytes[..len as usize]);
        }
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let ad = if src.has_remaining() {
            if src.remaining() < 2 {
                return Err(DecodeError::UnexpectedEof);
            }
            let len = src.get_u16() as usize;
            if src.remaining() < len {
                return Err(DecodeError::UnexpectedEof);
            }
            Some(src.copy_to_bytes(len))
        } else {
            None
        };
        Ok(Advertisement(ad))
    }
}

/// End-of-buffer padding: emits `n` zero bytes, consumes whatever remains.
///
/// The MTU probe uses this to inflate OPEN_CONNECTION_REQUEST_1 to the
/// candidate datagram size.
pub struct EoBPadding(pub usize);

impl RaknetEncodable for EoBPadding {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_bytes(0, self.0);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let len = src.remaining();
        src.advance(len);
        Ok(EoBPadding(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn u24le_roundtrip() {
        let mut buf = BytesMut::new();
        U24LE(0x00C0FFEE & 0xFFFFFF).encode_raknet(&mut buf);
        assert_eq!(buf.len(), 3);
        let mut slice = buf.freeze();
        assert_eq!(U24LE::decode_raknet(&mut slice).unwrap().0, 0xC0FFEE);
    }

    #[test]
    fn u24le_is_little_endian() {
        let mut buf = BytesMut::new();
        U24LE(0x010203).encode_raknet(&mut buf);
        assert_eq!(&buf[..], &[0x03, 0x02, 0x01]);
    }

    #[test]
    fn advertisement_roundtrip() {
        let ad = Advertisement(Some(Bytes::from_static(b"MCPE;A server;")));
        let mut buf = BytesMut::new();
        ad.encode_raknet(&mut buf);
        let mut slice = buf.freeze();
        assert_eq!(Advertisement::decode_raknet(&mut slice).unwrap(), ad);
    }

    #[test]
    fn advertisement_absent() {
        let mut slice = Bytes::new();
        assert_eq!(
            Advertisement::decode_raknet(&mut slice).unwrap(),
            Advertisement(None)
        );
    }

    #[test]
    fn padding_consumes_remainder() {
        let mut buf = BytesMut::new();
        EoBPadding(5).encode_raknet(&mut buf);
        assert_eq!(buf.len(), 5);
        let mut slice = buf.freeze();
        assert_eq!(EoBPadding::decode_raknet(&mut slice).unwrap().0, 5);
        assert!(!slice.has_remaining());
    }
}
