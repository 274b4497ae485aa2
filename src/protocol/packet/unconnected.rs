//! Unconnected (offline) RakNet discovery and ping packets.

use bytes::{Buf, BufMut};

use crate::protocol::{
    packet::{decode_checked_magic, DecodeError, Packet, RaknetEncodable},
    types::{Advertisement, Magic, RaknetTime},
};

/// Unconnected ping broadcast by clients to discover RakNet servers.
#[derive(Debug, Clone)]
pub struct UnconnectedPing {
    pub ping_time: RaknetTime,
    pub magic: Magic,
    pub client_guid: u64,
}

impl Packet for UnconnectedPing {
    const ID: u8 = 0x01;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
        self.magic.encode_raknet(dst);
        self.client_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
            magic: decode_checked_magic(src)?,
            client_guid: u64::decode_raknet(src)?,
        })
    }
}

/// Variant of [`UnconnectedPing`] that only servers with free connection
/// slots answer.
#[derive(Debug, Clone)]
pub struct UnconnectedPingOpenConnections {
    pub ping_time: RaknetTime,
    pub magic: Magic,
    pub client_guid: u64,
}

impl Packet for UnconnectedPingOpenConnections {
    const ID: u8 = 0x02;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
        self.magic.encode_raknet(dst);
        self.client_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
            magic: decode_checked_magic(src)?,
            client_guid: u64::decode_raknet(src)?,
        })
    }
}

/// Unconnected pong sent by servers in response to a ping; carries the
/// server's opaque identifier bytes.
#[derive(Debug, Clone)]
pub struct UnconnectedPong {
    pub ping_time: RaknetTime,
    pub server_guid: u64,
    pub magic: Magic,
    pub advertisement: Advertisement,
}

impl Packet for UnconnectedPong {
    const ID: u8 = 0x1C;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
        self.magic.encode_raknet(dst);
        self.advertisement.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
            server_guid: u64::decode_raknet(src)?,
            magic: decode_checked_magic(src)?,
            advertisement: Advertisement::decode_raknet(src)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::DEFAULT_UNCONNECTED_MAGIC;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn unconnected_ping_roundtrip() {
        let pkt = UnconnectedPing {
            ping_time: RaknetTime(123),
            magic: DEFAULT_UNCONNECTED_MAGIC,
            client_guid: 0xDEAD_BEEF,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = UnconnectedPing::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.ping_time, pkt.ping_time);
        assert_eq!(decoded.client_guid, pkt.client_guid);
    }

    #[test]
    fn unconnected_pong_roundtrip() {
        let pkt = UnconnectedPong {
            ping_time: RaknetTime(1),
            server_guid: 2,
            magic: DEFAULT_UNCONNECTED_MAGIC,
            advertisement: Advertisement(Some(Bytes::from_static(b"A"))),
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = UnconnectedPong::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.ping_time, pkt.ping_time);
        assert_eq!(decoded.server_guid, pkt.server_guid);
        assert_eq!(decoded.advertisement, pkt.advertisement);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let pkt = UnconnectedPing {
            ping_time: RaknetTime(5),
            magic: [0xAB; 16],
            client_guid: 1,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        assert!(matches!(
            UnconnectedPing::decode_body(&mut slice),
            Err(DecodeError::BadMagic)
        ));
    }
}
