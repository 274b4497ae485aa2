//! Packets of the unconnected half of the handshake: the MTU probe and the
//! address/GUID exchange that precedes login.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};

use crate::protocol::{
    packet::{decode_checked_magic, DecodeError, Packet, RaknetEncodable},
    types::{EoBPadding, Magic},
};

/// MTU probe. Padded with zeroes so the whole datagram reaches the
/// candidate size; a reply means the path carried it.
pub struct OpenConnectionRequest1 {
    pub magic: Magic,
    pub protocol_version: u8,
    pub padding: EoBPadding,
}

impl Packet for OpenConnectionRequest1 {
    const ID: u8 = 0x05;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.protocol_version.encode_raknet(dst);
        self.padding.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            magic: decode_checked_magic(src)?,
            protocol_version: u8::decode_raknet(src)?,
            padding: EoBPadding::decode_raknet(src)?,
        })
    }
}

pub struct OpenConnectionReply1 {
    pub magic: Magic,
    pub server_guid: u64,
    pub security: bool,
    pub mtu: u16,
}

impl Packet for OpenConnectionReply1 {
    const ID: u8 = 0x06;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
        self.security.encode_raknet(dst);
        self.mtu.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            magic: decode_checked_magic(src)?,
            server_guid: u64::decode_raknet(src)?,
            security: bool::decode_raknet(src)?,
            mtu: u16::decode_raknet(src)?,
        })
    }
}

pub struct OpenConnectionRequest2 {
    pub magic: Magic,
    pub server_addr: SocketAddr,
    pub mtu: u16,
    pub client_guid: u64,
}

impl Packet for OpenConnectionRequest2 {
    const ID: u8 = 0x07;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.server_addr.encode_raknet(dst);
        self.mtu.encode_raknet(dst);
        self.client_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            magic: decode_checked_magic(src)?,
            server_addr: SocketAddr::decode_raknet(src)?,
            mtu: u16::decode_raknet(src)?,
            client_guid: u64::decode_raknet(src)?,
        })
    }
}

pub struct OpenConnectionReply2 {
    pub magic: Magic,
    pub server_guid: u64,
    pub client_addr: SocketAddr,
    pub mtu: u16,
    pub security: bool,
}

impl Packet for OpenConnectionReply2 {
    const ID: u8 = 0x08;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.magic.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
        self.client_addr.encode_raknet(dst);
        self.mtu.encode_raknet(dst);
        self.security.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            magic: decode_checked_magic(src)?,
            server_guid: u64::decode_raknet(src)?,
            client_addr: SocketAddr::decode_raknet(src)?,
            mtu: u16::decode_raknet(src)?,
            security: bool::decode_raknet(src)?,
        })
    }
}

/// Sent by servers that refuse our protocol version.
pub struct IncompatibleProtocolVersion {
    pub protocol: u8,
    pub magic: Magic,
    pub server_guid: u64,
}

impl Packet for IncompatibleProtocolVersion {
    const ID: u8 = 0x19;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.protocol.encode_raknet(dst);
        self.magic.encode_raknet(dst);
        self.server_guid.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            protocol: u8::decode_raknet(src)?,
            magic: decode_checked_magic(src)?,
            server_guid: u64::decode_raknet(src)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::DEFAULT_UNCONNECTED_MAGIC;
    use bytes::BytesMut;

    #[test]
    fn request_one_pads_to_size() {
        let pkt = OpenConnectionRequest1 {
            magic: DEFAULT_UNCONNECTED_MAGIC,
            protocol_version: 11,
            padding: EoBPadding(100),
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        assert_eq!(buf.len(), 16 + 1 + 100);

        let mut slice = buf.freeze();
        let decoded = OpenConnectionRequest1::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.protocol_version, 11);
        assert_eq!(decoded.padding.0, 100);
    }

    #[test]
    fn reply_two_roundtrip() {
        let pkt = OpenConnectionReply2 {
            magic: DEFAULT_UNCONNECTED_MAGIC,
            server_guid: 77,
            client_addr: "10.0.0.2:54321".parse().unwrap(),
            mtu: 1400,
            security: false,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = OpenConnectionReply2::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.server_guid, 77);
        assert_eq!(decoded.client_addr, pkt.client_addr);
        assert_eq!(decoded.mtu, 1400);
    }

    #[test]
    fn request_two_roundtrip() {
        let pkt = OpenConnectionRequest2 {
            magic: DEFAULT_UNCONNECTED_MAGIC,
            server_addr: "10.0.0.1:19132".parse().unwrap(),
            mtu: 1200,
            client_guid: 0xABCD,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = OpenConnectionRequest2::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.server_addr, pkt.server_addr);
        assert_eq!(decoded.mtu, 1200);
        assert_eq!(decoded.client_guid, 0xABCD);
    }
}
