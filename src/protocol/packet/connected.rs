//! Packets exchanged inside an established session, carried as
//! encapsulated payloads rather than bare datagrams.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};

use crate::protocol::{
    constants,
    packet::{DecodeError, Packet, RaknetEncodable},
    types::RaknetTime,
};

/// Keepalive probe; the peer answers with [`ConnectedPong`].
#[derive(Debug, Clone)]
pub struct ConnectedPing {
    pub ping_time: RaknetTime,
}

impl Packet for ConnectedPing {
    const ID: u8 = 0x00;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConnectedPong {
    pub ping_time: RaknetTime,
    pub pong_time: RaknetTime,
}

impl Packet for ConnectedPong {
    const ID: u8 = 0x03;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.ping_time.encode_raknet(dst);
        self.pong_time.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
            pong_time: RaknetTime::decode_raknet(src)?,
        })
    }
}

/// Login request, sent reliable-ordered once the MTU is negotiated.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub client_guid: u64,
    pub timestamp: RaknetTime,
    pub secure: bool,
}

impl Packet for ConnectionRequest {
    const ID: u8 = 0x09;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.client_guid.encode_raknet(dst);
        self.timestamp.encode_raknet(dst);
        self.secure.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            client_guid: u64::decode_raknet(src)?,
            timestamp: RaknetTime::decode_raknet(src)?,
            secure: bool::decode_raknet(src)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionRequestAccepted {
    pub client_addr: SocketAddr,
    pub system_index: u16,
    pub system_addresses: [SocketAddr; 10],
    pub request_timestamp: RaknetTime,
    pub accepted_timestamp: RaknetTime,
}

impl Packet for ConnectionRequestAccepted {
    const ID: u8 = 0x10;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.client_addr.encode_raknet(dst);
        self.system_index.encode_raknet(dst);
        for address in &self.system_addresses {
            address.encode_raknet(dst);
        }
        self.request_timestamp.encode_raknet(dst);
        self.accepted_timestamp.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let client_addr = SocketAddr::decode_raknet(src)?;
        let system_index = u16::decode_raknet(src)?;

        let mut system_addresses: [SocketAddr; 10] = [SocketAddr::V4(constants::ANY_V4); 10];
        for addr in &mut system_addresses {
            *addr = SocketAddr::decode_raknet(src)?;
        }

        Ok(Self {
            client_addr,
            system_index,
            system_addresses,
            request_timestamp: RaknetTime::decode_raknet(src)?,
            accepted_timestamp: RaknetTime::decode_raknet(src)?,
        })
    }
}

/// Final step of the login exchange, acknowledging the acceptance.
#[derive(Debug, Clone)]
pub struct NewIncomingConnection {
    pub server_address: SocketAddr,
    pub system_addresses: [SocketAddr; 10],
    pub request_timestamp: RaknetTime,
    pub accepted_timestamp: RaknetTime,
}

impl Packet for NewIncomingConnection {
    const ID: u8 = 0x13;

    fn encode_body(&self, dst: &mut impl BufMut) {
        self.server_address.encode_raknet(dst);
        for address in &self.system_addresses {
            address.encode_raknet(dst);
        }
        self.request_timestamp.encode_raknet(dst);
        self.accepted_timestamp.encode_raknet(dst);
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let server_address = SocketAddr::decode_raknet(src)?;

        let mut system_addresses: [SocketAddr; 10] = [SocketAddr::V4(constants::ANY_V4); 10];
        for addr in &mut system_addresses {
            *addr = SocketAddr::decode_raknet(src)?;
        }

        Ok(Self {
            server_address,
            system_addresses,
            request_timestamp: RaknetTime::decode_raknet(src)?,
            accepted_timestamp: RaknetTime::decode_raknet(src)?,
        })
    }
}

/// Best-effort goodbye; carried unreliably, body is empty.
#[derive(Debug, Clone)]
pub struct DisconnectNotification;

impl Packet for DisconnectNotification {
    const ID: u8 = 0x15;

    fn encode_body(&self, _dst: &mut impl BufMut) {}

    fn decode_body(_src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn connection_request_roundtrip() {
        let pkt = ConnectionRequest {
            client_guid: 0xA,
            timestamp: RaknetTime(1234),
            secure: false,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = ConnectionRequest::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.client_guid, 0xA);
        assert_eq!(decoded.timestamp.0, 1234);
        assert!(!decoded.secure);
    }

    #[test]
    fn accepted_roundtrip() {
        let pkt = ConnectionRequestAccepted {
            client_addr: "192.168.0.3:60000".parse().unwrap(),
            system_index: 0,
            system_addresses: [SocketAddr::V4(constants::ANY_V4); 10],
            request_timestamp: RaknetTime(10),
            accepted_timestamp: RaknetTime(20),
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf);
        let mut slice = buf.freeze();
        let decoded = ConnectionRequestAccepted::decode_body(&mut slice).unwrap();
        assert_eq!(decoded.client_addr, pkt.client_addr);
        assert_eq!(decoded.request_timestamp.0, 10);
        assert_eq!(decoded.accepted_timestamp.0, 20);
    }

    #[test]
    fn disconnect_notification_has_empty_body() {
        let mut buf = BytesMut::new();
        DisconnectNotification.encode_body(&mut buf);
        assert!(buf.is_empty());
    }
}
