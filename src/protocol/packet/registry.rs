use bytes::{Buf, BufMut};

use crate::protocol::packet::{
    connected::{
        ConnectedPing, ConnectedPong, ConnectionRequest, ConnectionRequestAccepted,
        DisconnectNotification, NewIncomingConnection,
    },
    open_connection::{
        IncompatibleProtocolVersion, OpenConnectionReply1, OpenConnectionReply2,
        OpenConnectionRequest1, OpenConnectionRequest2,
    },
    unconnected::{UnconnectedPing, UnconnectedPingOpenConnections, UnconnectedPong},
    utils::define_raknet_packets,
    DecodeError, Packet,
};

define_raknet_packets! {
    ConnectedPing,
    ConnectedPong,
    UnconnectedPing,
    UnconnectedPingOpenConnections,
    UnconnectedPong,
    OpenConnectionRequest1,
    OpenConnectionReply1,
    OpenConnectionRequest2,
    OpenConnectionReply2,
    ConnectionRequest,
    ConnectionRequestAccepted,
    NewIncomingConnection,
    DisconnectNotification,
    IncompatibleProtocolVersion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::RaknetTime;

    #[test]
    fn decode_dispatches_on_id() {
        let pkt = RaknetPacket::from(ConnectedPing {
            ping_time: RaknetTime(42),
        });
        let bytes = pkt.to_bytes();
        assert_eq!(bytes[0], ConnectedPing::ID);

        let mut slice = bytes.clone();
        match RaknetPacket::decode(&mut slice).unwrap() {
            RaknetPacket::ConnectedPing(ping) => assert_eq!(ping.ping_time.0, 42),
            _ => panic!("decoded wrong variant"),
        }
    }

    #[test]
    fn high_ids_become_user_data() {
        let raw = bytes::Bytes::from_static(&[0xFE, 1, 2, 3]);
        let mut slice = raw.clone();
        match RaknetPacket::decode(&mut slice).unwrap() {
            RaknetPacket::UserData { id, payload } => {
                assert_eq!(id, 0xFE);
                assert_eq!(&payload[..], &[1, 2, 3]);
            }
            _ => panic!("expected user data"),
        }
    }

    #[test]
    fn unknown_low_id_is_an_error() {
        let raw = bytes::Bytes::from_static(&[0x7F]);
        let mut slice = raw.clone();
        assert!(matches!(
            RaknetPacket::decode(&mut slice),
            Err(DecodeError::UnknownId(0x7F))
        ));
    }
}
