use bytes::{Buf, BufMut};

use crate::{
    protocol::{
        constants::{CUSTOM_PACKET_DEFAULT, CUSTOM_PACKET_MAX, CUSTOM_PACKET_MIN},
        packet::{DecodeError, RaknetEncodable},
        types::Sequence24,
    },
    transport::encapsulated_packet::EncapsulatedPacket,
};

/// A custom packet: ID byte, 24-bit sequence number, then one or more
/// encapsulated messages filling the rest of the datagram.
pub struct Datagram {
    pub sequence: Sequence24,
    pub packets: Vec<EncapsulatedPacket>,
}

impl Datagram {
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(CUSTOM_PACKET_DEFAULT);
        self.sequence.encode_raknet(dst);
        for pkt in &self.packets {
            pkt.encode_raknet(dst);
        }
    }

    /// Decode a whole datagram, ID byte included.
    pub fn decode(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let id = u8::decode_raknet(src)?;
        if !(CUSTOM_PACKET_MIN..=CUSTOM_PACKET_MAX).contains(&id) {
            return Err(DecodeError::UnknownId(id));
        }
        let sequence = Sequence24::decode_raknet(src)?;
        let mut packets = Vec::new();
        while src.has_remaining() {
            packets.push(EncapsulatedPacket::decode_raknet(src)?);
        }
        Ok(Self { sequence, packets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reliability::Reliability;
    use crate::transport::encapsulated_packet::EncapsulatedHeader;
    use bytes::{Bytes, BytesMut};

    fn frame(payload: &'static [u8]) -> EncapsulatedPacket {
        EncapsulatedPacket {
            header: EncapsulatedHeader {
                reliability: Reliability::Unreliable,
                is_split: false,
            },
            reliable_index: None,
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: None,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn roundtrip_two_frames() {
        let dgram = Datagram {
            sequence: Sequence24::new(513),
            packets: vec![frame(b"one"), frame(b"two!")],
        };
        let mut buf = BytesMut::new();
        dgram.encode(&mut buf);
        assert_eq!(buf[0], CUSTOM_PACKET_DEFAULT);

        let mut slice = buf.freeze();
        let decoded = Datagram::decode(&mut slice).unwrap();
        assert_eq!(decoded.sequence.value(), 513);
        assert_eq!(decoded.packets.len(), 2);
        assert_eq!(&decoded.packets[1].payload[..], b"two!");
    }

    #[test]
    fn non_custom_id_is_rejected() {
        let mut slice = Bytes::from_static(&[0x1C, 0, 0, 0]);
        assert!(matches!(
            Datagram::decode(&mut slice),
            Err(DecodeError::UnknownId(0x1C))
        ));
    }
}
