use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes};

use crate::protocol::{
    constants::MAX_SPLITS_PER_MESSAGE,
    packet::{DecodeError, RaknetEncodable},
    reliability::Reliability,
    types::Sequence24,
};

bitflags! {
    /// Low bits of the encapsulated flags byte; the high three bits carry
    /// the reliability class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct FrameFlags: u8 {
        const SPLIT = 0b0001_0000;
    }
}

const RELIABILITY_SHIFT: u8 = 5;

/// Flags byte of an encapsulated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapsulatedHeader {
    pub reliability: Reliability,
    pub is_split: bool,
}

impl RaknetEncodable for EncapsulatedHeader {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        let mut byte = self.reliability.id() << RELIABILITY_SHIFT;
        if self.is_split {
            byte |= FrameFlags::SPLIT.bits();
        }
        dst.put_u8(byte);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let byte = u8::decode_raknet(src)?;
        let reliability = Reliability::from_id(byte >> RELIABILITY_SHIFT)?;
        let is_split = FrameFlags::from_bits_truncate(byte).contains(FrameFlags::SPLIT);
        Ok(Self {
            reliability,
            is_split,
        })
    }
}

/// Metadata grouping the parts of one fragmented message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitInfo {
    pub count: u32,
    pub id: u16,
    pub index: u32,
}

/// One unit of application payload plus its reliability metadata, packed
/// (possibly several at a time) inside a custom packet.
#[derive(Debug, Clone)]
pub struct EncapsulatedPacket {
    pub header: EncapsulatedHeader,
    pub reliable_index: Option<Sequence24>,
    pub sequence_index: Option<Sequence24>,
    pub ordering_index: Option<Sequence24>,
    pub ordering_channel: Option<u8>,
    pub split: Option<SplitInfo>,
    pub payload: Bytes,
}

impl EncapsulatedPacket {
    /// Wire size of the metadata preceding the payload for a message of
    /// the given shape.
    pub fn header_len(reliability: Reliability, split: bool) -> usize {
        let mut len = 1 + 2; // flags + bit length
        if reliability.is_reliable() {
            len += 3;
        }
        if reliability.is_sequenced() {
            len += 3;
        }
        if reliability.is_ordered() || reliability.is_sequenced() {
            len += 3 + 1;
        }
        if split {
            len += 4 + 2 + 4;
        }
        len
    }

    /// Total encoded size of this message.
    pub fn encoded_len(&self) -> usize {
        Self::header_len(self.header.reliability, self.header.is_split) + self.payload.len()
    }
}

impl RaknetEncodable for EncapsulatedPacket {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        self.header.encode_raknet(dst);

        // Payload length in bits.
        (((self.payload.len()) as u16) << 3).encode_raknet(dst);

        let rel = self.header.reliability;

        if rel.is_reliable() {
            if let Some(idx) = self.reliable_index {
                idx.encode_raknet(dst);
            }
        }

        if rel.is_sequenced() {
            if let Some(idx) = self.sequence_index {
                idx.encode_raknet(dst);
            }
        }

        if rel.is_ordered() || rel.is_sequenced() {
            if let Some(idx) = self.ordering_index {
                idx.encode_raknet(dst);
                self.ordering_channel.unwrap_or(0).encode_raknet(dst);
            }
        }

        if self.header.is_split {
            if let Some(split) = &self.split {
                split.count.encode_raknet(dst);
                split.id.encode_raknet(dst);
                split.index.encode_raknet(dst);
            }
        }

        dst.put_slice(&self.payload);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let header = EncapsulatedHeader::decode_raknet(src)?;

        let bit_length = u16::decode_raknet(src)?;
        let payload_len = ((bit_length as usize) + 7) >> 3;

        let rel = header.reliability;

        let reliable_index = if rel.is_reliable() {
            Some(Sequence24::decode_raknet(src)?)
        } else {
            None
        };

        let sequence_index = if rel.is_sequenced() {
            Some(Sequence24::decode_raknet(src)?)
        } else {
            None
        };

        let (ordering_index, ordering_channel) = if rel.is_ordered() || rel.is_sequenced() {
            let idx = Sequence24::decode_raknet(src)?;
            let ch = u8::decode_raknet(src)?;
            (Some(idx), Some(ch))
        } else {
            (None, None)
        };

        let split = if header.is_split {
            let count = u32::decode_raknet(src)?;
            let id = u16::decode_raknet(src)?;
            let index = u32::decode_raknet(src)?;
            if count == 0 || count > MAX_SPLITS_PER_MESSAGE || index >= count {
                return Err(DecodeError::BadSplit { id, index, count });
            }
            Some(SplitInfo { count, id, index })
        } else {
            None
        };

        if src.remaining() < payload_len {
            return Err(DecodeError::UnexpectedEof);
        }
        let payload = src.copy_to_bytes(payload_len);

        Ok(EncapsulatedPacket {
            header,
            reliable_index,
            sequence_index,
            ordering_index,
            ordering_channel,
            split,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(pkt: &EncapsulatedPacket) -> EncapsulatedPacket {
        let mut buf = BytesMut::new();
        pkt.encode_raknet(&mut buf);
        assert_eq!(buf.len(), pkt.encoded_len());
        let mut slice = buf.freeze();
        let decoded = EncapsulatedPacket::decode_raknet(&mut slice).unwrap();
        assert!(!slice.has_remaining());
        decoded
    }

    #[test]
    fn unreliable_roundtrip() {
        let pkt = EncapsulatedPacket {
            header: EncapsulatedHeader {
                reliability: Reliability::Unreliable,
                is_split: false,
            },
            reliable_index: None,
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: None,
            payload: Bytes::from_static(b"ping"),
        };
        let decoded = roundtrip(&pkt);
        assert_eq!(decoded.header, pkt.header);
        assert_eq!(decoded.payload, pkt.payload);
    }

    #[test]
    fn reliable_ordered_roundtrip() {
        let pkt = EncapsulatedPacket {
            header: EncapsulatedHeader {
                reliability: Reliability::ReliableOrdered,
                is_split: false,
            },
            reliable_index: Some(Sequence24::new(9)),
            sequence_index: None,
            ordering_index: Some(Sequence24::new(4)),
            ordering_channel: Some(2),
            split: None,
            payload: Bytes::from_static(&[0xFE, 1, 2]),
        };
        let decoded = roundtrip(&pkt);
        assert_eq!(decoded.reliable_index, pkt.reliable_index);
        assert_eq!(decoded.ordering_index, pkt.ordering_index);
        assert_eq!(decoded.ordering_channel, Some(2));
    }

    #[test]
    fn split_roundtrip() {
        let pkt = EncapsulatedPacket {
            header: EncapsulatedHeader {
                reliability: Reliability::Reliable,
                is_split: true,
            },
            reliable_index: Some(Sequence24::new(1)),
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: Some(SplitInfo {
                count: 3,
                id: 7,
                index: 1,
            }),
            payload: Bytes::from_static(b"mid"),
        };
        let decoded = roundtrip(&pkt);
        assert_eq!(decoded.split, pkt.split);
    }

    #[test]
    fn sequenced_carries_both_indices() {
        let pkt = EncapsulatedPacket {
            header: EncapsulatedHeader {
                reliability: Reliability::UnreliableSequenced,
                is_split: false,
            },
            reliable_index: None,
            sequence_index: Some(Sequence24::new(11)),
            ordering_index: Some(Sequence24::new(3)),
            ordering_channel: Some(0),
            split: None,
            payload: Bytes::from_static(b"s"),
        };
        let decoded = roundtrip(&pkt);
        assert_eq!(decoded.sequence_index, pkt.sequence_index);
        assert_eq!(decoded.ordering_index, pkt.ordering_index);
    }

    #[test]
    fn inconsistent_split_header_is_rejected() {
        let pkt = EncapsulatedPacket {
            header: EncapsulatedHeader {
                reliability: Reliability::Reliable,
                is_split: true,
            },
            reliable_index: Some(Sequence24::new(0)),
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: Some(SplitInfo {
                count: 2,
                id: 1,
                index: 5, // past count
            }),
            payload: Bytes::new(),
        };
        let mut buf = BytesMut::new();
        pkt.encode_raknet(&mut buf);
        let mut slice = buf.freeze();
        assert!(matches!(
            EncapsulatedPacket::decode_raknet(&mut slice),
            Err(DecodeError::BadSplit { .. })
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut buf = BytesMut::new();
        EncapsulatedHeader {
            reliability: Reliability::Unreliable,
            is_split: false,
        }
        .encode_raknet(&mut buf);
        (64u16).encode_raknet(&mut buf); // 8 payload bytes promised, none present
        let mut slice = buf.freeze();
        assert!(matches!(
            EncapsulatedPacket::decode_raknet(&mut slice),
            Err(DecodeError::UnexpectedEof)
        ));
    }
}
