//! Reassembly of fragmented encapsulated messages.

use std::collections::HashMap;

use bytes::BytesMut;
use tracing::warn;

use crate::protocol::{
    constants::{MAX_CONCURRENT_SPLITS, MAX_SPLITS_PER_MESSAGE},
    packet::DecodeError,
};
use crate::transport::encapsulated_packet::{EncapsulatedHeader, EncapsulatedPacket};

struct SplitAssembly {
    parts: Vec<Option<bytes::Bytes>>,
    received: u32,
}

/// Accumulates split parts keyed by split ID until all slots are filled,
/// then hands back the reassembled message. Bounded in both the number of
/// concurrent assemblies and the parts per assembly.
pub(crate) struct SplitAssembler {
    pending: HashMap<u16, SplitAssembly>,
}

impl SplitAssembler {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Feed one encapsulated message through. Non-split messages pass
    /// straight back; split parts are stored until the last one arrives,
    /// at which point the concatenation is returned carrying the
    /// completing part's reliability metadata.
    pub fn add(
        &mut self,
        enc: EncapsulatedPacket,
    ) -> Result<Option<EncapsulatedPacket>, DecodeError> {
        if !enc.header.is_split {
            return Ok(Some(enc));
        }
        let info = match enc.split {
            Some(info) => info,
            None => return Ok(Some(enc)),
        };

        // The wire decoder validates these, but locally built frames pass
        // through here too.
        if info.count == 0 || info.count > MAX_SPLITS_PER_MESSAGE || info.index >= info.count {
            return Err(DecodeError::BadSplit {
                id: info.id,
                index: info.index,
                count: info.count,
            });
        }

        if !self.pending.contains_key(&info.id) && self.pending.len() >= MAX_CONCURRENT_SPLITS {
            if let Some(&victim) = self.pending.keys().next() {
                warn!(split_id = victim, "discarding stalled split assembly");
                self.pending.remove(&victim);
            }
        }

        let assembly = self.pending.entry(info.id).or_insert_with(|| SplitAssembly {
            parts: vec![None; info.count as usize],
            received: 0,
        });
        if assembly.parts.len() != info.count as usize {
            self.pending.remove(&info.id);
            return Err(DecodeError::BadSplit {
                id: info.id,
                index: info.index,
                count: info.count,
            });
        }

        let slot = &mut assembly.parts[info.index as usize];
        if slot.is_none() {
            assembly.received += 1;
        }
        *slot = Some(enc.payload.clone());

        if assembly.received < info.count {
            return Ok(None);
        }

        let Some(assembly) = self.pending.remove(&info.id) else {
            return Ok(None);
        };
        let mut whole = BytesMut::new();
        for part in assembly.parts {
            if let Some(bytes) = part {
                whole.extend_from_slice(&bytes);
            }
        }

        Ok(Some(EncapsulatedPacket {
            header: EncapsulatedHeader {
                reliability: enc.header.reliability,
                is_split: false,
            },
            reliable_index: enc.reliable_index,
            sequence_index: enc.sequence_index,
            ordering_index: enc.ordering_index,
            ordering_channel: enc.ordering_channel,
            split: None,
            payload: whole.freeze(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reliability::Reliability;
    use crate::transport::encapsulated_packet::SplitInfo;
    use bytes::Bytes;

    fn part(id: u16, index: u32, count: u32, payload: &'static [u8]) -> EncapsulatedPacket {
        EncapsulatedPacket {
            header: EncapsulatedHeader {
                reliability: Reliability::Reliable,
                is_split: true,
            },
            reliable_index: None,
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: Some(SplitInfo { count, id, index }),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn reassembles_out_of_order() {
        let mut asm = SplitAssembler::new();
        assert!(asm.add(part(1, 2, 3, b"c")).unwrap().is_none());
        assert!(asm.add(part(1, 0, 3, b"a")).unwrap().is_none());
        let whole = asm.add(part(1, 1, 3, b"b")).unwrap().unwrap();
        assert_eq!(&whole.payload[..], b"abc");
        assert!(!whole.header.is_split);
    }

    #[test]
    fn duplicate_part_does_not_complete() {
        let mut asm = SplitAssembler::new();
        assert!(asm.add(part(9, 0, 2, b"x")).unwrap().is_none());
        assert!(asm.add(part(9, 0, 2, b"x")).unwrap().is_none());
        let whole = asm.add(part(9, 1, 2, b"y")).unwrap().unwrap();
        assert_eq!(&whole.payload[..], b"xy");
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let mut asm = SplitAssembler::new();
        assert!(asm.add(part(4, 0, 3, b"a")).unwrap().is_none());
        assert!(asm.add(part(4, 1, 2, b"b")).is_err());
    }

    #[test]
    fn concurrent_assemblies_stay_bounded() {
        let mut asm = SplitAssembler::new();
        for id in 0..(MAX_CONCURRENT_SPLITS as u16 + 8) {
            let _ = asm.add(part(id, 0, 2, b"p"));
        }
        assert!(asm.pending.len() <= MAX_CONCURRENT_SPLITS);
    }
}
