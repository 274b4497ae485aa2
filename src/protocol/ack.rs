//! Range-encoded acknowledgement payloads shared by ACK and NAK packets.

use bytes::{Buf, BufMut};

use crate::protocol::packet::{DecodeError, RaknetEncodable};
use crate::protocol::types::Sequence24;

/// Inclusive range of datagram sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    pub start: Sequence24,
    pub end: Sequence24,
}

impl SequenceRange {
    pub fn single(seq: Sequence24) -> Self {
        Self {
            start: seq,
            end: seq,
        }
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Visit every sequence number in the range, oldest first, stopping
    /// after `cap` entries so a hostile range cannot pin the CPU.
    pub fn for_each_capped(&self, cap: u32, mut f: impl FnMut(Sequence24)) {
        let mut seq = self.start;
        let mut visited = 0;
        loop {
            f(seq);
            visited += 1;
            if seq == self.end || visited >= cap {
                break;
            }
            seq = seq.next();
        }
    }
}

/// Body of an ACK or NAK packet: a count-prefixed list of single/range
/// records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckPayload {
    pub ranges: Vec<SequenceRange>,
}

impl AckPayload {
    /// Coalesce raw sequence values into minimal range records.
    ///
    /// Input order does not matter; duplicates collapse. Values that span
    /// the 24-bit boundary end up in two records, which peers accept.
    pub fn from_sequences(mut seqs: Vec<u32>) -> Self {
        seqs.sort_unstable();
        seqs.dedup();

        let mut ranges: Vec<SequenceRange> = Vec::new();
        for raw in seqs {
            let seq = Sequence24::new(raw);
            match ranges.last_mut() {
                Some(last) if last.end.next() == seq => last.end = seq,
                _ => ranges.push(SequenceRange::single(seq)),
            }
        }
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl RaknetEncodable for AckPayload {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        (self.ranges.len().min(u16::MAX as usize) as u16).encode_raknet(dst);
        for range in self.ranges.iter().take(u16::MAX as usize) {
            range.is_single().encode_raknet(dst);
            range.start.encode_raknet(dst);
            if !range.is_single() {
                range.end.encode_raknet(dst);
            }
        }
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let count = u16::decode_raknet(src)?;
        let mut ranges = Vec::with_capacity(count.min(128) as usize);
        for _ in 0..count {
            let single = bool::decode_raknet(src)?;
            let start = Sequence24::decode_raknet(src)?;
            let end = if single {
                start
            } else {
                Sequence24::decode_raknet(src)?
            };
            ranges.push(SequenceRange { start, end });
        }
        Ok(Self { ranges })
    }
}
