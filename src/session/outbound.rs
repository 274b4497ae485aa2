//! Send side: message queueing, fragmentation, datagram packing, and the
//! resend map driven by ACK/NAK feedback.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::RaknetError;
use crate::protocol::{
    ack::AckPayload,
    constants::{
        DATAGRAM_HEADER_SIZE, ID_ACK, ID_NAK, MAXIMUM_ORDERING_CHANNELS, MAX_SPLITS_PER_MESSAGE,
        NAK_WINDOW, RESEND_INTERVAL,
    },
    packet::{RaknetEncodable, RaknetPacket},
    reliability::Reliability,
    types::Sequence24,
};
use crate::transport::{
    datagram::Datagram,
    encapsulated_packet::{EncapsulatedHeader, EncapsulatedPacket, SplitInfo},
};

use super::{ResendEntry, Session};

impl Session {
    /// Enqueue a user payload for delivery under the given reliability.
    ///
    /// Payloads too large for one datagram are fragmented into parts that
    /// each fit, sharing a fresh split ID and this message's ordering
    /// metadata. Nothing hits the wire until the next [`Session::update`].
    pub fn send(
        &mut self,
        reliability: Reliability,
        channel: u8,
        payload: Bytes,
    ) -> Result<(), RaknetError> {
        if channel >= MAXIMUM_ORDERING_CHANNELS {
            return Err(RaknetError::InvalidChannel(channel));
        }
        if self.is_closed() {
            return Err(RaknetError::NotConnected);
        }
        let ch = channel as usize;

        let sequence_index = if reliability.is_sequenced() {
            let idx = self.sequence_write[ch];
            self.sequence_write[ch] = idx.next();
            Some(idx)
        } else {
            None
        };

        let (ordering_index, ordering_channel) = if reliability.is_ordered() {
            let idx = self.order_write[ch];
            self.order_write[ch] = idx.next();
            (Some(idx), Some(channel))
        } else if reliability.is_sequenced() {
            // Sequenced messages ride the channel's current ordered position
            // without advancing it.
            (Some(self.order_write[ch]), Some(channel))
        } else {
            (None, None)
        };

        let max_single = self.mtu() - DATAGRAM_HEADER_SIZE
            - EncapsulatedPacket::header_len(reliability, false);
        if payload.len() <= max_single {
            let reliable_index = self.next_reliable_index(reliability);
            self.send_queue.push_back(EncapsulatedPacket {
                header: EncapsulatedHeader {
                    reliability,
                    is_split: false,
                },
                reliable_index,
                sequence_index,
                ordering_index,
                ordering_channel,
                split: None,
                payload,
            });
            return Ok(());
        }

        let part_size =
            self.mtu() - DATAGRAM_HEADER_SIZE - EncapsulatedPacket::header_len(reliability, true);
        let count = payload.len().div_ceil(part_size);
        if count > MAX_SPLITS_PER_MESSAGE as usize {
            return Err(RaknetError::PayloadTooLarge(payload.len()));
        }
        let split_id = self.next_split_id;
        self.next_split_id = self.next_split_id.wrapping_add(1);

        for index in 0..count {
            let start = index * part_size;
            let end = (start + part_size).min(payload.len());
            let reliable_index = self.next_reliable_index(reliability);
            self.send_queue.push_back(EncapsulatedPacket {
                header: EncapsulatedHeader {
                    reliability,
                    is_split: true,
                },
                reliable_index,
                sequence_index,
                ordering_index,
                ordering_channel,
                split: Some(SplitInfo {
                    count: count as u32,
                    id: split_id,
                    index: index as u32,
                }),
                payload: payload.slice(start..end),
            });
        }
        Ok(())
    }

    /// Enqueue an internal control packet (ping, login, disconnect).
    pub fn send_packet(
        &mut self,
        packet: &RaknetPacket,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), RaknetError> {
        self.send(reliability, channel, packet.to_bytes())
    }

    fn next_reliable_index(&mut self, reliability: Reliability) -> Option<Sequence24> {
        if reliability.is_reliable() {
            let idx = self.next_reliable;
            self.next_reliable = idx.next();
            Some(idx)
        } else {
            None
        }
    }

    /// The peer acknowledged these datagram sequence numbers; they no
    /// longer need retransmission. Unknown sequences are ignored.
    pub fn handle_ack(&mut self, payload: AckPayload) {
        for range in payload.ranges {
            range.for_each_capped(NAK_WINDOW, |seq| {
                self.resend.remove(&seq.value());
            });
        }
    }

    /// The peer reported these datagrams missing. Reliable contents go to
    /// the front of the queue for immediate retransmission under a fresh
    /// sequence number; sequences without a resend entry carried only
    /// unreliable traffic and are ignored.
    pub fn handle_nak(&mut self, payload: AckPayload) {
        for range in payload.ranges {
            let mut requeue = Vec::new();
            range.for_each_capped(NAK_WINDOW, |seq| {
                if let Some(entry) = self.resend.remove(&seq.value()) {
                    trace!(seq = seq.value(), "retransmit after NAK");
                    requeue.extend(entry.frames);
                }
            });
            self.requeue_front(requeue);
        }
    }

    fn requeue_front(&mut self, frames: Vec<EncapsulatedPacket>) {
        for frame in frames.into_iter().rev() {
            self.send_queue.push_front(frame);
        }
    }

    /// Move everything due onto the wire: stale resends, pending ACK/NAK
    /// payloads, then queued messages packed into MTU-sized datagrams.
    pub(crate) fn flush(&mut self, now: Instant) {
        let stale: Vec<u32> = self
            .resend
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.sent_at) >= RESEND_INTERVAL)
            .map(|(&seq, _)| seq)
            .collect();
        for seq in stale {
            if let Some(entry) = self.resend.remove(&seq) {
                trace!(seq, "retransmit after resend interval");
                self.requeue_front(entry.frames);
            }
        }

        if !self.ack_queue.is_empty() {
            let payload = AckPayload::from_sequences(std::mem::take(&mut self.ack_queue));
            self.out.push(Self::encode_acknowledge(ID_ACK, &payload));
        }
        if !self.nak_queue.is_empty() {
            let payload = AckPayload::from_sequences(std::mem::take(&mut self.nak_queue));
            self.out.push(Self::encode_acknowledge(ID_NAK, &payload));
        }

        while !self.send_queue.is_empty() {
            let mut frames: Vec<EncapsulatedPacket> = Vec::new();
            let mut size = DATAGRAM_HEADER_SIZE;
            while let Some(frame) = self.send_queue.pop_front() {
                let frame_len = frame.encoded_len();
                if !frames.is_empty() && size + frame_len > self.mtu() {
                    self.send_queue.push_front(frame);
                    break;
                }
                size += frame_len;
                frames.push(frame);
            }

            let sequence = self.next_sequence;
            self.next_sequence = sequence.next();

            let reliable: Vec<EncapsulatedPacket> = frames
                .iter()
                .filter(|f| f.header.reliability.is_reliable())
                .cloned()
                .collect();

            let dgram = Datagram {
                sequence,
                packets: frames,
            };
            let mut buf = BytesMut::with_capacity(self.mtu());
            dgram.encode(&mut buf);
            self.out.push(buf.freeze());

            if !reliable.is_empty() {
                self.resend.insert(
                    sequence.value(),
                    ResendEntry {
                        frames: reliable,
                        sent_at: now,
                    },
                );
            }
        }
    }

    fn encode_acknowledge(id: u8, payload: &AckPayload) -> Bytes {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[id]);
        payload.encode_raknet(&mut buf);
        buf.freeze()
    }
}
