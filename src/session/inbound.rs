//! Receive side: datagram sequencing with NAK bookkeeping, reliable
//! duplicate suppression, ordered and sequenced channels, and dispatch of
//! the decoded payloads.

use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::protocol::{
    constants::NAK_WINDOW,
    packet::{
        ConnectedPing, ConnectedPong, ConnectionRequestAccepted, DisconnectNotification, Packet,
        RaknetPacket,
    },
    reliability::Reliability,
    types::Sequence24,
};
use crate::transport::{datagram::Datagram, encapsulated_packet::EncapsulatedPacket};

use super::{Session, SessionEvent, CHANNEL_COUNT};

impl Session {
    /// Process one inbound custom packet and surface whatever it
    /// completes: user payloads, a login acceptance, or a remote
    /// disconnect.
    pub fn handle_datagram(&mut self, dgram: Datagram, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.touch(now);

        let seq = dgram.sequence;
        // Acknowledge everything we see; a duplicate may be ACKed twice.
        self.ack_queue.push(seq.value());

        if !self.record_sequence(seq) {
            trace!(seq = seq.value(), "duplicate datagram dropped");
            return events;
        }

        for enc in dgram.packets {
            self.handle_encapsulated(enc, now, &mut events);
        }
        events
    }

    /// Track the datagram sequence number. Returns whether the contents
    /// should be delivered: `false` means this sequence was already seen.
    fn record_sequence(&mut self, seq: Sequence24) -> bool {
        match self.highest_received {
            None => {
                // Everything before the first datagram we see is missing.
                if seq != Sequence24::ZERO {
                    self.note_gap(Sequence24::ZERO, seq);
                }
                self.highest_received = Some(seq);
                true
            }
            Some(highest) if seq > highest => {
                let expected = highest.next();
                if seq != expected {
                    self.note_gap(expected, seq);
                }
                self.highest_received = Some(seq);
                true
            }
            Some(_) => {
                if self.nak_pending.remove(&seq.value()) {
                    // Late arrival of a sequence we reported missing.
                    self.nak_queue.retain(|&v| v != seq.value());
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Mark `[from, to)` missing, bounded by the NAK window.
    fn note_gap(&mut self, from: Sequence24, to: Sequence24) {
        let mut missing = from;
        let mut tracked = 0;
        while missing != to && tracked < NAK_WINDOW {
            if self.nak_pending.insert(missing.value()) {
                self.nak_queue.push(missing.value());
            }
            missing = missing.next();
            tracked += 1;
        }
        if missing != to {
            warn!(
                from = from.value(),
                to = to.value(),
                "sequence gap exceeds NAK window, remainder untracked"
            );
        }
    }

    fn handle_encapsulated(
        &mut self,
        enc: EncapsulatedPacket,
        now: Instant,
        events: &mut Vec<SessionEvent>,
    ) {
        let enc = match self.splits.add(enc) {
            Ok(Some(whole)) => whole,
            Ok(None) => return, // waiting for more parts
            Err(e) => {
                debug!(error = %e, "split part dropped");
                return;
            }
        };

        let rel = enc.header.reliability;

        if rel.is_reliable() {
            let Some(ridx) = enc.reliable_index else {
                return;
            };
            if !self.accept_reliable_index(ridx) {
                trace!(index = ridx.value(), "duplicate reliable message dropped");
                return;
            }
        }

        if rel.is_sequenced() {
            self.handle_sequenced(enc, now, events);
        } else if rel.is_ordered() {
            self.handle_ordered(enc, now, events);
        } else {
            self.dispatch(enc, now, events);
        }
    }

    /// Reliable message index dedup: a watermark below which everything
    /// has been seen, plus a sparse set for the out-of-order tail.
    fn accept_reliable_index(&mut self, idx: Sequence24) -> bool {
        if idx < self.reliable_watermark {
            return false;
        }
        if !self.reliable_seen.insert(idx.value()) {
            return false;
        }
        while self.reliable_seen.remove(&self.reliable_watermark.value()) {
            self.reliable_watermark = self.reliable_watermark.next();
        }
        true
    }

    fn handle_ordered(
        &mut self,
        enc: EncapsulatedPacket,
        now: Instant,
        events: &mut Vec<SessionEvent>,
    ) {
        let (Some(idx), Some(channel)) = (enc.ordering_index, enc.ordering_channel) else {
            return;
        };
        let ch = channel as usize;
        if ch >= CHANNEL_COUNT {
            debug!(channel, "ordered message on invalid channel dropped");
            return;
        }

        let expected = self.order_read[ch];
        if idx == expected {
            self.dispatch(enc, now, events);
            self.order_read[ch] = expected.next();
            // Drain buffered successors that are now contiguous.
            while let Some(next) = self.order_backlog[ch].remove(&self.order_read[ch].value()) {
                self.dispatch(next, now, events);
                self.order_read[ch] = self.order_read[ch].next();
            }
        } else if idx > expected {
            self.order_backlog[ch].insert(idx.value(), enc);
        } else {
            trace!(
                channel,
                index = idx.value(),
                "duplicate ordered message dropped"
            );
        }
    }

    fn handle_sequenced(
        &mut self,
        enc: EncapsulatedPacket,
        now: Instant,
        events: &mut Vec<SessionEvent>,
    ) {
        let (Some(idx), Some(channel)) = (enc.sequence_index, enc.ordering_channel) else {
            return;
        };
        let ch = channel as usize;
        if ch >= CHANNEL_COUNT {
            debug!(channel, "sequenced message on invalid channel dropped");
            return;
        }

        if idx >= self.sequence_read[ch] {
            self.sequence_read[ch] = idx.next();
            self.dispatch(enc, now, events);
        } else {
            trace!(
                channel,
                index = idx.value(),
                "stale sequenced message dropped"
            );
        }
    }

    /// Route a delivered message: internal control packets are consumed
    /// here, everything else is surfaced as a user payload.
    fn dispatch(&mut self, enc: EncapsulatedPacket, now: Instant, events: &mut Vec<SessionEvent>) {
        if enc.payload.is_empty() {
            return;
        }
        match enc.payload[0] {
            ConnectedPing::ID => {
                let mut body = enc.payload.slice(1..);
                match ConnectedPing::decode_body(&mut body) {
                    Ok(ping) => {
                        let pong = RaknetPacket::from(ConnectedPong {
                            ping_time: ping.ping_time,
                            pong_time: self.client_time(now),
                        });
                        let _ = self.send(Reliability::Unreliable, 0, pong.to_bytes());
                    }
                    Err(e) => debug!(error = %e, "malformed connected ping dropped"),
                }
            }
            ConnectedPong::ID => {
                // Nothing to do beyond the activity clock, already touched.
            }
            ConnectionRequestAccepted::ID => {
                let mut body = enc.payload.slice(1..);
                match ConnectionRequestAccepted::decode_body(&mut body) {
                    Ok(accepted) => events.push(SessionEvent::LoginAccepted(Box::new(accepted))),
                    Err(e) => debug!(error = %e, "malformed connection accept dropped"),
                }
            }
            DisconnectNotification::ID => events.push(SessionEvent::RemoteDisconnect),
            _ => events.push(SessionEvent::Packet {
                payload: enc.payload,
                reliability: enc.header.reliability,
                channel: enc.ordering_channel.unwrap_or(0),
            }),
        }
    }
}
