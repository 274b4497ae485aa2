//! Per-session reliability engine.
//!
//! A [`Session`] owns both directions of an established connection: the
//! outbound queue with datagram sequencing, fragmentation and the resend
//! map, and the inbound path with duplicate suppression, NAK bookkeeping,
//! ordered/sequenced channels and split reassembly.
//!
//! The session never touches a socket. Inbound datagrams are fed in via
//! [`Session::handle_datagram`] and friends, outbound wire bytes accumulate
//! internally and are drained with [`Session::take_outgoing`].

mod inbound;
mod outbound;
mod split;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use crate::protocol::{
    constants::{KEEPALIVE_INTERVAL, MAXIMUM_ORDERING_CHANNELS, SESSION_TIMEOUT},
    packet::{ConnectedPing, ConnectionRequestAccepted, RaknetPacket},
    reliability::Reliability,
    types::{RaknetTime, Sequence24},
};
use crate::transport::encapsulated_packet::EncapsulatedPacket;
use split::SplitAssembler;

pub(crate) const CHANNEL_COUNT: usize = MAXIMUM_ORDERING_CHANNELS as usize;

/// Something the engine surfaced to its owner while processing inbound
/// traffic.
#[derive(Debug)]
pub enum SessionEvent {
    /// A user payload, ready for the listener.
    Packet {
        payload: Bytes,
        reliability: Reliability,
        channel: u8,
    },
    /// The server accepted our login request.
    LoginAccepted(Box<ConnectionRequestAccepted>),
    /// The server sent a disconnect notification.
    RemoteDisconnect,
}

pub(crate) struct ResendEntry {
    pub frames: Vec<EncapsulatedPacket>,
    pub sent_at: Instant,
}

pub struct Session {
    peer: SocketAddr,
    remote_guid: u64,
    mtu: usize,
    /// Client start instant; wire timestamps are relative to it.
    epoch: Instant,

    // Send side.
    pub(crate) send_queue: VecDeque<EncapsulatedPacket>,
    pub(crate) next_sequence: Sequence24,
    pub(crate) next_reliable: Sequence24,
    pub(crate) next_split_id: u16,
    pub(crate) order_write: [Sequence24; CHANNEL_COUNT],
    pub(crate) sequence_write: [Sequence24; CHANNEL_COUNT],
    pub(crate) resend: BTreeMap<u32, ResendEntry>,

    // Receive side.
    pub(crate) highest_received: Option<Sequence24>,
    pub(crate) nak_pending: BTreeSet<u32>,
    pub(crate) ack_queue: Vec<u32>,
    pub(crate) nak_queue: Vec<u32>,
    pub(crate) reliable_watermark: Sequence24,
    pub(crate) reliable_seen: BTreeSet<u32>,
    pub(crate) order_read: [Sequence24; CHANNEL_COUNT],
    pub(crate) order_backlog: [BTreeMap<u32, EncapsulatedPacket>; CHANNEL_COUNT],
    pub(crate) sequence_read: [Sequence24; CHANNEL_COUNT],
    pub(crate) splits: SplitAssembler,

    last_receive: Instant,
    last_ping: Instant,
    pub(crate) out: Vec<Bytes>,
    closed: bool,
}

impl Session {
    pub fn new(peer: SocketAddr, remote_guid: u64, mtu: u16, epoch: Instant, now: Instant) -> Self {
        Self {
            peer,
            remote_guid,
            mtu: mtu as usize,
            epoch,
            send_queue: VecDeque::new(),
            next_sequence: Sequence24::ZERO,
            next_reliable: Sequence24::ZERO,
            next_split_id: 0,
            order_write: [Sequence24::ZERO; CHANNEL_COUNT],
            sequence_write: [Sequence24::ZERO; CHANNEL_COUNT],
            resend: BTreeMap::new(),
            highest_received: None,
            nak_pending: BTreeSet::new(),
            ack_queue: Vec::new(),
            nak_queue: Vec::new(),
            reliable_watermark: Sequence24::ZERO,
            reliable_seen: BTreeSet::new(),
            order_read: [Sequence24::ZERO; CHANNEL_COUNT],
            order_backlog: std::array::from_fn(|_| BTreeMap::new()),
            sequence_read: [Sequence24::ZERO; CHANNEL_COUNT],
            splits: SplitAssembler::new(),
            last_receive: now,
            last_ping: now,
            out: Vec::new(),
            closed: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn remote_guid(&self) -> u64 {
        self.remote_guid
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub(crate) fn client_time(&self, now: Instant) -> RaknetTime {
        RaknetTime(now.duration_since(self.epoch).as_millis() as u64)
    }

    /// Run one engine tick: retransmit stale datagrams, emit pending
    /// ACK/NAK payloads, pack and emit queued messages, and send a
    /// keepalive ping if the peer has been quiet.
    ///
    /// Calling this again without new I/O or elapsed time produces
    /// nothing.
    pub fn update(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        if now.duration_since(self.last_receive) >= KEEPALIVE_INTERVAL
            && now.duration_since(self.last_ping) >= KEEPALIVE_INTERVAL
        {
            self.last_ping = now;
            let ping = RaknetPacket::from(ConnectedPing {
                ping_time: self.client_time(now),
            });
            let _ = self.send(Reliability::Unreliable, 0, ping.to_bytes());
        }
        self.flush(now);
    }

    /// The peer has been silent past the session timeout.
    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.duration_since(self.last_receive) >= SESSION_TIMEOUT
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_receive = now;
    }

    /// Flush a best-effort disconnect notification and drop all state.
    /// Calling it again is a no-op.
    pub fn close(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        let _ = self.send(
            Reliability::Unreliable,
            0,
            RaknetPacket::from(crate::protocol::packet::DisconnectNotification).to_bytes(),
        );
        self.flush(now);
        self.closed = true;
        self.send_queue.clear();
        self.resend.clear();
        self.splits.clear();
        self.nak_pending.clear();
        self.ack_queue.clear();
        self.nak_queue.clear();
        for backlog in &mut self.order_backlog {
            backlog.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drain the wire bytes produced since the last call.
    pub fn take_outgoing(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.out)
    }
}
