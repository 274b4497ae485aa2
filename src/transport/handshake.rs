//! Cooperative handshake state machine.
//!
//! `connect` installs a [`Preparation`]; the driver task then walks it
//! through the MTU probe ladder and the address exchange by calling
//! [`Preparation::poll`] on its tick and feeding replies through
//! [`Preparation::handle_packet`]. No phase ever sleeps, so a cancellation
//! or transport error is observed at the next tick boundary.

use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::RaknetError;
use crate::protocol::{
    constants::{
        DEFAULT_UNCONNECTED_MAGIC, HANDSHAKE_RETRY_INTERVAL, IP_HEADER_SIZE, LOGIN_ATTEMPTS,
        MTU_LADDER, RAKNET_PROTOCOL_VERSION, UDP_HEADER_SIZE,
    },
    packet::{OpenConnectionRequest1, OpenConnectionRequest2, RaknetPacket},
    types::EoBPadding,
};

/// ID byte + magic + protocol version, plus the IP/UDP headers the probe
/// must leave room for to reach the candidate MTU on the wire.
const REQUEST_ONE_OVERHEAD: usize = 1 + 16 + 1 + IP_HEADER_SIZE + UDP_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakePhase {
    /// Probing MTU candidates with OPEN_CONNECTION_REQUEST_1.
    RequestOne,
    /// MTU agreed; exchanging GUIDs with OPEN_CONNECTION_REQUEST_2.
    RequestTwo,
    /// Session installed; CONNECTION_REQUEST in flight, awaiting acceptance.
    Login,
    /// Terminal. No further packets are emitted.
    Failed,
}

/// Signal from the state machine to the driver that owns it.
pub(crate) enum HandshakeAdvance {
    /// REPLY_2 arrived: install a session and send the login request.
    Ready { server_guid: u64, mtu: u16 },
}

/// Transient connection state, alive from `connect` entry until the
/// session is promoted or the attempt fails.
pub(crate) struct Preparation {
    pub addr: SocketAddr,
    client_guid: u64,
    phase: HandshakePhase,
    server_guid: u64,
    mtu: u16,
    ladder_index: usize,
    tries_left: u32,
    next_send: Instant,
    login_deadline: Option<Instant>,
    done: Option<oneshot::Sender<Result<(), RaknetError>>>,
}

impl Preparation {
    pub fn new(
        addr: SocketAddr,
        client_guid: u64,
        now: Instant,
        done: oneshot::Sender<Result<(), RaknetError>>,
    ) -> Self {
        let (mtu, tries) = MTU_LADDER[0];
        Self {
            addr,
            client_guid,
            phase: HandshakePhase::RequestOne,
            server_guid: 0,
            mtu,
            ladder_index: 0,
            tries_left: tries,
            next_send: now,
            login_deadline: None,
            done: Some(done),
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub fn is_failed(&self) -> bool {
        self.phase == HandshakePhase::Failed
    }

    /// Advance timers: emit whatever request is due, falling down the MTU
    /// ladder or failing the attempt when retries run out.
    pub fn poll(&mut self, now: Instant) -> Vec<RaknetPacket> {
        match self.phase {
            HandshakePhase::RequestOne => {
                if now < self.next_send {
                    return Vec::new();
                }
                if self.tries_left == 0 {
                    self.ladder_index += 1;
                    match MTU_LADDER.get(self.ladder_index) {
                        Some(&(mtu, tries)) => {
                            debug!(mtu, "falling back to smaller MTU candidate");
                            self.mtu = mtu;
                            self.tries_left = tries;
                        }
                        None => {
                            self.fail(RaknetError::ServerOffline(self.addr));
                            return Vec::new();
                        }
                    }
                }
                self.tries_left -= 1;
                self.next_send = now + HANDSHAKE_RETRY_INTERVAL;

                let padding = (self.mtu as usize).saturating_sub(REQUEST_ONE_OVERHEAD);
                vec![RaknetPacket::from(OpenConnectionRequest1 {
                    magic: DEFAULT_UNCONNECTED_MAGIC,
                    protocol_version: RAKNET_PROTOCOL_VERSION,
                    padding: EoBPadding(padding),
                })]
            }
            HandshakePhase::RequestTwo => {
                if now < self.next_send {
                    return Vec::new();
                }
                if self.tries_left == 0 {
                    self.fail(RaknetError::ServerOffline(self.addr));
                    return Vec::new();
                }
                self.tries_left -= 1;
                self.next_send = now + HANDSHAKE_RETRY_INTERVAL;

                vec![RaknetPacket::from(OpenConnectionRequest2 {
                    magic: DEFAULT_UNCONNECTED_MAGIC,
                    server_addr: self.addr,
                    mtu: self.mtu,
                    client_guid: self.client_guid,
                })]
            }
            HandshakePhase::Login => {
                // The session retransmits CONNECTION_REQUEST; this phase
                // only watches the deadline.
                if let Some(deadline) = self.login_deadline {
                    if now >= deadline {
                        self.fail(RaknetError::ServerOffline(self.addr));
                    }
                }
                Vec::new()
            }
            HandshakePhase::Failed => Vec::new(),
        }
    }

    /// Feed an unconnected reply from the server this preparation targets.
    pub fn handle_packet(&mut self, packet: &RaknetPacket, now: Instant) -> Option<HandshakeAdvance> {
        match packet {
            RaknetPacket::OpenConnectionReply1(reply)
                if self.phase == HandshakePhase::RequestOne =>
            {
                self.server_guid = reply.server_guid;
                self.mtu = reply.mtu.min(self.mtu);
                self.phase = HandshakePhase::RequestTwo;
                self.tries_left = LOGIN_ATTEMPTS;
                self.next_send = now;
                debug!(mtu = self.mtu, guid = self.server_guid, "MTU negotiated");
                None
            }
            RaknetPacket::OpenConnectionReply2(reply)
                if self.phase == HandshakePhase::RequestTwo =>
            {
                self.mtu = reply.mtu.min(self.mtu);
                self.phase = HandshakePhase::Login;
                self.login_deadline =
                    Some(now + HANDSHAKE_RETRY_INTERVAL * LOGIN_ATTEMPTS);
                info!(peer = %self.addr, mtu = self.mtu, "address exchange complete, logging in");
                Some(HandshakeAdvance::Ready {
                    server_guid: self.server_guid,
                    mtu: self.mtu,
                })
            }
            RaknetPacket::IncompatibleProtocolVersion(reply) => {
                self.fail(RaknetError::ProtocolMismatch {
                    server_protocol: reply.protocol,
                    client_protocol: RAKNET_PROTOCOL_VERSION,
                });
                None
            }
            _ => None,
        }
    }

    /// The login packet was accepted; resolve the pending `connect` call.
    pub fn succeed(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Ok(()));
        }
    }

    /// Terminal failure; the pending `connect` call sees `reason`.
    pub fn fail(&mut self, reason: RaknetError) {
        if self.phase != HandshakePhase::Failed {
            debug!(peer = %self.addr, %reason, "handshake failed");
            self.phase = HandshakePhase::Failed;
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(Err(reason));
        }
    }
}
