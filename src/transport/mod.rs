//! Tokio-based UDP transport layer.
//!
//! This module exposes the client-facing types:
//! - `RaknetClient`, a handle to a driver task owning the UDP socket and
//!   the connection state machine.
//! - the `Datagram` / `EncapsulatedPacket` framing shared with the
//!   session layer.
//!
//! All low-level RakNet details (fragmentation, reliability, ordering,
//! ACK/NAK handling) are delegated to the `session` module; the handshake
//! state machine lives in `handshake`.

pub mod client;
pub mod datagram;
pub mod encapsulated_packet;
pub(crate) mod handshake;
