use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::RaknetError;
use crate::protocol::reliability::Reliability;

/// Event callbacks invoked by the client driver and the discovery worker.
///
/// All methods have no-op defaults so implementors only override what they
/// care about. Callbacks run inline on the receive path and must not block.
pub trait ClientListener: Send + Sync + 'static {
    /// A server answered a broadcast ping for the first time.
    fn on_server_discovered(&self, _addr: SocketAddr, _identifier: &Bytes) {}

    /// A previously discovered server stopped answering pings.
    fn on_server_forgotten(&self, _addr: SocketAddr) {}

    /// A known server advertised different identifier bytes.
    fn on_server_identifier_update(&self, _addr: SocketAddr, _identifier: &Bytes) {}

    /// The login handshake completed and the session is usable.
    fn on_connect(&self, _addr: SocketAddr) {}

    /// The session ended; `reason` is human-readable ("timeout", ...).
    fn on_disconnect(&self, _addr: SocketAddr, _reason: &str) {}

    /// A user payload arrived on the session.
    fn on_packet_receive(&self, _payload: Bytes, _reliability: Reliability, _channel: u8) {}

    /// The endpoint reported an I/O failure.
    fn on_handler_exception(&self, _addr: Option<SocketAddr>, _error: &RaknetError) {}
}
