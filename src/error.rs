use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced by the public client API.
///
/// Decode failures are deliberately absent: malformed datagrams are dropped
/// at the receive boundary and never escape it.
#[derive(Error, Debug)]
pub enum RaknetError {
    /// A public entry point was called before a listener was installed.
    #[error("no listener installed, call set_listener() first")]
    NoListener,

    /// The handshake exhausted every MTU ladder step without a reply.
    #[error("server {0} is offline, handshake retries exhausted")]
    ServerOffline(SocketAddr),

    /// The server rejected our protocol version.
    #[error("server speaks RakNet protocol {server_protocol}, client speaks {client_protocol}")]
    ProtocolMismatch {
        server_protocol: u8,
        client_protocol: u8,
    },

    /// The handshake was aborted before completing.
    #[error("connection attempt cancelled: {0}")]
    ConnectionCancelled(String),

    /// `connect` was issued while a handshake or session was already active.
    #[error("client already has an active connection or handshake")]
    AlreadyConnected,

    /// An ordering channel outside the supported range was requested.
    #[error("ordering channel {0} out of range")]
    InvalidChannel(u8),

    /// A payload too large to fit the split-packet limit was submitted.
    #[error("payload of {0} bytes exceeds the split packet limit")]
    PayloadTooLarge(usize),

    /// `send` was called without an established session.
    #[error("not connected to a server")]
    NotConnected,

    /// The client has been closed and its driver task has exited.
    #[error("client is closed")]
    Closed,

    /// An endpoint-level I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
