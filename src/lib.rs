//! Client-side implementation of the RakNet datagram transport.
//!
//! RakNet layers connection-oriented reliability, ordering and fragmentation
//! over plain UDP. This crate implements the client view of that protocol:
//!
//! - the `OPEN_CONNECTION` / `CONNECTION_REQUEST` handshake with its MTU
//!   probe ladder,
//! - a per-session reliability engine (datagram sequencing, ACK/NAK,
//!   ordered and sequenced channels, split-packet reassembly),
//! - passive LAN discovery via broadcast pings.
//!
//! The entry point is [`RaknetClient`]: bind one, install a
//! [`ClientListener`], then `connect` to a server or let the
//! [`discovery::DiscoveryBus`] surface servers on the local network.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rakclient::{ClientConfig, ClientListener, RaknetClient, Reliability};
//!
//! struct Printer;
//! impl ClientListener for Printer {
//!     fn on_packet_receive(&self, payload: bytes::Bytes, _: Reliability, _: u8) {
//!         println!("got {} bytes", payload.len());
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RaknetClient::bind(ClientConfig::default()).await?;
//! client.set_listener(Arc::new(Printer)).await;
//! client.connect("127.0.0.1:19132".parse()?).await?;
//! client.send(Reliability::ReliableOrdered, 0, &b"hello"[..]).await?;
//! # Ok(()) }
//! ```

pub mod discovery;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod session;
pub mod transport;

pub use discovery::{DiscoveredServer, DiscoveryBus, DiscoveryMode};
pub use error::RaknetError;
pub use listener::ClientListener;
pub use protocol::reliability::Reliability;
pub use transport::client::{ClientConfig, RaknetClient};
