use std::{
    net::{Ipv4Addr, SocketAddrV4},
    time::Duration,
};

use crate::protocol::types::Magic;

pub const RAKNET_PROTOCOL_VERSION: u8 = 11;

pub const MINIMUM_MTU_SIZE: u16 = 576;
pub const MAXIMUM_MTU_SIZE: u16 = 1492;

/// MTU probe ladder: candidate datagram size and how many
/// OPEN_CONNECTION_REQUEST_1 attempts are spent at it before falling back.
pub const MTU_LADDER: &[(u16, u32)] = &[(MAXIMUM_MTU_SIZE, 4), (1200, 5), (MINIMUM_MTU_SIZE, 5)];

/// Maximum amount of ordering channels per session.
pub const MAXIMUM_ORDERING_CHANNELS: u8 = 32;

/// Inclusive ID range of custom packets (datagrams carrying encapsulated
/// payloads).
pub const CUSTOM_PACKET_MIN: u8 = 0x80;
pub const CUSTOM_PACKET_MAX: u8 = 0x8D;

/// ID stamped on outgoing custom packets.
pub const CUSTOM_PACKET_DEFAULT: u8 = 0x84;

pub const ID_ACK: u8 = 0xC0;
pub const ID_NAK: u8 = 0xA0;

/// Custom packet header: ID byte plus 24-bit sequence number.
pub const DATAGRAM_HEADER_SIZE: usize = 4;

pub const IP_HEADER_SIZE: usize = 20;
pub const UDP_HEADER_SIZE: usize = 8;

/// Spacing between handshake request retries.
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Retries granted to OPEN_CONNECTION_REQUEST_2 and to the login phase.
pub const LOGIN_ATTEMPTS: u32 = 10;

/// Reliable datagrams unacknowledged for this long are retransmitted.
pub const RESEND_INTERVAL: Duration = Duration::from_millis(500);

/// Inbound silence after which a connected ping is sent.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(2500);

/// Inbound silence after which the session is torn down.
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Cadence of the per-client update tick (resends, ACK flushes, keepalive).
pub const SESSION_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Cadence of the discovery worker's broadcast ping.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(1000);

/// Discovered servers silent for this long are forgotten.
pub const SERVER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Inbound sequence gaps wider than this are not tracked for NAK.
pub const NAK_WINDOW: u32 = 2048;

/// Upper bound on the parts of a single split message.
pub const MAX_SPLITS_PER_MESSAGE: u32 = 1024;

/// Upper bound on concurrently reassembling split messages per session.
pub const MAX_CONCURRENT_SPLITS: usize = 64;

/// Magic used to identify unconnected RakNet packets.
pub const DEFAULT_UNCONNECTED_MAGIC: Magic = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

pub const ANY_V4: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

/// Placeholder system addresses carried by the login packets.
pub const LOCAL_IP_ADDRESSES_V4: [SocketAddrV4; 10] = [ANY_V4; 10];
