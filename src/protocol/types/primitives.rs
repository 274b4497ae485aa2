use std::{
    mem,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
};

use bytes::{Buf, BufMut};

use crate::protocol::packet::{DecodeError, RaknetEncodable};
use crate::protocol::types::Magic;

macro_rules! impl_raknet_int {
    ($ty:ty, $put:ident, $get:ident) => {
        impl RaknetEncodable for $ty {
            fn encode_raknet(&self, dst: &mut impl BufMut) {
                dst.$put(*self as _);
            }

            fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
                let size = mem::size_of::<$ty>();
                if src.remaining() < size {
                    return Err(DecodeError::UnexpectedEof);
                }
                Ok(src.$get() as $ty)
            }
        }
    };
}

// Unsigned big-endian ints:
impl_raknet_int!(u16, put_u16, get_u16);
impl_raknet_int!(u32, put_u32, get_u32);
impl_raknet_int!(u64, put_u64, get_u64);

// Signed big-endian ints:
impl_raknet_int!(i64, put_i64, get_i64);

impl RaknetEncodable for u8 {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_u8(*self);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if !src.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(src.get_u8())
    }
}

impl RaknetEncodable for bool {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_u8(if *self { 1 } else { 0 });
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if !src.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(src.get_u8() == 1)
    }
}

impl RaknetEncodable for Magic {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        dst.put_slice(self);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let size = mem::size_of::<Self>();
        if src.remaining() < size {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut magic = [0u8; 16];
        src.copy_to_slice(&mut magic);
        Ok(magic)
    }
}

/// Strings are length-prefixed 16-bit big-endian UTF-8.
impl RaknetEncodable for String {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        let bytes = self.as_bytes();
        let len = bytes.len().min(u16::MAX as usize);
        dst.put_u16(len as u16);
        dst.put_slice(&bytes[..len]);
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let len = u16::decode_raknet(src)? as usize;
        if src.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let bytes = src.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidString)
    }
}

impl RaknetEncodable for SocketAddr {
    fn encode_raknet(&self, dst: &mut impl BufMut) {
        match self {
            SocketAddr::V4(addr) => {
                dst.put_u8(4);

                // RakNet convention: IPv4 octets are bitwise inverted on the wire.
                let ip_bytes = addr.ip().octets();
                let flipped_ip: [u8; 4] = [!ip_bytes[0], !ip_bytes[1], !ip_bytes[2], !ip_bytes[3]];

                dst.put_slice(&flipped_ip);
                dst.put_u16(addr.port());
            }
            SocketAddr::V6(addr) => {
                dst.put_u8(6);

                // C-style sockaddr_in6 layout.
                dst.put_u16_le(23); // sin6_family (AF_INET6)
                dst.put_u16(addr.port());
                dst.put_u32(addr.flowinfo());
                dst.put_slice(&addr.ip().octets());
                dst.put_u32(addr.scope_id());
            }
        }
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if !src.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let version = src.get_u8();

        match version {
            4 => {
                if src.remaining() < 4 + 2 {
                    return Err(DecodeError::UnexpectedEof);
                }
                let mut ip_bytes = [0u8; 4];
                src.copy_to_slice(&mut ip_bytes);

                let unflipped_ip: [u8; 4] =
                    [!ip_bytes[0], !ip_bytes[1], !ip_bytes[2], !ip_bytes[3]];

                let port = src.get_u16();
                Ok(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(unflipped_ip),
                    port,
                )))
            }
            6 => {
                // family(2) + port(2) + flow(4) + ip(16) + scope(4)
                if src.remaining() < 2 + 2 + 4 + 16 + 4 {
                    return Err(DecodeError::UnexpectedEof);
                }

                let _family = src.get_u16_le();
                let port = src.get_u16();
                let flowinfo = src.get_u32();
                let mut ip_bytes = [0u8; 16];
                src.copy_to_slice(&mut ip_bytes);
                let scope_id = src.get_u32();

                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(ip_bytes),
                    port,
                    flowinfo,
                    scope_id,
                )))
            }
            _ => Err(DecodeError::InvalidAddrVersion(version)),
        }
    }
}
