use thiserror::Error;

/// Errors that may occur while decoding RakNet protocol values or packets.
///
/// This type is kept small and generic so it can be shared by all
/// `RaknetEncodable` implementations and packet bodies. Decode failures are
/// dropped at the receive boundary and never reach the public API.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The buffer did not contain enough bytes to decode the requested value.
    #[error("Unexpected EoF, not enough bytes to read requested type.")]
    UnexpectedEof,

    /// A control packet ID was not recognised by the registry.
    #[error("Unknown Packet, ID: {0}")]
    UnknownId(u8),

    /// An unconnected packet carried a magic other than the fixed cookie.
    #[error("Unconnected packet magic mismatch.")]
    BadMagic,

    /// An address encoding used an unsupported version field.
    #[error(
        "An invalid IpAddress version was encountered:\n\
        Provided: {0}, expected: 4 or 6."
    )]
    InvalidAddrVersion(u8),

    /// A length-prefixed string was not valid UTF-8.
    #[error("A length-prefixed string contained invalid UTF-8.")]
    InvalidString,

    /// A reliability value outside the three flag bits' legal range.
    #[error("An unknown reliability value was provided. Reliability byte: {0}")]
    UnknownReliability(u8),

    /// A split header with a zero or oversized count, or an index past it.
    #[error("Inconsistent split header: id {id}, index {index} of {count}")]
    BadSplit { id: u16, index: u32, count: u32 },
}
