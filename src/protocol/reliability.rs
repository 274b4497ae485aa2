use crate::protocol::packet::DecodeError;

/// Delivery semantics of an encapsulated message, as encoded in the high
/// three bits of its flags byte.
///
/// The `*WithAckReceipt` variants use the same engine semantics as their
/// base class; the receipt notification itself is a sender-side concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reliability {
    Unreliable = 0,
    UnreliableSequenced = 1,
    Reliable = 2,
    ReliableOrdered = 3,
    ReliableSequenced = 4,
    UnreliableWithAckReceipt = 5,
    ReliableWithAckReceipt = 6,
    ReliableOrderedWithAckReceipt = 7,
}

impl Reliability {
    pub fn from_id(id: u8) -> Result<Self, DecodeError> {
        Ok(match id {
            0 => Reliability::Unreliable,
            1 => Reliability::UnreliableSequenced,
            2 => Reliability::Reliable,
            3 => Reliability::ReliableOrdered,
            4 => Reliability::ReliableSequenced,
            5 => Reliability::UnreliableWithAckReceipt,
            6 => Reliability::ReliableWithAckReceipt,
            7 => Reliability::ReliableOrderedWithAckReceipt,
            other => return Err(DecodeError::UnknownReliability(other)),
        })
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Carries a message index and is retransmitted until acknowledged.
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Reliability::Reliable
                | Reliability::ReliableOrdered
                | Reliability::ReliableSequenced
                | Reliability::ReliableWithAckReceipt
                | Reliability::ReliableOrderedWithAckReceipt
        )
    }

    /// Delivered in strict ordered-index order within its channel.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            Reliability::ReliableOrdered | Reliability::ReliableOrderedWithAckReceipt
        )
    }

    /// Carries a sequencing index; stale messages are dropped, not buffered.
    pub fn is_sequenced(self) -> bool {
        matches!(
            self,
            Reliability::UnreliableSequenced | Reliability::ReliableSequenced
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        for id in 0u8..=7 {
            assert_eq!(Reliability::from_id(id).unwrap().id(), id);
        }
        assert!(Reliability::from_id(8).is_err());
    }

    #[test]
    fn class_predicates() {
        assert!(Reliability::ReliableOrdered.is_reliable());
        assert!(Reliability::ReliableOrdered.is_ordered());
        assert!(!Reliability::ReliableOrdered.is_sequenced());

        assert!(Reliability::UnreliableSequenced.is_sequenced());
        assert!(!Reliability::UnreliableSequenced.is_reliable());

        assert!(Reliability::ReliableSequenced.is_reliable());
        assert!(Reliability::ReliableSequenced.is_sequenced());
        assert!(!Reliability::ReliableSequenced.is_ordered());
    }
}
