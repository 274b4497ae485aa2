use crate::protocol::{packet::RaknetEncodable, types::U24LE};

const MODULO: u32 = 1 << 24;
const MASK: u32 = MODULO - 1;
const HALF: u32 = MODULO / 2;

/// A 24-bit wrapping sequence number.
///
/// Comparison is wrap-aware: a value just past the 2^24 boundary compares
/// greater than one just before it, so `0xFF_FFFF` followed by `0` reads as
/// a forward step rather than a reordering.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Sequence24(u32);

impl Sequence24 {
    pub const ZERO: Sequence24 = Sequence24(0);

    pub fn new(v: u32) -> Sequence24 {
        Sequence24(v & MASK)
    }

    pub fn value(&self) -> u32 {
        self.0 & MASK
    }

    pub fn next(&self) -> Sequence24 {
        Sequence24::new(self.0.wrapping_add(1))
    }

    /// Forward distance from `self` to `other`, in [0, 2^24).
    pub fn distance_to(&self, other: Sequence24) -> u32 {
        other.value().wrapping_sub(self.value()) & MASK
    }
}

impl Ord for Sequence24 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let d = self.distance_to(*other);
        if d == 0 {
            std::cmp::Ordering::Equal
        } else if d < HALF {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        }
    }
}

impl PartialOrd for Sequence24 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&Sequence24> for U24LE {
    fn from(value: &Sequence24) -> Self {
        U24LE(value.value())
    }
}

impl From<Sequence24> for U24LE {
    fn from(seq: Sequence24) -> Self {
        U24LE(seq.value())
    }
}

impl From<U24LE> for Sequence24 {
    fn from(raw: U24LE) -> Self {
        Sequence24::new(raw.0)
    }
}

impl RaknetEncodable for Sequence24 {
    fn encode_raknet(&self, dst: &mut impl bytes::BufMut) {
        U24LE::from(self).encode_raknet(dst);
    }

    fn decode_raknet(
        src: &mut impl bytes::Buf,
    ) -> Result<Self, crate::protocol::packet::DecodeError> {
        Ok(Sequence24::new(U24LE::decode_raknet(src)?.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_on_next() {
        let max = Sequence24::new(MASK);
        assert_eq!(max.next().value(), 0);
    }

    #[test]
    fn ordering_handles_wrap() {
        let a = Sequence24::new(MASK);
        let b = a.next();
        assert!(b > a);
        assert!(a < b);
    }

    #[test]
    fn ordering_without_wrap() {
        assert!(Sequence24::new(7) > Sequence24::new(3));
        assert!(Sequence24::new(3) < Sequence24::new(7));
        assert_eq!(Sequence24::new(5), Sequence24::new(5));
    }

    #[test]
    fn distance_across_boundary() {
        let a = Sequence24::new(MASK - 1);
        let b = Sequence24::new(2);
        assert_eq!(a.distance_to(b), 4);
    }
}
