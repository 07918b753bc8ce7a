//! Node addresses.
//!
//! A LIBP address is a two-byte opaque identifier (mirrors `rimeaddr_t` from
//! the original Contiki/Rime stack). `Address::NULL` is the sentinel used for
//! "no parent" / "no neighbour".

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 2]);

impl Address {
    /// Sentinel meaning "no address" (parent not yet chosen, etc.).
    pub const NULL: Address = Address([0, 0]);

    pub fn new(hi: u8, lo: u8) -> Self {
        Address([hi, lo])
    }

    pub fn is_null(self) -> bool {
        self == Address::NULL
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0[0], self.0[1])
    }
}

impl From<(u8, u8)> for Address {
    fn from(v: (u8, u8)) -> Self {
        Address([v.0, v.1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_default() {
        assert_eq!(Address::default(), Address::NULL);
        assert!(Address::NULL.is_null());
    }

    #[test]
    fn non_null_address() {
        let a = Address::new(2, 0);
        assert!(!a.is_null());
        assert_eq!(format!("{a}"), "2.0");
    }
}
