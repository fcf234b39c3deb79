//! Peer identity types.

use rand::Rng;
use uuid::Uuid;

/// An opaque peer identity.
///
/// Equality and hashing of `RangingDevice` define peer identity throughout
/// the crate: the session's peer map, selector capability maps, and OOB
/// connection routing are all keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RangingDevice(Uuid);

impl RangingDevice {
    /// Wraps an existing UUID.
    pub fn new(uuid: Uuid) -> Self {
        RangingDevice(uuid)
    }

    /// Generates a fresh random identity.
    pub fn random() -> Self {
        RangingDevice(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for RangingDevice {
    fn from(uuid: Uuid) -> Self {
        RangingDevice(uuid)
    }
}

impl std::fmt::Display for RangingDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 2-byte UWB short address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UwbAddress([u8; 2]);

impl UwbAddress {
    /// Creates an address from its big-endian bytes.
    pub fn new(bytes: [u8; 2]) -> Self {
        UwbAddress(bytes)
    }

    /// Draws a random short address from `rng`.
    pub fn random(rng: &mut impl Rng) -> Self {
        UwbAddress(rng.gen())
    }

    /// The address bytes, big-endian.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0
    }
}

impl From<[u8; 2]> for UwbAddress {
    fn from(bytes: [u8; 2]) -> Self {
        UwbAddress(bytes)
    }
}

impl std::fmt::Display for UwbAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}", self.0[0], self.0[1])
    }
}
