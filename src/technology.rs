//! The closed set of ranging technologies and their on-wire bitmap encoding.

use std::collections::BTreeSet;

use crate::{Error, Result};

/// A physical-layer technology capable of producing distance measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RangingTechnology {
    /// IEEE 802.15.4z ultra-wideband two-way ranging
    Uwb = 0,
    /// Bluetooth Channel Sounding
    Cs = 1,
    /// Wi-Fi 802.11mc/az round-trip time
    Rtt = 2,
    /// BLE RSSI path-loss estimation
    Rssi = 3,
}

impl RangingTechnology {
    /// All technologies, in id order.
    pub const ALL: [RangingTechnology; 4] = [
        RangingTechnology::Uwb,
        RangingTechnology::Cs,
        RangingTechnology::Rtt,
        RangingTechnology::Rssi,
    ];

    /// The technology's position in a bitmap.
    pub fn to_bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Decodes a single-bit mask back into a technology.
    ///
    /// Returns an error unless exactly one known bit is set.
    pub fn from_bit(byte: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tech| tech.to_bit() == byte)
            .ok_or_else(|| Error::malformed(format!("not a technology bit: {byte:#04x}")))
    }
}

impl TryFrom<u8> for RangingTechnology {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RangingTechnology::Uwb),
            1 => Ok(RangingTechnology::Cs),
            2 => Ok(RangingTechnology::Rtt),
            3 => Ok(RangingTechnology::Rssi),
            _ => Err(Error::malformed(format!("unknown technology id {value}"))),
        }
    }
}

impl std::fmt::Display for RangingTechnology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangingTechnology::Uwb => f.write_str("UWB"),
            RangingTechnology::Cs => f.write_str("CS"),
            RangingTechnology::Rtt => f.write_str("RTT"),
            RangingTechnology::Rssi => f.write_str("RSSI"),
        }
    }
}

/// An ordered set of [`RangingTechnology`] values.
///
/// On the wire a set is a big-endian bitmap with bit *i* standing for the
/// technology with id *i*. Bits with no corresponding technology are ignored
/// when reading, so a newer peer can advertise technologies this crate does
/// not know about without breaking the parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TechnologySet(BTreeSet<RangingTechnology>);

impl TechnologySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        TechnologySet(BTreeSet::new())
    }

    /// Decodes a big-endian bitmap of any width ≥ 1.
    pub fn parse_bitmap(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::malformed("technology bitmap must be at least one byte"));
        }
        let mut bits: u64 = 0;
        for &b in bytes {
            bits = (bits << 8) | u64::from(b);
        }
        let set = RangingTechnology::ALL
            .into_iter()
            .filter(|tech| bits & (1 << (*tech as u8)) != 0)
            .collect();
        Ok(TechnologySet(set))
    }

    /// Encodes the set as a big-endian bitmap of `width` bytes.
    pub fn to_bitmap(&self, width: usize) -> Vec<u8> {
        let bits: u64 = self.0.iter().map(|tech| 1u64 << (*tech as u8)).sum();
        (0..width).rev().map(|i| (bits >> (8 * i)) as u8).collect()
    }

    /// Inserts a technology, returning whether it was newly added.
    pub fn insert(&mut self, tech: RangingTechnology) -> bool {
        self.0.insert(tech)
    }

    /// Removes a technology, returning whether it was present.
    pub fn remove(&mut self, tech: RangingTechnology) -> bool {
        self.0.remove(&tech)
    }

    /// Whether the set contains `tech`.
    pub fn contains(&self, tech: RangingTechnology) -> bool {
        self.0.contains(&tech)
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of technologies in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the technologies in id order.
    pub fn iter(&self) -> impl Iterator<Item = RangingTechnology> + '_ {
        self.0.iter().copied()
    }

    /// The technologies present in both sets.
    pub fn intersection(&self, other: &TechnologySet) -> TechnologySet {
        TechnologySet(self.0.intersection(&other.0).copied().collect())
    }
}

impl FromIterator<RangingTechnology> for TechnologySet {
    fn from_iter<I: IntoIterator<Item = RangingTechnology>>(iter: I) -> Self {
        TechnologySet(iter.into_iter().collect())
    }
}

impl std::fmt::Display for TechnologySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        f.write_str("{")?;
        for tech in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{tech}")?;
            first = false;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_round_trip() {
        for tech in RangingTechnology::ALL {
            assert_eq!(RangingTechnology::from_bit(tech.to_bit()).unwrap(), tech);
        }
    }

    #[test]
    fn from_bit_rejects_multi_bit_and_unknown() {
        assert!(RangingTechnology::from_bit(0).is_err());
        assert!(RangingTechnology::from_bit(0b0011).is_err());
        assert!(RangingTechnology::from_bit(0b1_0000).is_err());
    }

    #[test]
    fn bitmap_law_all_subsets() {
        // Exhaustive over all 16 subsets and widths 1, 2, and 4.
        for mask in 0u8..16 {
            let set: TechnologySet = RangingTechnology::ALL
                .into_iter()
                .filter(|t| mask & (1 << (*t as u8)) != 0)
                .collect();
            for width in [1, 2, 4] {
                let bytes = set.to_bitmap(width);
                assert_eq!(bytes.len(), width);
                assert_eq!(TechnologySet::parse_bitmap(&bytes).unwrap(), set);
            }
        }
    }

    #[test]
    fn bitmap_ignores_unknown_bits() {
        let set = TechnologySet::parse_bitmap(&[0xff, 0b1111_0101]).unwrap();
        let expected: TechnologySet = [RangingTechnology::Uwb, RangingTechnology::Rtt].into_iter().collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn bitmap_rejects_empty_buffer() {
        assert!(TechnologySet::parse_bitmap(&[]).is_err());
    }

    #[test]
    fn unknown_id_rejected() {
        assert!(RangingTechnology::try_from(4).is_err());
        assert_eq!(RangingTechnology::try_from(2).unwrap(), RangingTechnology::Rtt);
    }
}
