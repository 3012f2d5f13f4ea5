//! Types for IP addresses and address ranges.

use std::{error, fmt};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use serde::{Deserialize, Serialize};


//------------ AddrFamily ----------------------------------------------------

/// The address family of an address or range.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize
)]
pub enum AddrFamily {
    Ipv4,
    Ipv6,
}

impl AddrFamily {
    /// The number of bits in an address of this family.
    pub fn bits(self) -> u8 {
        match self {
            AddrFamily::Ipv4 => 32,
            AddrFamily::Ipv6 => 128,
        }
    }

    /// The largest address of this family.
    pub fn max_addr(self) -> Addr {
        match self {
            AddrFamily::Ipv4 => Addr(u128::from(u32::MAX)),
            AddrFamily::Ipv6 => Addr(u128::MAX),
        }
    }
}


//------------ Addr ----------------------------------------------------------

/// An IP address.
///
/// Both IPv4 and IPv6 addresses are kept as a `u128`. An IPv4 address
/// occupies the low 32 bits; the family is carried alongside by whatever
/// type holds the address, it is not encoded in the value itself.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize
)]
pub struct Addr(u128);

impl Addr {
    /// Creates an address from a raw `u128`.
    pub fn from_bits(bits: u128) -> Self {
        Addr(bits)
    }

    /// Returns the raw bits of the address.
    pub fn to_bits(self) -> u128 {
        self.0
    }

    /// Parses an address, returning the detected family as well.
    pub fn parse(s: &str) -> Result<(Self, AddrFamily), ParseError> {
        if let Ok(addr) = Ipv4Addr::from_str(s) {
            return Ok((
                Addr(u128::from(u32::from(addr))), AddrFamily::Ipv4
            ))
        }
        if let Ok(addr) = Ipv6Addr::from_str(s) {
            return Ok((Addr(u128::from(addr)), AddrFamily::Ipv6))
        }
        Err(ParseError)
    }

    /// Formats the address for the given family.
    pub fn display(self, family: AddrFamily) -> AddrDisplay {
        AddrDisplay { addr: self, family }
    }
}

impl From<Ipv4Addr> for Addr {
    fn from(addr: Ipv4Addr) -> Self {
        Addr(u128::from(u32::from(addr)))
    }
}

impl From<Ipv6Addr> for Addr {
    fn from(addr: Ipv6Addr) -> Self {
        Addr(u128::from(addr))
    }
}


//------------ AddrDisplay ---------------------------------------------------

/// Helper for formatting an address under its family.
pub struct AddrDisplay {
    addr: Addr,
    family: AddrFamily,
}

impl fmt::Display for AddrDisplay {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.family {
            AddrFamily::Ipv4 => {
                Ipv4Addr::from(self.addr.0 as u32).fmt(f)
            }
            AddrFamily::Ipv6 => {
                Ipv6Addr::from(self.addr.0).fmt(f)
            }
        }
    }
}


//------------ AddrRange -----------------------------------------------------

/// A closed interval of IP addresses of one family.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize
)]
pub struct AddrRange {
    family: AddrFamily,
    min: Addr,
    max: Addr,
}

impl AddrRange {
    /// Creates a range from its family and inclusive bounds.
    pub fn new(
        family: AddrFamily, min: Addr, max: Addr
    ) -> Result<Self, ParseError> {
        if min > max || max > family.max_addr() {
            Err(ParseError)
        }
        else {
            Ok(AddrRange { family, min, max })
        }
    }

    /// Creates a range covering a prefix.
    pub fn from_prefix(
        family: AddrFamily, addr: Addr, len: u8
    ) -> Result<Self, ParseError> {
        let bits = family.bits();
        if len > bits {
            return Err(ParseError)
        }
        // Host bits must be zero in the prefix address.
        let host_bits = u32::from(bits - len);
        let mask = if host_bits == 128 {
            u128::MAX
        }
        else {
            (1u128 << host_bits) - 1
        };
        if addr.0 & mask != 0 {
            return Err(ParseError)
        }
        AddrRange::new(family, addr, Addr(addr.0 | mask))
    }

    pub fn family(self) -> AddrFamily {
        self.family
    }

    pub fn min(self) -> Addr {
        self.min
    }

    pub fn max(self) -> Addr {
        self.max
    }

    /// Returns whether `other` is fully covered by this range.
    ///
    /// Ranges of different families never contain each other.
    pub fn contains(self, other: AddrRange) -> bool {
        self.family == other.family
            && self.min <= other.min && other.max <= self.max
    }

    /// Parses the comma-separated set notation used on the wire.
    ///
    /// Elements are single addresses, `lo-hi` ranges, or prefixes. All
    /// elements must belong to `family`.
    pub fn parse_set(
        family: AddrFamily, s: &str
    ) -> Result<Vec<Self>, ParseError> {
        let mut res = Vec::new();
        for item in s.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue
            }
            let range = AddrRange::from_str(item)?;
            if range.family != family {
                return Err(ParseError)
            }
            res.push(range)
        }
        Ok(res)
    }
}

impl FromStr for AddrRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(pos) = s.find('/') {
            let (addr, family) = Addr::parse(&s[..pos])?;
            let len = u8::from_str(&s[pos + 1..]).map_err(|_| ParseError)?;
            return AddrRange::from_prefix(family, addr, len)
        }
        if let Some(pos) = s.find('-') {
            let (min, min_family) = Addr::parse(&s[..pos])?;
            let (max, max_family) = Addr::parse(&s[pos + 1..])?;
            if min_family != max_family {
                return Err(ParseError)
            }
            return AddrRange::new(min_family, min, max)
        }
        let (addr, family) = Addr::parse(s)?;
        AddrRange::new(family, addr, addr)
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min.display(self.family))
        }
        else {
            write!(
                f, "{}-{}",
                self.min.display(self.family),
                self.max.display(self.family)
            )
        }
    }
}


//------------ ParseError ----------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseError;

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid IP address or range")
    }
}

impl error::Error for ParseError { }


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_addresses() {
        let range = AddrRange::from_str("10.0.0.1").unwrap();
        assert_eq!(range.family(), AddrFamily::Ipv4);
        assert_eq!(range.min(), range.max());

        let range = AddrRange::from_str("2001:db8::1").unwrap();
        assert_eq!(range.family(), AddrFamily::Ipv6);
    }

    #[test]
    fn parse_ranges() {
        let range = AddrRange::from_str("10.0.0.0-10.0.0.255").unwrap();
        assert_eq!(range.min(), Addr::from(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(range.max(), Addr::from(Ipv4Addr::new(10, 0, 0, 255)));
        assert!(AddrRange::from_str("10.0.0.255-10.0.0.0").is_err());
        assert!(AddrRange::from_str("10.0.0.0-2001:db8::1").is_err());
    }

    #[test]
    fn parse_prefixes() {
        let range = AddrRange::from_str("10.0.0.0/24").unwrap();
        assert_eq!(range, AddrRange::from_str("10.0.0.0-10.0.0.255").unwrap());
        let range = AddrRange::from_str("2001:db8::/32").unwrap();
        assert_eq!(
            range.max(),
            Addr::from(Ipv6Addr::from_str(
                "2001:db8:ffff:ffff:ffff:ffff:ffff:ffff"
            ).unwrap())
        );
        // Host bits set.
        assert!(AddrRange::from_str("10.0.0.1/24").is_err());
        assert!(AddrRange::from_str("10.0.0.0/33").is_err());
    }

    #[test]
    fn parse_set_enforces_family() {
        let set = AddrRange::parse_set(
            AddrFamily::Ipv4, "10.0.0.0/24, 192.0.2.1-192.0.2.16"
        ).unwrap();
        assert_eq!(set.len(), 2);
        assert!(AddrRange::parse_set(
            AddrFamily::Ipv4, "2001:db8::/32"
        ).is_err());
        assert!(AddrRange::parse_set(AddrFamily::Ipv6, "").unwrap().is_empty());
    }

    #[test]
    fn display_round_trip() {
        for s in ["10.0.0.1", "10.0.0.0-10.0.0.255", "2001:db8::1"].iter() {
            assert_eq!(
                AddrRange::from_str(s).unwrap().to_string().as_str(), *s
            );
        }
    }

    #[test]
    fn full_v6_space() {
        let range = AddrRange::from_str("::/0").unwrap();
        assert_eq!(range.min(), Addr::from_bits(0));
        assert_eq!(range.max(), Addr::from_bits(u128::MAX));
    }
}
