//! Types for Autonomous System Numbers (ASN) and ASN ranges.

use std::{error, fmt};
use std::str::FromStr;
use serde::{Deserialize, Serialize};


//------------ Asn -----------------------------------------------------------

/// An AS number (ASN).
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize
)]
pub struct Asn(u32);

impl Asn {
    pub const MIN: Asn = Asn(u32::MIN);
    pub const MAX: Asn = Asn(u32::MAX);

    /// Creates an AS number from a `u32`.
    pub fn from_u32(value: u32) -> Self {
        Asn(value)
    }

    /// Converts an AS number into a `u32`.
    pub fn into_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Asn {
    fn from(value: u32) -> Self {
        Asn(value)
    }
}

impl From<Asn> for u32 {
    fn from(asn: Asn) -> Self {
        asn.0
    }
}


//--- FromStr and Display

impl FromStr for Asn {
    type Err = ParseError;

    /// Parses an AS number with or without a case-insensitive `AS` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = if s.len() > 2 && s[..2].eq_ignore_ascii_case("as") {
            &s[2..]
        } else {
            s
        };
        u32::from_str(s).map(Asn).map_err(|_| ParseError)
    }
}

impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


//------------ AsnRange ------------------------------------------------------

/// A closed interval of AS numbers.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize
)]
pub struct AsnRange {
    min: Asn,
    max: Asn,
}

impl AsnRange {
    /// Creates a range from its inclusive bounds.
    ///
    /// Returns an error if the bounds are reversed.
    pub fn new(min: Asn, max: Asn) -> Result<Self, ParseError> {
        if min > max {
            Err(ParseError)
        }
        else {
            Ok(AsnRange { min, max })
        }
    }

    pub fn min(self) -> Asn {
        self.min
    }

    pub fn max(self) -> Asn {
        self.max
    }

    /// Returns whether `other` is fully covered by this range.
    pub fn contains(self, other: AsnRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Parses the comma-separated set notation used on the wire.
    ///
    /// The empty string is the empty set. Elements are single AS numbers
    /// or `lo-hi` ranges.
    pub fn parse_set(s: &str) -> Result<Vec<Self>, ParseError> {
        let mut res = Vec::new();
        for item in s.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue
            }
            res.push(AsnRange::from_str(item)?)
        }
        Ok(res)
    }
}

impl From<Asn> for AsnRange {
    fn from(asn: Asn) -> Self {
        AsnRange { min: asn, max: asn }
    }
}

impl FromStr for AsnRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.find('-') {
            Some(pos) => {
                AsnRange::new(
                    Asn::from_str(&s[..pos])?,
                    Asn::from_str(&s[pos + 1..])?,
                )
            }
            None => Ok(Asn::from_str(s)?.into())
        }
    }
}

impl fmt::Display for AsnRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        }
        else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}


//------------ ParseError ----------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseError;

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid AS number or range")
    }
}

impl error::Error for ParseError { }


//------------ Tests ---------------------------------------------------------
