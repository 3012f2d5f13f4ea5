//! Types for the resources certified to an entity.
//!
//! Resources are closed intervals over AS numbers and over IPv4 and IPv6
//! address space. The resource-listing protocol exchanges them in the
//! textual set notation also used by the original rpki.net tool chain,
//! i.e. comma-separated ranges, single items, and address prefixes.

pub mod addr;
pub mod asn;

pub use self::addr::{Addr, AddrFamily, AddrRange};
pub use self::asn::{Asn, AsnRange};
