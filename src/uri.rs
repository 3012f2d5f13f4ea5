//! URIs.

use std::{error, fmt, str};
use std::str::FromStr;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};


//------------ Rsync ---------------------------------------------------------

/// An rsync URI.
///
/// This implements a simplified form of the rsync URI defined in RFC 5781
/// which in turn references RFC 3986. Only absolute URIs including an
/// authority and a module are allowed.
///
/// Parsing only checks for the correct structure and that no forbidden
/// characters are present.
//
//  In particular, forbidden characters are
//
//     SPACE CONTROL " # < > ? [ \\ ] ^ ` { | }
//
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Rsync {
    /// The full URI, scheme included.
    uri: Bytes,

    /// Offset of the first byte after `rsync://<authority>/<module>/`.
    path_start: usize,
}

impl Rsync {
    pub fn from_string(s: String) -> Result<Self, Error> {
        Self::from_bytes(Bytes::from(s))
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        Self::from_bytes(Bytes::copy_from_slice(slice))
    }

    pub fn from_bytes(uri: Bytes) -> Result<Self, Error> {
        if !is_uri_ascii(&uri) {
            return Err(Error::NotAscii)
        }
        const SCHEME: &[u8] = b"rsync://";
        if uri.len() <= SCHEME.len()
            || !uri[..SCHEME.len()].eq_ignore_ascii_case(SCHEME)
        {
            return Err(Error::BadScheme)
        }

        // rsync://authority/module/path -- authority and module must both
        // be present and non-empty.
        let mut parts = uri[SCHEME.len()..].splitn(3, |ch| *ch == b'/');
        let authority = parts.next().ok_or(Error::BadUri)?.len();
        let module = parts.next().ok_or(Error::BadUri)?.len();
        if authority == 0 || module == 0 {
            return Err(Error::BadUri)
        }
        let path_start = SCHEME.len() + authority + 1 + module + 1;
        if path_start > uri.len() {
            return Err(Error::BadUri)
        }
        Ok(Rsync { uri, path_start })
    }

    pub fn as_str(&self) -> &str {
        // Checked to be ASCII during construction.
        unsafe { str::from_utf8_unchecked(self.uri.as_ref()) }
    }

    /// Returns the path portion after the module, without a leading slash.
    pub fn path(&self) -> &str {
        &self.as_str()[self.path_start..]
    }

    /// Returns whether `other` lives within this URI's namespace.
    ///
    /// This is plain prefix containment: a base URI of
    /// `rsync://h/m/alice/` owns everything starting with that string,
    /// including the base itself.
    pub fn contains(&self, other: &Rsync) -> bool {
        other.uri.starts_with(&self.uri)
    }

    /// Returns whether this URI names a directory.
    pub fn is_dir(&self) -> bool {
        self.uri.ends_with(b"/")
    }
}


//--- FromStr, Display, Serialize, Deserialize

impl FromStr for Rsync {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::from_bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl fmt::Display for Rsync {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Rsync {
    fn serialize<S: Serializer>(
        &self, serializer: S
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Rsync {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rsync::from_string(s).map_err(serde::de::Error::custom)
    }
}


//------------ Helper Functions ----------------------------------------------

pub fn is_uri_ascii<S: AsRef<[u8]>>(slice: S) -> bool {
    slice.as_ref().iter().all(|&ch| {
        ch > b' ' && ch != b'"' && ch != b'#' && ch != b'<' && ch != b'>'
            && ch != b'?' && ch != b'[' && ch != b'\\' && ch != b']'
            && ch != b'^' && ch != b'`' && ch != b'{' && ch != b'|'
            && ch != b'}' && ch < 0x7F
    })
}


//------------ Error ---------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    NotAscii,
    BadUri,
    BadScheme,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotAscii => write!(f, "invalid characters"),
            Error::BadUri => write!(f, "bad URI"),
            Error::BadScheme => write!(f, "bad URI scheme"),
        }
    }
}

impl error::Error for Error { }


//------------ Tests ---------------------------------------------------------
