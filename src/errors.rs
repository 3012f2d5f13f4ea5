//! The protocol error taxonomy.
//!
//! Every failure a peer can observe maps onto one of a closed set of error
//! codes. Codes travel on the wire as snake_case strings inside
//! `<report_error/>` PDUs; an unknown string maps to [`ErrorCode::Unexpected`]
//! rather than being rejected, so a newer peer can still be diagnosed.

use std::{error, fmt};
use std::str::FromStr;


//------------ ErrorCode -----------------------------------------------------

/// The closed set of protocol error codes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCode {
    /// Structural or schema violation. Rejects the whole message.
    MalformedRequest,

    /// The envelope signature did not verify. Rejects the whole message.
    SignatureInvalid,

    /// The embedded signing time did not advance. Rejects the whole message.
    ReplayDetected,

    /// A message claiming to be a reply was submitted for serving.
    BadQuery,

    /// Natural-key lookup failure for get, set, or destroy. PDU-scoped.
    NotFound,

    /// Natural-key collision on create. PDU-scoped.
    Conflict,

    /// A target URI outside the client's namespace. PDU-scoped.
    ForbiddenUri,

    /// Anything that does not map to a known code.
    Unexpected,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    pub fn to_wire(self) -> &'static str {
        match self {
            ErrorCode::MalformedRequest => "malformed_request",
            ErrorCode::SignatureInvalid => "signature_invalid",
            ErrorCode::ReplayDetected => "replay_detected",
            ErrorCode::BadQuery => "bad_query",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::ForbiddenUri => "forbidden_uri",
            ErrorCode::Unexpected => "unexpected",
        }
    }

    /// Maps a wire code back to a variant.
    ///
    /// Unknown codes become `Unexpected`. This never fails: open-ended
    /// lookup of error classes by name is exactly what we don't do.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "malformed_request" => ErrorCode::MalformedRequest,
            "signature_invalid" => ErrorCode::SignatureInvalid,
            "replay_detected" => ErrorCode::ReplayDetected,
            "bad_query" => ErrorCode::BadQuery,
            "not_found" => ErrorCode::NotFound,
            "conflict" => ErrorCode::Conflict,
            "forbidden_uri" => ErrorCode::ForbiddenUri,
            _ => ErrorCode::Unexpected,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.to_wire())
    }
}

impl FromStr for ErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ErrorCode::from_wire(s))
    }
}


//------------ Error ---------------------------------------------------------

/// A protocol failure: an error code plus human-readable detail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    code: ErrorCode,
    text: String,
}

impl Error {
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Error { code, text: text.into() }
    }

    pub fn malformed(text: impl Into<String>) -> Self {
        Error::new(ErrorCode::MalformedRequest, text)
    }

    pub fn not_found(text: impl Into<String>) -> Self {
        Error::new(ErrorCode::NotFound, text)
    }

    pub fn conflict(text: impl Into<String>) -> Self {
        Error::new(ErrorCode::Conflict, text)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.text.is_empty() {
            self.code.fmt(f)
        }
        else {
            write!(f, "{}: {}", self.code, self.text)
        }
    }
}

impl error::Error for Error { }

impl From<crate::xml::decode::Error> for Error {
    fn from(err: crate::xml::decode::Error) -> Self {
        Error::malformed(err.to_string())
    }
}

impl From<crate::crypto::VerificationError> for Error {
    fn from(err: crate::crypto::VerificationError) -> Self {
        Error::new(ErrorCode::SignatureInvalid, err.to_string())
    }
}


//------------ Tests ---------------------------------------------------------
