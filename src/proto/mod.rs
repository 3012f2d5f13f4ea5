//! The protocol messages.
//!
//! Each protocol in the family shares the same envelope and message shape:
//! a namespaced `<msg/>` container marked `query` or `reply` holding an
//! ordered sequence of PDU elements, with `<report_error/>` standing in
//! for a failed PDU in replies. The per-protocol modules each carry their
//! own closed dispatch table from element name to PDU variant.

use std::io;
use crate::errors::{Error, ErrorCode};
use crate::xml::encode;

pub mod control;
pub mod listres;


//------------ MessageKind ---------------------------------------------------

/// Whether a message is a query or a reply.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    Query,
    Reply,
}

impl MessageKind {
    pub fn from_wire(s: &str) -> Result<Self, Error> {
        match s {
            "query" => Ok(MessageKind::Query),
            "reply" => Ok(MessageKind::Reply),
            _ => Err(Error::malformed("bad message type"))
        }
    }

    pub fn to_wire(self) -> &'static str {
        match self {
            MessageKind::Query => "query",
            MessageKind::Reply => "reply",
        }
    }
}


//------------ ReportError ---------------------------------------------------

/// A `<report_error/>` PDU.
///
/// Substitutes for a thrown error when crossing the wire. The tag is the
/// one from the query PDU that failed, so the caller can correlate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportError {
    tag: Option<String>,
    code: ErrorCode,
    text: Option<String>,
}

impl ReportError {
    pub fn new(
        tag: Option<String>, code: ErrorCode, text: Option<String>
    ) -> Self {
        ReportError { tag, code, text }
    }

    /// Creates a report from a PDU failure, carrying the failed PDU's tag.
    pub fn from_error(error: &Error, tag: Option<&str>) -> Self {
        ReportError {
            tag: tag.map(Into::into),
            code: error.code(),
            text: Some(error.text().into()),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Converts the report back into the error it carries.
    pub fn to_error(&self) -> Error {
        Error::new(self.code, self.text.clone().unwrap_or_default())
    }

    pub(crate) fn write_xml<W: io::Write>(
        &self, content: &mut encode::Content<W>
    ) -> Result<(), io::Error> {
        let element = content.element("report_error")?
            .attr_opt("tag", self.tag.as_ref())?
            .attr("error_code", &self.code)?;
        if let Some(text) = self.text.as_ref() {
            element.content(|inner| inner.text(text))?;
        }
        Ok(())
    }
}
