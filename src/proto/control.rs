//! The publication control protocol.
//!
//! This protocol maintains the directory of publication clients: which
//! handle may publish into which URI namespace, with which BPKI trust
//! material. The peer is the back end (the IRBE), not the publication
//! clients themselves.

use std::fmt;
use std::io;
use std::str::FromStr;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use crate::crypto::PublicKey;
use crate::errors::{Error, ErrorCode};
use crate::uri;
use crate::xml;
use crate::xml::encode;
use super::{MessageKind, ReportError};

const VERSION: &str = "1";
const NS: &[u8] = b"http://www.hactrn.net/uris/rpki/publication-control/";
const NS_STR: &str = "http://www.hactrn.net/uris/rpki/publication-control/";

const MSG: &[u8] = b"msg";
const CLIENT: &[u8] = b"client";
const REPORT_ERROR: &[u8] = b"report_error";
const BPKI_CERT: &[u8] = b"bpki_cert";
const BPKI_GLUE: &[u8] = b"bpki_glue";

// Content-type for HTTP(s) exchanges.
pub const CONTENT_TYPE: &str = "application/rpki-publication-control";


//------------ PduKind -------------------------------------------------------

/// The PDU variants of this protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PduKind {
    Client,
    ReportError,
}

/// The closed dispatch table from element name to PDU variant.
///
/// Adding a PDU to the protocol is an entry here plus a variant, not new
/// branching logic in the decode loop.
const PDU_TABLE: &[(&[u8], PduKind)] = &[
    (CLIENT, PduKind::Client),
    (REPORT_ERROR, PduKind::ReportError),
];

fn lookup_pdu(name: &[u8]) -> Result<PduKind, Error> {
    PDU_TABLE.iter().find(|(tag, _)| *tag == name)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| Error::malformed("unknown PDU element"))
}


//------------ Action --------------------------------------------------------

/// The action requested by a `<client/>` PDU.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize
)]
pub enum Action {
    Create,
    Set,
    Get,
    List,
    Destroy,
}

impl Action {
    /// Returns whether this action names a single row.
    ///
    /// Such PDUs must carry a client handle; `list` must not.
    pub fn needs_handle(self) -> bool {
        !matches!(self, Action::List)
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "set" => Ok(Action::Set),
            "get" => Ok(Action::Get),
            "list" => Ok(Action::List),
            "destroy" => Ok(Action::Destroy),
            _ => Err(Error::malformed("unknown action"))
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Set => "set",
            Action::Get => "get",
            Action::List => "list",
            Action::Destroy => "destroy",
        })
    }
}


//------------ Message -------------------------------------------------------

/// A publication control message: an ordered batch of PDUs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    kind: MessageKind,
    pdus: Vec<Pdu>,
}

/// # Construct and Access
///
impl Message {
    pub fn query(pdus: Vec<Pdu>) -> Self {
        Message { kind: MessageKind::Query, pdus }
    }

    /// Creates an empty reply to be filled by the serving loop.
    pub fn reply() -> Self {
        Message { kind: MessageKind::Reply, pdus: Vec::new() }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_query(&self) -> bool {
        self.kind == MessageKind::Query
    }

    pub fn push(&mut self, pdu: Pdu) {
        self.pdus.push(pdu)
    }

    pub fn pdus(&self) -> &[Pdu] {
        &self.pdus
    }

    pub fn into_pdus(self) -> Vec<Pdu> {
        self.pdus
    }

    /// Returns the error carried by the first `<report_error/>` PDU.
    ///
    /// A convenience for callers processing a reply: a clean reply returns
    /// `Ok(())`.
    pub fn check_for_errors(&self) -> Result<(), Error> {
        for pdu in &self.pdus {
            if let Pdu::ReportError(report) = pdu {
                return Err(report.to_error())
            }
        }
        Ok(())
    }
}

/// # Decoding from XML
///
impl Message {
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = xml::decode::Reader::new(bytes);

        let mut kind: Option<MessageKind> = None;

        let mut outer = reader.start(|element| {
            if element.name() != MSG || element.namespace() != Some(NS) {
                return Err(Error::malformed("expected <msg/>"))
            }
            element.attributes(|name, value| match name {
                b"version" => {
                    if value.ascii_into::<String>()? != VERSION {
                        return Err(Error::malformed("unsupported version"))
                    }
                    Ok(())
                }
                b"type" => {
                    kind = Some(
                        MessageKind::from_wire(&value.ascii_into::<String>()?)?
                    );
                    Ok(())
                }
                _ => Err(Error::malformed("unexpected attribute"))
            })
        })?;

        let kind = kind.ok_or_else(
            || Error::malformed("missing message type")
        )?;

        let mut pdus = Vec::new();
        while let Some(pdu) = Pdu::decode_opt(&mut outer, &mut reader)? {
            pdus.push(pdu)
        }

        outer.take_end(&mut reader)?;
        reader.end()?;

        Ok(Message { kind, pdus })
    }
}

/// # Encoding to XML
///
impl Message {
    pub fn write_xml(
        &self, writer: &mut impl io::Write
    ) -> Result<(), io::Error> {
        let mut writer = xml::encode::Writer::new(writer);
        writer.element("msg")?
            .attr("xmlns", NS_STR)?
            .attr("version", VERSION)?
            .attr("type", self.kind.to_wire())?
            .content(|content| {
                for pdu in &self.pdus {
                    pdu.write_xml(content)?
                }
                Ok(())
            })?;
        writer.done()
    }

    pub fn to_xml_bytes(&self) -> Bytes {
        let mut vec = Vec::new();
        self.write_xml(&mut vec).expect("writing to a vec cannot fail");
        Bytes::from(vec)
    }
}


//------------ Pdu -----------------------------------------------------------

/// A single PDU of the publication control protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Pdu {
    Client(ClientPdu),
    ReportError(ReportError),
}

impl Pdu {
    /// Returns the correlation tag of the PDU, if it has one.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Pdu::Client(pdu) => pdu.tag(),
            Pdu::ReportError(report) => report.tag(),
        }
    }

    fn decode_opt<R: io::BufRead>(
        content: &mut xml::decode::Content,
        reader: &mut xml::decode::Reader<R>,
    ) -> Result<Option<Self>, Error> {
        let mut pdu_kind = None;

        // All attributes are treated as optional while scanning the
        // element; which ones are required depends on the PDU kind and
        // action and is checked below.
        let mut action: Option<Action> = None;
        let mut tag: Option<String> = None;
        let mut handle: Option<String> = None;
        let mut base_uri: Option<uri::Rsync> = None;
        let mut clear_replay_protection = false;
        let mut error_code: Option<ErrorCode> = None;

        let pdu_element = content.take_opt_element(reader, |element| {
            pdu_kind = Some(lookup_pdu(element.name())?);
            element.attributes(|name, value| match name {
                b"action" => {
                    action = Some(value.ascii_into()?);
                    Ok(())
                }
                b"tag" => {
                    tag = Some(value.ascii_into()?);
                    Ok(())
                }
                b"client_handle" => {
                    handle = Some(value.ascii_into()?);
                    Ok(())
                }
                b"base_uri" => {
                    base_uri = Some(value.ascii_into()?);
                    Ok(())
                }
                b"clear_replay_protection" => {
                    clear_replay_protection =
                        value.ascii_into::<String>()? == "yes";
                    Ok(())
                }
                b"error_code" => {
                    error_code = Some(value.ascii_into()?);
                    Ok(())
                }
                _ => Err(Error::malformed("unexpected attribute"))
            })
        })?;

        let mut pdu_element = match pdu_element {
            Some(element) => element,
            None => return Ok(None)
        };
        let pdu_kind = pdu_kind.expect("element without kind");

        let pdu = match pdu_kind {
            PduKind::Client => {
                let action = action.ok_or_else(
                    || Error::malformed("<client/> without action")
                )?;
                if action.needs_handle() && handle.is_none() {
                    return Err(Error::malformed(
                        "action requires a client_handle"
                    ))
                }
                let (bpki_cert, bpki_glue) = ClientPdu::decode_trust(
                    &mut pdu_element, reader
                )?;
                Pdu::Client(ClientPdu {
                    action,
                    tag,
                    handle,
                    base_uri,
                    bpki_cert,
                    bpki_glue,
                    clear_replay_protection,
                })
            }
            PduKind::ReportError => {
                let code = error_code.ok_or_else(
                    || Error::malformed("<report_error/> without code")
                )?;
                let text = ReportErrorText::decode_opt(
                    &mut pdu_element, reader
                )?;
                Pdu::ReportError(ReportError::new(tag, code, text))
            }
        };

        pdu_element.take_end(reader)?;
        Ok(Some(pdu))
    }

    fn write_xml<W: io::Write>(
        &self, content: &mut encode::Content<W>
    ) -> Result<(), io::Error> {
        match self {
            Pdu::Client(pdu) => pdu.write_xml(content),
            Pdu::ReportError(report) => report.write_xml(content),
        }
    }
}


//------------ ClientPdu -----------------------------------------------------

/// A `<client/>` PDU.
///
/// Carries one client row, or the natural key naming one, depending on
/// the action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientPdu {
    action: Action,
    tag: Option<String>,
    handle: Option<String>,
    base_uri: Option<uri::Rsync>,
    bpki_cert: Option<PublicKey>,
    bpki_glue: Option<PublicKey>,
    clear_replay_protection: bool,
}

/// # Construct
///
impl ClientPdu {
    /// Creates a `create` PDU for a new client.
    pub fn create(
        handle: impl Into<String>,
        base_uri: uri::Rsync,
        bpki_cert: PublicKey,
    ) -> Self {
        ClientPdu {
            action: Action::Create,
            tag: None,
            handle: Some(handle.into()),
            base_uri: Some(base_uri),
            bpki_cert: Some(bpki_cert),
            bpki_glue: None,
            clear_replay_protection: false,
        }
    }

    /// Creates a `set` PDU updating only the fields given via `with_*`.
    pub fn set(handle: impl Into<String>) -> Self {
        ClientPdu {
            action: Action::Set,
            tag: None,
            handle: Some(handle.into()),
            base_uri: None,
            bpki_cert: None,
            bpki_glue: None,
            clear_replay_protection: false,
        }
    }

    pub fn get(handle: impl Into<String>) -> Self {
        ClientPdu {
            action: Action::Get,
            tag: None,
            handle: Some(handle.into()),
            base_uri: None,
            bpki_cert: None,
            bpki_glue: None,
            clear_replay_protection: false,
        }
    }

    pub fn list() -> Self {
        ClientPdu {
            action: Action::List,
            tag: None,
            handle: None,
            base_uri: None,
            bpki_cert: None,
            bpki_glue: None,
            clear_replay_protection: false,
        }
    }

    pub fn destroy(handle: impl Into<String>) -> Self {
        ClientPdu {
            action: Action::Destroy,
            tag: None,
            handle: Some(handle.into()),
            base_uri: None,
            bpki_cert: None,
            bpki_glue: None,
            clear_replay_protection: false,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_base_uri(mut self, base_uri: uri::Rsync) -> Self {
        self.base_uri = Some(base_uri);
        self
    }

    pub fn with_bpki_cert(mut self, bpki_cert: PublicKey) -> Self {
        self.bpki_cert = Some(bpki_cert);
        self
    }

    pub fn with_bpki_glue(mut self, bpki_glue: PublicKey) -> Self {
        self.bpki_glue = Some(bpki_glue);
        self
    }

    pub fn with_clear_replay_protection(mut self) -> Self {
        self.clear_replay_protection = true;
        self
    }
}

/// # Data Access
///
impl ClientPdu {
    pub fn action(&self) -> Action {
        self.action
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn base_uri(&self) -> Option<&uri::Rsync> {
        self.base_uri.as_ref()
    }

    pub fn bpki_cert(&self) -> Option<&PublicKey> {
        self.bpki_cert.as_ref()
    }

    pub fn bpki_glue(&self) -> Option<&PublicKey> {
        self.bpki_glue.as_ref()
    }

    pub fn clear_replay_protection(&self) -> bool {
        self.clear_replay_protection
    }
}

/// # XML support
///
impl ClientPdu {
    // Decodes the optional <bpki_cert/> and <bpki_glue/> child elements.
    fn decode_trust<R: io::BufRead>(
        content: &mut xml::decode::Content,
        reader: &mut xml::decode::Reader<R>,
    ) -> Result<(Option<PublicKey>, Option<PublicKey>), Error> {
        let mut bpki_cert = None;
        let mut bpki_glue = None;
        loop {
            let mut is_glue = false;
            let element = content.take_opt_element(reader, |element| {
                match element.name() {
                    BPKI_CERT => Ok(()),
                    BPKI_GLUE => {
                        is_glue = true;
                        Ok(())
                    }
                    _ => Err(Error::malformed("unexpected element"))
                }
            })?;
            let mut element = match element {
                Some(element) => element,
                None => break,
            };
            let bits = element.take_text(reader, |text| {
                text.base64_decode()
            })?;
            let key = PublicKey::from_bits(bits);
            if is_glue {
                bpki_glue = Some(key)
            }
            else {
                bpki_cert = Some(key)
            }
            element.take_end(reader)?;
        }
        Ok((bpki_cert, bpki_glue))
    }

    fn write_xml<W: io::Write>(
        &self, content: &mut encode::Content<W>
    ) -> Result<(), io::Error> {
        let mut element = content.element("client")?
            .attr("action", &self.action)?
            .attr_opt("tag", self.tag.as_ref())?
            .attr_opt("client_handle", self.handle.as_ref())?
            .attr_opt("base_uri", self.base_uri.as_ref())?;
        if self.clear_replay_protection {
            element = element.attr("clear_replay_protection", "yes")?;
        }
        if self.bpki_cert.is_some() || self.bpki_glue.is_some() {
            element.content(|inner| {
                if let Some(cert) = self.bpki_cert.as_ref() {
                    inner.element("bpki_cert")?
                        .content(|text| text.raw(&cert.to_base64()))?;
                }
                if let Some(glue) = self.bpki_glue.as_ref() {
                    inner.element("bpki_glue")?
                        .content(|text| text.raw(&glue.to_base64()))?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }
}


//------------ ReportErrorText -----------------------------------------------

// Decoding helper for the text content of <report_error/>.
struct ReportErrorText;

impl ReportErrorText {
    fn decode_opt<R: io::BufRead>(
        content: &mut xml::decode::Content,
        reader: &mut xml::decode::Reader<R>,
    ) -> Result<Option<String>, Error> {
        Ok(content.take_opt_text(reader, |text| {
            text.to_ascii().map(|s| s.to_string())
        })?)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn uri(s: &str) -> uri::Rsync {
        uri::Rsync::from_str(s).unwrap()
    }

    #[test]
    fn decode_create_query() {
        let xml = include_bytes!(
            "../../test-data/control/create-client.xml"
        );
        let msg = Message::decode(xml.as_ref()).unwrap();
        assert!(msg.is_query());
        assert_eq!(msg.pdus().len(), 1);
        match &msg.pdus()[0] {
            Pdu::Client(pdu) => {
                assert_eq!(pdu.action(), Action::Create);
                assert_eq!(pdu.tag(), Some("create-alice"));
                assert_eq!(pdu.handle(), Some("alice"));
                assert_eq!(
                    pdu.base_uri(),
                    Some(&uri("rsync://repo.example.net/repo/alice/"))
                );
                assert!(pdu.bpki_cert().is_some());
                assert!(pdu.bpki_glue().is_none());
            }
            _ => panic!("expected client PDU")
        }
    }

    #[test]
    fn decode_batch_query() {
        let xml = include_bytes!(
            "../../test-data/control/batch-query.xml"
        );
        let msg = Message::decode(xml.as_ref()).unwrap();
        assert_eq!(msg.pdus().len(), 3);
    }

    #[test]
    fn decode_error_reply() {
        let xml = include_bytes!(
            "../../test-data/control/error-reply.xml"
        );
        let msg = Message::decode(xml.as_ref()).unwrap();
        assert!(!msg.is_query());
        let err = msg.check_for_errors().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut msg = Message::query(Vec::new());
        msg.push(Pdu::Client(
            ClientPdu::create(
                "alice",
                uri("rsync://repo.example.net/repo/alice/"),
                PublicKey::from_bits(bytes::Bytes::from_static(&[1; 32])),
            ).with_tag("t1")
        ));
        msg.push(Pdu::Client(ClientPdu::list().with_tag("t2")));
        msg.push(Pdu::Client(
            ClientPdu::set("bob").with_clear_replay_protection()
        ));

        let bytes = msg.to_xml_bytes();
        let decoded = Message::decode(bytes.as_ref()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn rejects_unknown_element() {
        let xml = "<msg \
            xmlns=\"http://www.hactrn.net/uris/rpki/publication-control/\" \
            version=\"1\" type=\"query\"><frob/></msg>";
        let err = Message::decode(xml.as_bytes()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedRequest);
    }

    #[test]
    fn rejects_missing_action() {
        let xml = "<msg \
            xmlns=\"http://www.hactrn.net/uris/rpki/publication-control/\" \
            version=\"1\" type=\"query\">\
            <client client_handle=\"alice\"/></msg>";
        let err = Message::decode(xml.as_bytes()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedRequest);
    }

    #[test]
    fn rejects_get_without_handle() {
        let xml = "<msg \
            xmlns=\"http://www.hactrn.net/uris/rpki/publication-control/\" \
            version=\"1\" type=\"query\">\
            <client action=\"get\"/></msg>";
        let err = Message::decode(xml.as_bytes()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedRequest);
    }

    #[test]
    fn unknown_error_code_decodes_as_unexpected() {
        let xml = "<msg \
            xmlns=\"http://www.hactrn.net/uris/rpki/publication-control/\" \
            version=\"1\" type=\"reply\">\
            <report_error error_code=\"EntirelyNovel\"/></msg>";
        let msg = Message::decode(xml.as_bytes()).unwrap();
        let err = msg.check_for_errors().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unexpected);
    }
}
