//! The resource-listing protocol.
//!
//! A small subset of the left-right protocol: the back end asks the
//! engine which resources a managed entity has received from its parents,
//! and gets one `<list_received_resources/>` PDU per resource certificate
//! in reply. The reply PDUs are the input to the resource-set reconciler.

use std::io;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use crate::errors::Error;
use crate::resources::{AddrFamily, AddrRange, AsnRange};
use crate::uri;
use crate::xml;
use crate::xml::encode;
use super::{MessageKind, ReportError};

const VERSION: &str = "1";
const NS: &[u8] = b"http://www.hactrn.net/uris/rpki/left-right/";
const NS_STR: &str = "http://www.hactrn.net/uris/rpki/left-right/";

const MSG: &[u8] = b"msg";
const LIST_RECEIVED_RESOURCES: &[u8] = b"list_received_resources";
const REPORT_ERROR: &[u8] = b"report_error";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";


//------------ PduKind -------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PduKind {
    ListReceivedResources,
    ReportError,
}

/// The closed dispatch table from element name to PDU variant.
const PDU_TABLE: &[(&[u8], PduKind)] = &[
    (LIST_RECEIVED_RESOURCES, PduKind::ListReceivedResources),
    (REPORT_ERROR, PduKind::ReportError),
];

fn lookup_pdu(name: &[u8]) -> Result<PduKind, Error> {
    PDU_TABLE.iter().find(|(tag, _)| *tag == name)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| Error::malformed("unknown PDU element"))
}


//------------ Message -------------------------------------------------------

/// A resource-listing message.
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

    pub fn reply(pdus: Vec<Pdu>) -> Self {
        Message { kind: MessageKind::Reply, pdus }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_query(&self) -> bool {
        self.kind == MessageKind::Query
    }

    pub fn pdus(&self) -> &[Pdu] {
        &self.pdus
    }

    /// Extracts the received-resource reports from a reply.
    ///
    /// The first `<report_error/>` PDU, if any, fails the whole
    /// extraction: a reply carrying errors is not a usable snapshot.
    pub fn into_reports(self) -> Result<Vec<ReceivedResources>, Error> {
        let mut reports = Vec::new();
        for pdu in self.pdus {
            match pdu {
                Pdu::Resources(report) => reports.push(report),
                Pdu::ReportError(report) => return Err(report.to_error()),
                Pdu::ListQuery { .. } => {
                    return Err(Error::malformed(
                        "query PDU in reply message"
                    ))
                }
            }
        }
        Ok(reports)
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

/// A single PDU of the resource-listing protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Pdu {
    /// A query asking for all received resources of one entity.
    ListQuery {
        tag: Option<String>,
        self_handle: String,
    },

    /// One received resource certificate in a reply.
    Resources(ReceivedResources),

    ReportError(ReportError),
}

impl Pdu {
    pub fn list_query(
        tag: Option<&str>, self_handle: impl Into<String>
    ) -> Self {
        Pdu::ListQuery {
            tag: tag.map(Into::into),
            self_handle: self_handle.into(),
        }
    }

    fn decode_opt<R: io::BufRead>(
        content: &mut xml::decode::Content,
        reader: &mut xml::decode::Reader<R>,
    ) -> Result<Option<Self>, Error> {
        let mut pdu_kind = None;

        let mut tag: Option<String> = None;
        let mut self_handle: Option<String> = None;
        let mut parent_handle: Option<String> = None;
        let mut cert_uri: Option<uri::Rsync> = None;
        let mut not_before: Option<DateTime<Utc>> = None;
        let mut not_after: Option<DateTime<Utc>> = None;
        let mut asn: Option<String> = None;
        let mut ipv4: Option<String> = None;
        let mut ipv6: Option<String> = None;
        let mut error_code = None;

        let pdu_element = content.take_opt_element(reader, |element| {
            pdu_kind = Some(lookup_pdu(element.name())?);
            element.attributes(|name, value| match name {
                b"tag" => {
                    tag = Some(value.ascii_into()?);
                    Ok(())
                }
                b"self_handle" => {
                    self_handle = Some(value.ascii_into()?);
                    Ok(())
                }
                b"parent_handle" => {
                    parent_handle = Some(value.ascii_into()?);
                    Ok(())
                }
                b"uri" => {
                    cert_uri = Some(value.ascii_into()?);
                    Ok(())
                }
                b"notBefore" => {
                    not_before = Some(parse_time(
                        &value.ascii_into::<String>()?
                    )?);
                    Ok(())
                }
                b"notAfter" => {
                    not_after = Some(parse_time(
                        &value.ascii_into::<String>()?
                    )?);
                    Ok(())
                }
                b"asn" => {
                    asn = Some(value.ascii_into()?);
                    Ok(())
                }
                b"ipv4" => {
                    ipv4 = Some(value.ascii_into()?);
                    Ok(())
                }
                b"ipv6" => {
                    ipv6 = Some(value.ascii_into()?);
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
            PduKind::ListReceivedResources => {
                let self_handle = self_handle.ok_or_else(
                    || Error::malformed("missing self_handle")
                )?;
                match parent_handle {
                    None => {
                        // No parent information at all makes this the
                        // query form.
                        Pdu::ListQuery { tag, self_handle }
                    }
                    Some(parent_handle) => {
                        Pdu::Resources(ReceivedResources {
                            tag,
                            self_handle,
                            parent_handle,
                            uri: cert_uri.ok_or_else(
                                || Error::malformed("missing uri")
                            )?,
                            not_before: not_before.ok_or_else(
                                || Error::malformed("missing notBefore")
                            )?,
                            not_after: not_after.ok_or_else(
                                || Error::malformed("missing notAfter")
                            )?,
                            asn_ranges: AsnRange::parse_set(
                                asn.as_deref().unwrap_or("")
                            ).map_err(
                                |err| Error::malformed(err.to_string())
                            )?,
                            ipv4_ranges: AddrRange::parse_set(
                                AddrFamily::Ipv4,
                                ipv4.as_deref().unwrap_or("")
                            ).map_err(
                                |err| Error::malformed(err.to_string())
                            )?,
                            ipv6_ranges: AddrRange::parse_set(
                                AddrFamily::Ipv6,
                                ipv6.as_deref().unwrap_or("")
                            ).map_err(
                                |err| Error::malformed(err.to_string())
                            )?,
                        })
                    }
                }
            }
            PduKind::ReportError => {
                let code = error_code.ok_or_else(
                    || Error::malformed("<report_error/> without code")
                )?;
                let text = pdu_element.take_opt_text(reader, |text| {
                    text.to_ascii().map(|s| s.to_string())
                })?;
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
            Pdu::ListQuery { tag, self_handle } => {
                content.element("list_received_resources")?
                    .attr_opt("tag", tag.as_ref())?
                    .attr("self_handle", self_handle)?;
                Ok(())
            }
            Pdu::Resources(report) => report.write_xml(content),
            Pdu::ReportError(report) => report.write_xml(content),
        }
    }
}


//------------ ReceivedResources ---------------------------------------------

/// One received resource certificate as reported by a parent exchange.
///
/// This is the unit the reconciler consumes: the identifying URI under a
/// parent, a validity window, and the certified resource ranges.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReceivedResources {
    tag: Option<String>,
    self_handle: String,
    parent_handle: String,
    uri: uri::Rsync,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    asn_ranges: Vec<AsnRange>,
    ipv4_ranges: Vec<AddrRange>,
    ipv6_ranges: Vec<AddrRange>,
}

/// # Construct
///
impl ReceivedResources {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_handle: impl Into<String>,
        parent_handle: impl Into<String>,
        uri: uri::Rsync,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        asn_ranges: Vec<AsnRange>,
        ipv4_ranges: Vec<AddrRange>,
        ipv6_ranges: Vec<AddrRange>,
    ) -> Self {
        ReceivedResources {
            tag: None,
            self_handle: self_handle.into(),
            parent_handle: parent_handle.into(),
            uri,
            not_before,
            not_after,
            asn_ranges,
            ipv4_ranges,
            ipv6_ranges,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// # Data Access
///
impl ReceivedResources {
    pub fn self_handle(&self) -> &str {
        &self.self_handle
    }

    pub fn parent_handle(&self) -> &str {
        &self.parent_handle
    }

    pub fn uri(&self) -> &uri::Rsync {
        &self.uri
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn asn_ranges(&self) -> &[AsnRange] {
        &self.asn_ranges
    }

    pub fn ipv4_ranges(&self) -> &[AddrRange] {
        &self.ipv4_ranges
    }

    pub fn ipv6_ranges(&self) -> &[AddrRange] {
        &self.ipv6_ranges
    }
}

/// # XML support
///
impl ReceivedResources {
    fn write_xml<W: io::Write>(
        &self, content: &mut encode::Content<W>
    ) -> Result<(), io::Error> {
        content.element("list_received_resources")?
            .attr_opt("tag", self.tag.as_ref())?
            .attr("self_handle", &self.self_handle)?
            .attr("parent_handle", &self.parent_handle)?
            .attr("uri", &self.uri)?
            .attr("notBefore", &self.not_before.format(TIME_FORMAT))?
            .attr("notAfter", &self.not_after.format(TIME_FORMAT))?
            .attr("asn", &render_set(&self.asn_ranges))?
            .attr("ipv4", &render_set(&self.ipv4_ranges))?
            .attr("ipv6", &render_set(&self.ipv6_ranges))?;
        Ok(())
    }
}


//------------ Helpers -------------------------------------------------------

fn parse_time(s: &str) -> Result<DateTime<Utc>, Error> {
    Utc.datetime_from_str(s, TIME_FORMAT)
        .map_err(|_| Error::malformed("invalid timestamp"))
}

fn render_set<T: std::fmt::Display>(items: &[T]) -> String {
    let mut res = String::new();
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            res.push(',')
        }
        res.push_str(&item.to_string())
    }
    res
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use crate::errors::ErrorCode;
    use crate::resources::Asn;

    #[test]
    fn decode_resource_reply() {
        let xml = include_bytes!(
            "../../test-data/listres/resources-reply.xml"
        );
        let msg = Message::decode(xml.as_ref()).unwrap();
        assert!(!msg.is_query());
        let reports = msg.into_reports().unwrap();
        assert_eq!(reports.len(), 2);

        let report = &reports[0];
        assert_eq!(report.self_handle(), "alice");
        assert_eq!(report.parent_handle(), "ripe");
        assert_eq!(
            report.asn_ranges(),
            &[
                AsnRange::from(Asn::from_u32(64496)),
                AsnRange::from_str("64500-64510").unwrap(),
            ]
        );
        assert_eq!(report.ipv4_ranges().len(), 1);
        assert_eq!(report.ipv6_ranges().len(), 1);

        // The second cert carries no IPv6 at all.
        assert!(reports[1].ipv6_ranges().is_empty());
    }

    #[test]
    fn decode_query() {
        let xml = "<msg \
            xmlns=\"http://www.hactrn.net/uris/rpki/left-right/\" \
            version=\"1\" type=\"query\">\
            <list_received_resources tag=\"resources\" \
            self_handle=\"alice\"/></msg>";
        let msg = Message::decode(xml.as_bytes()).unwrap();
        assert!(msg.is_query());
        assert_eq!(
            msg.pdus()[0],
            Pdu::list_query(Some("resources"), "alice")
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        let report = ReceivedResources::new(
            "alice", "ripe",
            uri::Rsync::from_str(
                "rsync://repo.example.net/repo/alice.cer"
            ).unwrap(),
            parse_time("2026-01-01T00:00:00Z").unwrap(),
            parse_time("2027-01-01T00:00:00Z").unwrap(),
            vec![AsnRange::from_str("64496").unwrap()],
            vec![AddrRange::from_str("192.0.2.0/24").unwrap()],
            Vec::new(),
        );
        let msg = Message::reply(vec![Pdu::Resources(report)]);
        let bytes = msg.to_xml_bytes();
        assert_eq!(Message::decode(bytes.as_ref()).unwrap(), msg);
    }

    #[test]
    fn error_reply_fails_extraction() {
        let xml = "<msg \
            xmlns=\"http://www.hactrn.net/uris/rpki/left-right/\" \
            version=\"1\" type=\"reply\">\
            <report_error error_code=\"not_found\">no such self\
            </report_error></msg>";
        let msg = Message::decode(xml.as_bytes()).unwrap();
        let err = msg.into_reports().unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn rejects_bad_resource_set() {
        let xml = "<msg \
            xmlns=\"http://www.hactrn.net/uris/rpki/left-right/\" \
            version=\"1\" type=\"reply\">\
            <list_received_resources self_handle=\"alice\" \
            parent_handle=\"ripe\" \
            uri=\"rsync://repo.example.net/repo/alice.cer\" \
            notBefore=\"2026-01-01T00:00:00Z\" \
            notAfter=\"2027-01-01T00:00:00Z\" \
            asn=\"64496\" ipv4=\"2001:db8::/32\" ipv6=\"\"/></msg>";
        let err = Message::decode(xml.as_bytes()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedRequest);
    }
}
