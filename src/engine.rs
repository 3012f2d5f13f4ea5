//! The protocol engine.
//!
//! The engine ties the other pieces together: it opens the signed
//! envelope around an incoming message, feeds the payload to the
//! protocol decoder, serves each PDU against the client registry or
//! the resource inventory, and seals the reply into a fresh envelope.
//!
//! Failures split into two layers. Envelope failures, a malformed
//! payload, and a reply submitted for serving reject the whole
//! exchange. Everything else is scoped to the PDU it happened in: the
//! failed PDU becomes a `<report_error/>` carrying its tag, and the
//! remaining PDUs of the batch still execute.

use std::sync::Mutex;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use crate::crypto::{PublicKey, Signer};
use crate::errors::{Error, ErrorCode};
use crate::inventory::Inventory;
use crate::proto::ReportError;
use crate::proto::control;
use crate::proto::control::Action;
use crate::proto::listres;
use crate::registry::{Client, Registry};
use crate::resources::AddrFamily;
use crate::sigmsg::SignedMessage;
use crate::uri;


//------------ ServerConfig --------------------------------------------------

/// Configuration of a protocol engine.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// The sender handle placed in outgoing envelopes.
    sender: String,

    /// The key that must have signed everything we accept.
    trust_anchor: PublicKey,

    /// Whether signing times must strictly advance per sender.
    replay_protection: bool,
}

impl ServerConfig {
    pub fn new(sender: impl Into<String>, trust_anchor: PublicKey) -> Self {
        ServerConfig {
            sender: sender.into(),
            trust_anchor,
            replay_protection: true,
        }
    }

    /// Disables replay protection. Intended for test setups only.
    pub fn without_replay_protection(mut self) -> Self {
        self.replay_protection = false;
        self
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn trust_anchor(&self) -> &PublicKey {
        &self.trust_anchor
    }
}


//------------ Engine --------------------------------------------------------

/// The server side of the control protocols.
pub struct Engine<S> {
    config: ServerConfig,
    signer: S,
    registry: Registry,
    inventory: Inventory,

    /// The signing time of the last message accepted from our peer.
    ///
    /// The guard is held across serving a message, so replay checking,
    /// PDU effects, and advancing this value are one atomic step and
    /// concurrent messages serialize.
    last_seen: Mutex<Option<DateTime<Utc>>>,
}

/// # Setup and Access
///
impl<S> Engine<S> {
    pub fn new(config: ServerConfig, signer: S) -> Self {
        Engine {
            config,
            signer,
            registry: Registry::new(),
            inventory: Inventory::new(),
            last_seen: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Checks that a client may target the given URI.
    ///
    /// This is the authorization gate for publication requests: the
    /// target must lie inside the registered client's URI namespace.
    pub fn check_allowed_uri(
        &self, handle: &str, target: &uri::Rsync
    ) -> Result<(), Error> {
        self.registry.get(handle)?.check_allowed_uri(target)
    }
}

/// # Exchange Processing
///
impl<S: Signer> Engine<S> {
    /// Processes one raw control exchange.
    ///
    /// Returns the sealed reply, or an error when the envelope itself
    /// is rejected. An envelope rejection produces no reply at all:
    /// nothing inside an unverified or replayed message is interpreted.
    pub fn process(&self, raw: &[u8]) -> Result<Bytes, Error> {
        let msg = self.open(raw)?;
        let mut last_seen = self.lock_last_seen();
        if self.config.replay_protection {
            msg.check_replay(*last_seen).map_err(|err| {
                warn!("rejected message from '{}': {}", msg.sender(), err);
                err
            })?;
        }

        let reply = match control::Message::decode(msg.payload()) {
            Ok(query) => match self.serve(&query) {
                Ok(reply) => reply,
                Err(err) => rejection(&err),
            }
            Err(err) => rejection(&err),
        };

        // Replay state and PDU effects advance under the same guard.
        *last_seen = Some(msg.signing_time());
        drop(last_seen);

        info!(
            "served control exchange from '{}'", msg.sender()
        );
        self.seal(reply.to_xml_bytes())
    }

    /// Processes one raw resource-listing exchange.
    pub fn process_listres(&self, raw: &[u8]) -> Result<Bytes, Error> {
        let msg = self.open(raw)?;
        let mut last_seen = self.lock_last_seen();
        if self.config.replay_protection {
            msg.check_replay(*last_seen).map_err(|err| {
                warn!("rejected message from '{}': {}", msg.sender(), err);
                err
            })?;
        }

        let reply = match listres::Message::decode(msg.payload()) {
            Ok(query) => match self.serve_listres(&query) {
                Ok(reply) => reply,
                Err(err) => listres::Message::reply(vec![
                    listres::Pdu::ReportError(
                        ReportError::from_error(&err, None)
                    )
                ]),
            }
            Err(err) => listres::Message::reply(vec![
                listres::Pdu::ReportError(ReportError::from_error(&err, None))
            ]),
        };

        *last_seen = Some(msg.signing_time());
        drop(last_seen);

        self.seal(reply.to_xml_bytes())
    }

    fn open(&self, raw: &[u8]) -> Result<SignedMessage, Error> {
        let msg = SignedMessage::decode(raw).map_err(|err| {
            warn!("rejected envelope: {}", err);
            err
        })?;
        msg.validate(&self.config.trust_anchor).map_err(|err| {
            warn!("rejected envelope from '{}': {}", msg.sender(), err);
            err
        })?;
        Ok(msg)
    }

    fn seal(&self, payload: Bytes) -> Result<Bytes, Error> {
        let msg = SignedMessage::create(
            payload, &self.config.sender, Utc::now(), &self.signer
        ).map_err(|err| {
            Error::new(
                ErrorCode::Unexpected,
                format!("signing the reply failed: {}", err)
            )
        })?;
        Ok(msg.to_xml_bytes())
    }

    fn lock_last_seen(
        &self
    ) -> std::sync::MutexGuard<Option<DateTime<Utc>>> {
        self.last_seen.lock().expect("poisoned replay state")
    }
}

/// # Serving Queries
///
impl<S> Engine<S> {
    /// Serves one control query, producing the full reply.
    ///
    /// Fails with `BadQuery` when handed anything but a query; that is
    /// the one failure aborting the whole exchange here. Every other
    /// failure stays inside the PDU it happened in.
    pub fn serve(
        &self, query: &control::Message
    ) -> Result<control::Message, Error> {
        if !query.is_query() {
            return Err(Error::new(
                ErrorCode::BadQuery,
                "reply message submitted for serving"
            ))
        }

        let mut reply = control::Message::reply();
        for pdu in query.pdus() {
            let res = match pdu {
                control::Pdu::Client(client_pdu) => {
                    self.serve_client(client_pdu)
                }
                control::Pdu::ReportError(_) => {
                    Err(Error::malformed("report_error PDU in query"))
                }
            };
            match res {
                Ok(pdus) => {
                    for pdu in pdus {
                        reply.push(pdu)
                    }
                }
                Err(err) => {
                    // A failed lookup is ordinary control flow for the
                    // caller and not worth a log entry.
                    if err.code() != ErrorCode::NotFound {
                        error!(
                            "client PDU (tag {}) failed: {}",
                            pdu.tag().unwrap_or("none"), err
                        );
                    }
                    reply.push(control::Pdu::ReportError(
                        ReportError::from_error(&err, pdu.tag())
                    ))
                }
            }
        }
        Ok(reply)
    }

    fn serve_client(
        &self, pdu: &control::ClientPdu
    ) -> Result<Vec<control::Pdu>, Error> {
        match pdu.action() {
            Action::Create => {
                let handle = require_handle(pdu)?;
                let base_uri = require_base_uri(pdu)?;
                let bpki_cert = pdu.bpki_cert().cloned().ok_or_else(
                    || Error::malformed("create without bpki_cert")
                )?;
                let client = self.registry.create(
                    handle, base_uri, bpki_cert, pdu.bpki_glue().cloned()
                )?;
                Ok(vec![echo(Action::Create, pdu.tag(), &client)])
            }
            Action::Set => {
                let handle = require_handle(pdu)?;
                let base_uri = match pdu.base_uri() {
                    Some(base_uri) => {
                        check_base_uri(base_uri)?;
                        Some(base_uri.clone())
                    }
                    None => None
                };
                let client = self.registry.set(
                    handle,
                    base_uri,
                    pdu.bpki_cert().cloned(),
                    pdu.bpki_glue().cloned(),
                    pdu.clear_replay_protection(),
                )?;
                Ok(vec![echo(Action::Set, pdu.tag(), &client)])
            }
            Action::Get => {
                let client = self.registry.get(require_handle(pdu)?)?;
                Ok(vec![echo(Action::Get, pdu.tag(), &client)])
            }
            Action::List => {
                Ok(self.registry.list().iter().map(|client| {
                    echo(Action::List, pdu.tag(), client)
                }).collect())
            }
            Action::Destroy => {
                let handle = require_handle(pdu)?;
                self.registry.destroy(handle)?;
                let mut reply = control::ClientPdu::destroy(handle);
                if let Some(tag) = pdu.tag() {
                    reply = reply.with_tag(tag)
                }
                Ok(vec![control::Pdu::Client(reply)])
            }
        }
    }

    /// Serves one resource-listing query.
    pub fn serve_listres(
        &self, query: &listres::Message
    ) -> Result<listres::Message, Error> {
        if !query.is_query() {
            return Err(Error::new(
                ErrorCode::BadQuery,
                "reply message submitted for serving"
            ))
        }

        let mut pdus = Vec::new();
        for pdu in query.pdus() {
            let res = match pdu {
                listres::Pdu::ListQuery { tag, self_handle } => {
                    self.list_received(tag.as_deref(), self_handle)
                }
                _ => Err(Error::malformed("reply PDU in query"))
            };
            match res {
                Ok(mut replies) => pdus.append(&mut replies),
                Err(err) => {
                    let tag = match pdu {
                        listres::Pdu::ListQuery { tag, .. } => {
                            tag.as_deref()
                        }
                        _ => None
                    };
                    if err.code() != ErrorCode::NotFound {
                        error!("resource listing failed: {}", err);
                    }
                    pdus.push(listres::Pdu::ReportError(
                        ReportError::from_error(&err, tag)
                    ))
                }
            }
        }
        Ok(listres::Message::reply(pdus))
    }

    fn list_received(
        &self, tag: Option<&str>, self_handle: &str
    ) -> Result<Vec<listres::Pdu>, Error> {
        let rows = self.inventory.received_resources(self_handle)?;
        Ok(rows.into_iter().map(|(parent_handle, cert)| {
            let ipv4 = cert.addr_ranges().iter().copied().filter(
                |range| range.family() == AddrFamily::Ipv4
            ).collect();
            let ipv6 = cert.addr_ranges().iter().copied().filter(
                |range| range.family() == AddrFamily::Ipv6
            ).collect();
            let mut report = listres::ReceivedResources::new(
                self_handle, parent_handle,
                cert.uri().clone(),
                cert.not_before(), cert.not_after(),
                cert.asn_ranges().to_vec(), ipv4, ipv6,
            );
            if let Some(tag) = tag {
                report = report.with_tag(tag)
            }
            listres::Pdu::Resources(report)
        }).collect())
    }
}


//------------ Helpers -------------------------------------------------------

fn require_handle(pdu: &control::ClientPdu) -> Result<&str, Error> {
    pdu.handle().ok_or_else(|| Error::malformed("missing client_handle"))
}

fn require_base_uri(
    pdu: &control::ClientPdu
) -> Result<uri::Rsync, Error> {
    let base_uri = pdu.base_uri().ok_or_else(
        || Error::malformed("create without base_uri")
    )?;
    check_base_uri(base_uri)?;
    Ok(base_uri.clone())
}

fn check_base_uri(base_uri: &uri::Rsync) -> Result<(), Error> {
    if base_uri.is_dir() {
        Ok(())
    }
    else {
        Err(Error::malformed("base_uri must name a directory"))
    }
}

/// Builds the reply PDU echoing a client row for a served action.
fn echo(
    action: Action, tag: Option<&str>, client: &Client
) -> control::Pdu {
    let mut pdu = match action {
        Action::Create => {
            control::ClientPdu::create(
                client.handle(),
                client.base_uri().clone(),
                client.bpki_cert().clone(),
            )
        }
        Action::Set => {
            control::ClientPdu::set(client.handle())
                .with_base_uri(client.base_uri().clone())
                .with_bpki_cert(client.bpki_cert().clone())
        }
        Action::Get => {
            control::ClientPdu::get(client.handle())
                .with_base_uri(client.base_uri().clone())
                .with_bpki_cert(client.bpki_cert().clone())
        }
        Action::List => {
            control::ClientPdu::list()
                .with_handle(client.handle())
                .with_base_uri(client.base_uri().clone())
                .with_bpki_cert(client.bpki_cert().clone())
        }
        Action::Destroy => control::ClientPdu::destroy(client.handle()),
    };
    if let Some(glue) = client.bpki_glue() {
        pdu = pdu.with_bpki_glue(glue.clone())
    }
    if let Some(tag) = tag {
        pdu = pdu.with_tag(tag)
    }
    control::Pdu::Client(pdu)
}

fn rejection(err: &Error) -> control::Message {
    let mut reply = control::Message::reply();
    reply.push(control::Pdu::ReportError(ReportError::from_error(err, None)));
    reply
}


//------------ Tests ---------------------------------------------------------
