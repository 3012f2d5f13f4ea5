//! The signed message envelope wrapping protocol payloads.
//!
//! Every protocol exchange travels as a `<signed_message/>` document: the
//! serialized inner message as base64 payload, the sender's handle, a
//! signing time, and a detached signature over time and payload. Nothing
//! of the payload is interpreted before [`SignedMessage::validate`]
//! succeeds against the configured trust anchor, and a message whose
//! signing time does not advance past the sender's last accepted one is
//! rejected wholesale.

use std::io;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use crate::crypto::{PublicKey, Signature, Signer};
use crate::errors::{Error, ErrorCode};
use crate::xml;

const VERSION: &str = "1";
const NS: &[u8] = b"http://www.hactrn.net/uris/rpki/signed-message/";
const NS_STR: &str = "http://www.hactrn.net/uris/rpki/signed-message/";

const SIGNED_MESSAGE: &[u8] = b"signed_message";
const PAYLOAD: &[u8] = b"payload";
const SIGNATURE: &[u8] = b"signature";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";


//------------ SignedMessage -------------------------------------------------

/// A signed protocol message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedMessage {
    sender: String,
    signing_time: DateTime<Utc>,
    payload: Bytes,
    signature: Signature,
}

/// # Construct
///
impl SignedMessage {
    /// Creates a signed message over the given payload.
    ///
    /// The signing time is truncated to whole seconds, matching its wire
    /// representation, so that the signed bytes and the serialized form
    /// cannot disagree.
    pub fn create<S: Signer>(
        payload: Bytes,
        sender: &str,
        signing_time: DateTime<Utc>,
        signer: &S,
    ) -> Result<Self, S::Error> {
        let time_str = signing_time.format(TIME_FORMAT).to_string();
        let signing_time = Utc.datetime_from_str(&time_str, TIME_FORMAT)
            .expect("formatted time must parse");
        let signature = signer.sign(
            &signed_bytes(&time_str, &payload)
        )?;
        Ok(SignedMessage {
            sender: sender.into(),
            signing_time,
            payload,
            signature,
        })
    }
}

/// # Data Access
///
impl SignedMessage {
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn signing_time(&self) -> DateTime<Utc> {
        self.signing_time
    }

    /// Returns the payload.
    ///
    /// Interpreting the payload before [`validate`][Self::validate] has
    /// succeeded trusts unauthenticated data.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// # Validation
///
impl SignedMessage {
    /// Checks the signature against the given trust anchor.
    pub fn validate(&self, trust_anchor: &PublicKey) -> Result<(), Error> {
        let time_str = self.signing_time.format(TIME_FORMAT).to_string();
        trust_anchor.verify(
            &signed_bytes(&time_str, &self.payload),
            &self.signature,
        )?;
        Ok(())
    }

    /// Checks the signing time against the sender's last accepted one.
    ///
    /// The embedded time must be strictly greater than `last_seen`.
    pub fn check_replay(
        &self, last_seen: Option<DateTime<Utc>>
    ) -> Result<(), Error> {
        if let Some(last_seen) = last_seen {
            if self.signing_time <= last_seen {
                return Err(Error::new(
                    ErrorCode::ReplayDetected,
                    format!(
                        "signing time {} does not advance past {}",
                        self.signing_time, last_seen
                    )
                ))
            }
        }
        Ok(())
    }
}

/// # Decoding from XML
///
impl SignedMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = xml::decode::Reader::new(bytes);

        let mut sender: Option<String> = None;
        let mut signing_time: Option<DateTime<Utc>> = None;

        let mut outer = reader.start(|element| {
            if element.name() != SIGNED_MESSAGE
                || element.namespace() != Some(NS)
            {
                return Err(Error::malformed("expected <signed_message/>"))
            }
            element.attributes(|name, value| match name {
                b"version" => {
                    if value.ascii_into::<String>()? != VERSION {
                        return Err(Error::malformed("unsupported version"))
                    }
                    Ok(())
                }
                b"sender" => {
                    sender = Some(value.ascii_into()?);
                    Ok(())
                }
                b"signing_time" => {
                    let s: String = value.ascii_into()?;
                    signing_time = Some(
                        Utc.datetime_from_str(&s, TIME_FORMAT).map_err(
                            |_| Error::malformed("invalid signing time")
                        )?
                    );
                    Ok(())
                }
                _ => Err(Error::malformed("unexpected attribute"))
            })
        })?;

        let sender = sender.ok_or_else(
            || Error::malformed("missing sender")
        )?;
        let signing_time = signing_time.ok_or_else(
            || Error::malformed("missing signing time")
        )?;

        let mut payload: Option<Bytes> = None;
        let mut signature: Option<Signature> = None;

        loop {
            let mut name = None;
            let element = outer.take_opt_element(&mut reader, |element| {
                name = Some(match element.name() {
                    PAYLOAD => Ok(PAYLOAD),
                    SIGNATURE => Ok(SIGNATURE),
                    _ => Err(Error::malformed("unexpected element"))
                }?);
                Ok::<_, Error>(())
            })?;
            let mut element = match element {
                Some(element) => element,
                None => break,
            };
            let content = element.take_text(&mut reader, |text| {
                text.base64_decode()
            })?;
            match name.expect("element without name") {
                PAYLOAD => payload = Some(content),
                _ => signature = Some(Signature::new(content)),
            }
            element.take_end(&mut reader)?;
        }

        outer.take_end(&mut reader)?;
        reader.end()?;

        Ok(SignedMessage {
            sender,
            signing_time,
            payload: payload.ok_or_else(
                || Error::malformed("missing payload")
            )?,
            signature: signature.ok_or_else(
                || Error::malformed("missing signature")
            )?,
        })
    }
}

/// # Encoding to XML
///
impl SignedMessage {
    pub fn write_xml(
        &self, writer: &mut impl io::Write
    ) -> Result<(), io::Error> {
        let mut writer = xml::encode::Writer::new(writer);
        writer.element("signed_message")?
            .attr("xmlns", NS_STR)?
            .attr("version", VERSION)?
            .attr("sender", &self.sender)?
            .attr(
                "signing_time",
                &self.signing_time.format(TIME_FORMAT)
            )?
            .content(|content| {
                content.element("payload")?
                    .content(|inner| inner.raw(&base64::encode(
                        &self.payload
                    )))?;
                content.element("signature")?
                    .content(|inner| inner.raw(
                        &self.signature.to_base64()
                    ))?;
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


//------------ Helpers -------------------------------------------------------

/// The exact byte sequence the signature covers.
fn signed_bytes(time_str: &str, payload: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(time_str.len() + 1 + payload.len());
    res.extend_from_slice(time_str.as_bytes());
    res.push(0);
    res.extend_from_slice(payload);
    res
}


//------------ Tests ---------------------------------------------------------
