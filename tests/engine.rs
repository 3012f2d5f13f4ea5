//! End-to-end exchanges against the protocol engine.

use std::str::FromStr;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use rpki_controld::crypto::{PublicKey, Signer, SoftSigner};
use rpki_controld::engine::{Engine, ServerConfig};
use rpki_controld::errors::ErrorCode;
use rpki_controld::proto::control;
use rpki_controld::proto::listres;
use rpki_controld::proto::listres::ReceivedResources;
use rpki_controld::resources::{AddrRange, AsnRange};
use rpki_controld::sigmsg::SignedMessage;
use rpki_controld::uri;

struct Testbed {
    engine: Engine<SoftSigner>,
    engine_key: PublicKey,
    peer: SoftSigner,
}

impl Testbed {
    fn new() -> Self {
        let signer = SoftSigner::new().unwrap();
        let engine_key = signer.public_key();
        let peer = SoftSigner::new().unwrap();
        let config = ServerConfig::new("testbed", peer.public_key());
        Testbed { engine: Engine::new(config, signer), engine_key, peer }
    }

    fn seal(
        &self, msg: &control::Message, time: DateTime<Utc>
    ) -> Bytes {
        SignedMessage::create(
            msg.to_xml_bytes(), "irbe", time, &self.peer
        ).unwrap().to_xml_bytes()
    }

    /// Runs one exchange and returns the verified reply message.
    fn exchange(
        &self, msg: &control::Message, time: DateTime<Utc>
    ) -> control::Message {
        let raw = self.engine.process(&self.seal(msg, time)).unwrap();
        let reply = SignedMessage::decode(&raw).unwrap();
        reply.validate(&self.engine_key).unwrap();
        assert_eq!(reply.sender(), "testbed");
        control::Message::decode(reply.payload()).unwrap()
    }
}

fn rsync(s: &str) -> uri::Rsync {
    uri::Rsync::from_str(s).unwrap()
}

fn time(minute: u32) -> DateTime<Utc> {
    Utc.ymd(2026, 8, 1).and_hms(12, minute, 0)
}

#[test]
fn signed_round_trip_with_batch_isolation() {
    let testbed = Testbed::new();
    let alice_key = SoftSigner::new().unwrap().public_key();

    let reply = testbed.exchange(
        &control::Message::query(vec![
            control::Pdu::Client(control::ClientPdu::create(
                "alice",
                rsync("rsync://repo.example.net/repo/alice/"),
                alice_key.clone(),
            ).with_tag("new-alice")),
        ]),
        time(0),
    );
    reply.check_for_errors().unwrap();

    // Batch with a failing PDU in the middle. The failure stays inside
    // its PDU; the get before and the list after still answer.
    let reply = testbed.exchange(
        &control::Message::query(vec![
            control::Pdu::Client(
                control::ClientPdu::get("alice").with_tag("a")
            ),
            control::Pdu::Client(
                control::ClientPdu::destroy("ghost").with_tag("b")
            ),
            control::Pdu::Client(
                control::ClientPdu::list().with_tag("c")
            ),
        ]),
        time(1),
    );
    let pdus = reply.pdus();
    assert_eq!(pdus.len(), 3);
    match &pdus[0] {
        control::Pdu::Client(pdu) => {
            assert_eq!(pdu.handle(), Some("alice"));
            assert_eq!(pdu.bpki_cert(), Some(&alice_key));
            assert_eq!(
                pdu.base_uri(),
                Some(&rsync("rsync://repo.example.net/repo/alice/"))
            );
        }
        _ => panic!("expected client PDU")
    }
    match &pdus[1] {
        control::Pdu::ReportError(report) => {
            assert_eq!(report.code(), ErrorCode::NotFound);
            assert_eq!(report.tag(), Some("b"));
        }
        _ => panic!("expected report_error")
    }
    match &pdus[2] {
        control::Pdu::Client(pdu) => {
            assert_eq!(pdu.action(), control::Action::List);
            assert_eq!(pdu.handle(), Some("alice"));
        }
        _ => panic!("expected client PDU")
    }
}

#[test]
fn replayed_message_is_rejected_without_state_change() {
    let testbed = Testbed::new();
    let raw = testbed.seal(
        &control::Message::query(vec![
            control::Pdu::Client(control::ClientPdu::create(
                "alice",
                rsync("rsync://repo.example.net/repo/alice/"),
                SoftSigner::new().unwrap().public_key(),
            )),
        ]),
        time(0),
    );
    testbed.engine.process(&raw).unwrap();

    // The identical bytes again: same signing time, so replay.
    let err = testbed.engine.process(&raw).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReplayDetected);

    // An earlier signing time is just as dead.
    let err = testbed.engine.process(&testbed.seal(
        &control::Message::query(vec![
            control::Pdu::Client(control::ClientPdu::list())
        ]),
        Utc.ymd(2026, 8, 1).and_hms(11, 0, 0),
    )).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReplayDetected);

    // The rejected messages left the registry as it was.
    assert_eq!(testbed.engine.registry().list().len(), 1);
}

#[test]
fn unknown_key_is_rejected_before_interpretation() {
    let testbed = Testbed::new();
    let stranger = SoftSigner::new().unwrap();
    let raw = SignedMessage::create(
        control::Message::query(vec![
            control::Pdu::Client(control::ClientPdu::create(
                "mallory",
                rsync("rsync://repo.example.net/repo/mallory/"),
                stranger.public_key(),
            )),
        ]).to_xml_bytes(),
        "irbe", time(0), &stranger,
    ).unwrap().to_xml_bytes();

    let err = testbed.engine.process(&raw).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SignatureInvalid);
    assert!(testbed.engine.registry().list().is_empty());
}

#[test]
fn reply_mode_payload_yields_bad_query_reply() {
    let testbed = Testbed::new();
    let reply = testbed.exchange(&control::Message::reply(), time(0));
    assert_eq!(reply.pdus().len(), 1);
    match &reply.pdus()[0] {
        control::Pdu::ReportError(report) => {
            assert_eq!(report.code(), ErrorCode::BadQuery);
        }
        _ => panic!("expected report_error")
    }
}

#[test]
fn forbidden_uri_after_signed_registration() {
    let testbed = Testbed::new();
    testbed.exchange(
        &control::Message::query(vec![
            control::Pdu::Client(control::ClientPdu::create(
                "alice",
                rsync("rsync://repo.example.net/repo/alice/"),
                SoftSigner::new().unwrap().public_key(),
            )),
        ]),
        time(0),
    ).check_for_errors().unwrap();

    let err = testbed.engine.check_allowed_uri(
        "alice",
        &rsync("rsync://repo.example.net/repo/bob/object.cer"),
    ).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ForbiddenUri);
}

#[test]
fn signed_resource_listing_exchange() {
    let testbed = Testbed::new();
    testbed.engine.inventory().reconcile("alice", &[
        ReceivedResources::new(
            "alice", "ripe",
            rsync("rsync://repo.example.net/repo/ripe/alice.cer"),
            time(0), Utc.ymd(2027, 8, 1).and_hms(12, 0, 0),
            vec![AsnRange::from_str("64496-64499").unwrap()],
            vec![AddrRange::from_str("192.0.2.0/24").unwrap()],
            vec![AddrRange::from_str("2001:db8::/32").unwrap()],
        ),
    ]).unwrap();

    let query = listres::Message::query(vec![
        listres::Pdu::list_query(Some("res"), "alice")
    ]);
    let raw = SignedMessage::create(
        query.to_xml_bytes(), "irbe", time(1), &testbed.peer
    ).unwrap().to_xml_bytes();
    let raw = testbed.engine.process_listres(&raw).unwrap();

    let reply = SignedMessage::decode(&raw).unwrap();
    reply.validate(&testbed.engine_key).unwrap();
    let reports = listres::Message::decode(reply.payload()).unwrap()
        .into_reports().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].self_handle(), "alice");
    assert_eq!(reports[0].parent_handle(), "ripe");
    assert_eq!(
        reports[0].asn_ranges(),
        &[AsnRange::from_str("64496-64499").unwrap()]
    );
    assert_eq!(
        reports[0].ipv6_ranges(),
        &[AddrRange::from_str("2001:db8::/32").unwrap()]
    );
}
