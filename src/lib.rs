//! A control-plane engine for managing RPKI publication clients and
//! received resources.
//!
//! This crate implements the server core of a small family of signed
//! XML protocols. Incoming messages arrive wrapped in a
//! [signed envelope][sigmsg], are decoded against a closed per-protocol
//! PDU table, and are served one PDU at a time with failures isolated
//! to the PDU they happened in. Two protocols are spoken:
//!
//! * the [publication control protocol][proto::control] managing the
//!   [client registry][registry], and
//! * the [resource listing protocol][proto::listres] exposing the
//!   [received-resource inventory][inventory], which is kept current
//!   by a delegation-aware [reconciler][inventory::Inventory::reconcile].
//!
//! The [engine] module ties the layers together into a single
//! `raw bytes in, raw bytes out` exchange.

pub mod crypto;
pub mod engine;
pub mod errors;
pub mod inventory;
pub mod proto;
pub mod registry;
pub mod resources;
pub mod sigmsg;
pub mod uri;
pub mod xml;
