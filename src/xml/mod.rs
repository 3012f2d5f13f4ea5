//! Minimal XML support for the protocol wire format.
//!
//! This wraps _quick-xml_ in a pull-style reader and a writer shaped for
//! the namespaced, element-per-PDU documents the protocols exchange. It
//! is not a general purpose XML library.

pub mod decode;
pub mod encode;
