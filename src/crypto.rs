//! Cryptographic keys and signing.
//!
//! The protocol engine treats cryptography as a black box: it needs to
//! verify a signature over a serialized message against a configured trust
//! anchor and to produce such a signature for outgoing replies. Both are
//! provided here on top of _ring_'s Ed25519 implementation. The [`Signer`]
//! trait is the seam for plugging in an HSM-backed implementation later.

use std::{error, fmt};
use bytes::Bytes;
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{self as ringsig, KeyPair as _};


//------------ KeyIdentifier -------------------------------------------------

/// A short identifier of a public key.
///
/// This is the first twenty octets of the SHA-256 digest of the raw public
/// key bits.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct KeyIdentifier([u8; 20]);

impl KeyIdentifier {
    fn from_key_bits(bits: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, bits);
        let mut res = [0u8; 20];
        res.copy_from_slice(&digest.as_ref()[..20]);
        KeyIdentifier(res)
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for ch in self.0.iter() {
            write!(f, "{:02x}", ch)?
        }
        Ok(())
    }
}


//------------ PublicKey -----------------------------------------------------

/// An Ed25519 public key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublicKey(Bytes);

impl PublicKey {
    /// Creates a public key from its raw bits.
    pub fn from_bits(bits: Bytes) -> Self {
        PublicKey(bits)
    }

    /// Creates a public key from its base64 encoding.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        base64::decode(s)
            .map(|bits| PublicKey(Bytes::from(bits)))
            .map_err(|_| KeyError)
    }

    /// Returns the base64 encoding of the key bits.
    pub fn to_base64(&self) -> String {
        base64::encode(&self.0)
    }

    pub fn bits(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn key_identifier(&self) -> KeyIdentifier {
        KeyIdentifier::from_key_bits(self.bits())
    }

    /// Verifies a signature over a message using this public key.
    pub fn verify(
        &self, message: &[u8], signature: &Signature
    ) -> Result<(), VerificationError> {
        ringsig::UnparsedPublicKey::new(&ringsig::ED25519, self.bits())
            .verify(message, signature.value())
            .map_err(|_| VerificationError)
    }
}


//------------ Signature -----------------------------------------------------

/// A signature over some data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Signature(Bytes);

impl Signature {
    pub fn new(value: Bytes) -> Self {
        Signature(value)
    }

    /// Creates a signature from its base64 encoding.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        base64::decode(s)
            .map(|value| Signature(Bytes::from(value)))
            .map_err(|_| KeyError)
    }

    /// Returns the base64 encoding of the signature.
    pub fn to_base64(&self) -> String {
        base64::encode(&self.0)
    }

    pub fn value(&self) -> &[u8] {
        self.0.as_ref()
    }
}


//------------ Signer --------------------------------------------------------

/// A type that can sign protocol messages.
pub trait Signer {
    type Error: fmt::Debug + fmt::Display;

    /// Returns the public key matching the signing key.
    fn public_key(&self) -> PublicKey;

    /// Signs the given data.
    fn sign(&self, data: &[u8]) -> Result<Signature, Self::Error>;
}


//------------ SoftSigner ----------------------------------------------------

/// A signer with a key pair held in memory.
///
/// Good enough for tests and small deployments. Anything that cares about
/// key custody should implement [`Signer`] on top of real key storage.
pub struct SoftSigner {
    key_pair: ringsig::Ed25519KeyPair,
}

impl SoftSigner {
    /// Creates a signer with a freshly generated key pair.
    pub fn new() -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let pkcs8 = ringsig::Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| KeyError)?;
        Self::from_pkcs8(pkcs8.as_ref())
    }

    /// Creates a signer from a PKCS#8 encoded key pair.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, KeyError> {
        ringsig::Ed25519KeyPair::from_pkcs8(pkcs8)
            .map(|key_pair| SoftSigner { key_pair })
            .map_err(|_| KeyError)
    }
}

impl Signer for SoftSigner {
    type Error = KeyError;

    fn public_key(&self) -> PublicKey {
        PublicKey(Bytes::copy_from_slice(
            self.key_pair.public_key().as_ref()
        ))
    }

    fn sign(&self, data: &[u8]) -> Result<Signature, Self::Error> {
        Ok(Signature(Bytes::copy_from_slice(
            self.key_pair.sign(data).as_ref()
        )))
    }
}


//------------ VerificationError ---------------------------------------------

/// A signature did not verify.
///
/// Carries no detail; _ring_ does not provide any.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VerificationError;

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("signature verification failed")
    }
}

impl error::Error for VerificationError { }


//------------ KeyError ------------------------------------------------------

/// A key or signature could not be created or decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyError;

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid key material")
    }
}

impl error::Error for KeyError { }


//------------ Tests ---------------------------------------------------------
