//! The client registry.
//!
//! One row per publication client, keyed by the client handle. The
//! registry is the authority for two per-client facts: which trust
//! anchor authenticates the client, and which rsync URI namespace the
//! client is confined to. All mutation goes through the action methods
//! which validate fully before touching the table, so a failed action
//! leaves no partial state behind.

use std::collections::HashMap;
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use crate::crypto::PublicKey;
use crate::errors::{Error, ErrorCode};
use crate::uri;


//------------ Client --------------------------------------------------------

/// One registered publication client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Client {
    handle: String,
    base_uri: uri::Rsync,
    bpki_cert: PublicKey,
    bpki_glue: Option<PublicKey>,
    last_seen: Option<DateTime<Utc>>,
}

impl Client {
    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn base_uri(&self) -> &uri::Rsync {
        &self.base_uri
    }

    pub fn bpki_cert(&self) -> &PublicKey {
        &self.bpki_cert
    }

    pub fn bpki_glue(&self) -> Option<&PublicKey> {
        self.bpki_glue.as_ref()
    }

    /// The signing time of the last message accepted from this client.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Checks that `target` lies inside the client's URI namespace.
    pub fn check_allowed_uri(
        &self, target: &uri::Rsync
    ) -> Result<(), Error> {
        if self.base_uri.contains(target) {
            Ok(())
        }
        else {
            Err(Error::new(
                ErrorCode::ForbiddenUri,
                format!(
                    "uri {} outside namespace {} of client '{}'",
                    target, self.base_uri, self.handle
                )
            ))
        }
    }
}


//------------ Registry ------------------------------------------------------

/// The table of registered clients.
#[derive(Debug, Default)]
pub struct Registry {
    clients: Mutex<HashMap<String, Client>>,
}

/// # Actions
///
impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new client row.
    ///
    /// The handle is the natural key and must not exist yet.
    pub fn create(
        &self,
        handle: &str,
        base_uri: uri::Rsync,
        bpki_cert: PublicKey,
        bpki_glue: Option<PublicKey>,
    ) -> Result<Client, Error> {
        let mut clients = self.lock();
        if clients.contains_key(handle) {
            return Err(Error::conflict(
                format!("client '{}' already exists", handle)
            ))
        }
        let client = Client {
            handle: handle.into(),
            base_uri,
            bpki_cert,
            bpki_glue,
            last_seen: None,
        };
        clients.insert(handle.into(), client.clone());
        Ok(client)
    }

    /// Updates an existing client row.
    ///
    /// Only the fields given as `Some` change. Setting
    /// `clear_replay_protection` forgets the last accepted signing time
    /// so the client can restart after losing its clock state.
    pub fn set(
        &self,
        handle: &str,
        base_uri: Option<uri::Rsync>,
        bpki_cert: Option<PublicKey>,
        bpki_glue: Option<PublicKey>,
        clear_replay_protection: bool,
    ) -> Result<Client, Error> {
        let mut clients = self.lock();
        let client = clients.get_mut(handle).ok_or_else(
            || not_found(handle)
        )?;
        if let Some(base_uri) = base_uri {
            client.base_uri = base_uri
        }
        if let Some(bpki_cert) = bpki_cert {
            client.bpki_cert = bpki_cert
        }
        if let Some(bpki_glue) = bpki_glue {
            client.bpki_glue = Some(bpki_glue)
        }
        if clear_replay_protection {
            client.last_seen = None
        }
        Ok(client.clone())
    }

    /// Returns the client row for a handle.
    pub fn get(&self, handle: &str) -> Result<Client, Error> {
        self.lock().get(handle).cloned().ok_or_else(|| not_found(handle))
    }

    /// Returns all client rows ordered by handle.
    pub fn list(&self) -> Vec<Client> {
        let mut res: Vec<_> = self.lock().values().cloned().collect();
        res.sort_by(|left, right| left.handle.cmp(&right.handle));
        res
    }

    /// Removes a client row.
    pub fn destroy(&self, handle: &str) -> Result<(), Error> {
        match self.lock().remove(handle) {
            Some(_) => Ok(()),
            None => Err(not_found(handle))
        }
    }
}

/// # Replay Protection
///
impl Registry {
    /// Accepts a signing time from a client, advancing its replay state.
    ///
    /// The time must be strictly greater than the last accepted one.
    /// On success the new time is recorded in the same critical section,
    /// so two concurrent messages with the same time cannot both pass.
    pub fn advance_last_seen(
        &self, handle: &str, signing_time: DateTime<Utc>
    ) -> Result<(), Error> {
        let mut clients = self.lock();
        let client = clients.get_mut(handle).ok_or_else(
            || not_found(handle)
        )?;
        if let Some(last_seen) = client.last_seen {
            if signing_time <= last_seen {
                return Err(Error::new(
                    ErrorCode::ReplayDetected,
                    format!(
                        "signing time {} not after {}",
                        signing_time, last_seen
                    )
                ))
            }
        }
        client.last_seen = Some(signing_time);
        Ok(())
    }
}

impl Registry {
    fn lock(&self) -> std::sync::MutexGuard<HashMap<String, Client>> {
        self.clients.lock().expect("poisoned client registry")
    }
}

fn not_found(handle: &str) -> Error {
    Error::not_found(format!("client '{}'", handle))
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use chrono::TimeZone;
    use crate::crypto::SoftSigner;
    use crate::crypto::Signer;

    fn key() -> PublicKey {
        SoftSigner::new().unwrap().public_key()
    }

    fn rsync(s: &str) -> uri::Rsync {
        uri::Rsync::from_str(s).unwrap()
    }

    #[test]
    fn create_is_unique_by_handle() {
        let registry = Registry::new();
        registry.create(
            "alice", rsync("rsync://repo.example.net/repo/alice/"),
            key(), None
        ).unwrap();
        let err = registry.create(
            "alice", rsync("rsync://repo.example.net/repo/other/"),
            key(), None
        ).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);

        // The failed create must not have touched the row.
        assert_eq!(
            registry.get("alice").unwrap().base_uri(),
            &rsync("rsync://repo.example.net/repo/alice/")
        );
    }

    #[test]
    fn set_updates_only_given_fields() {
        let registry = Registry::new();
        let cert = key();
        registry.create(
            "alice", rsync("rsync://repo.example.net/repo/alice/"),
            cert.clone(), None
        ).unwrap();

        let updated = registry.set(
            "alice",
            Some(rsync("rsync://repo.example.net/moved/alice/")),
            None, None, false
        ).unwrap();
        assert_eq!(
            updated.base_uri(),
            &rsync("rsync://repo.example.net/moved/alice/")
        );
        assert_eq!(updated.bpki_cert(), &cert);

        let err = registry.set(
            "bob", None, None, None, false
        ).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn clear_replay_protection_resets_last_seen() {
        let registry = Registry::new();
        registry.create(
            "alice", rsync("rsync://repo.example.net/repo/alice/"),
            key(), None
        ).unwrap();

        let t1 = Utc.ymd(2026, 5, 1).and_hms(12, 0, 0);
        registry.advance_last_seen("alice", t1).unwrap();
        assert_eq!(registry.get("alice").unwrap().last_seen(), Some(t1));

        // Same time again is a replay.
        let err = registry.advance_last_seen("alice", t1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReplayDetected);

        registry.set("alice", None, None, None, true).unwrap();
        assert_eq!(registry.get("alice").unwrap().last_seen(), None);
        registry.advance_last_seen("alice", t1).unwrap();
    }

    #[test]
    fn uri_authorization_is_containment() {
        let registry = Registry::new();
        let client = registry.create(
            "alice", rsync("rsync://repo.example.net/repo/alice/"),
            key(), None
        ).unwrap();

        client.check_allowed_uri(
            &rsync("rsync://repo.example.net/repo/alice/certs/ee.cer")
        ).unwrap();
        let err = client.check_allowed_uri(
            &rsync("rsync://repo.example.net/repo/bob/ee.cer")
        ).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ForbiddenUri);
    }

    #[test]
    fn list_is_sorted_and_destroy_removes() {
        let registry = Registry::new();
        for handle in ["carol", "alice", "bob"].iter() {
            registry.create(
                handle,
                rsync(&format!(
                    "rsync://repo.example.net/repo/{}/", handle
                )),
                key(), None
            ).unwrap();
        }
        let handles: Vec<_> = registry.list().iter()
            .map(|client| client.handle().to_string()).collect();
        assert_eq!(handles, ["alice", "bob", "carol"]);

        registry.destroy("bob").unwrap();
        assert_eq!(
            registry.destroy("bob").unwrap_err().code(),
            ErrorCode::NotFound
        );
        assert_eq!(registry.list().len(), 2);
    }
}
