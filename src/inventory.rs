//! The received-resource inventory and its reconciler.
//!
//! The inventory mirrors what each managed entity currently holds: per
//! entity one `Conf`, per delegating parent one `Parent`, per resource
//! certificate one `ResourceCert` keyed by its publication URI. The
//! ranges a certificate grants live in per-entity pools where identical
//! bounds are shared between certificates of the same entity and
//! reference-counted, so a range disappears exactly when the last
//! certificate granting it does.
//!
//! Reconciliation takes a fresh snapshot of received certificates and
//! folds it into the inventory: new certificates appear, surviving ones
//! have their validity window refreshed and their range set adjusted,
//! and certificates a reported parent no longer grants are dropped.
//! The snapshot is validated in full before anything is touched, so a
//! rejected snapshot leaves the inventory exactly as it was.

use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry;
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use log::info;
use crate::errors::Error;
use crate::proto::listres::ReceivedResources;
use crate::resources::{AddrRange, AsnRange};
use crate::uri;


//------------ ResourceCert --------------------------------------------------

/// One received resource certificate as currently held.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceCert {
    uri: uri::Rsync,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    asn_ranges: Vec<AsnRange>,
    addr_ranges: Vec<AddrRange>,
}

impl ResourceCert {
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

    pub fn addr_ranges(&self) -> &[AddrRange] {
        &self.addr_ranges
    }
}


//------------ Parent --------------------------------------------------------

/// The certificates received from one delegating parent.
#[derive(Clone, Debug, Default)]
struct Parent {
    certs: HashMap<uri::Rsync, ResourceCert>,
}


//------------ Conf ----------------------------------------------------------

/// Everything the inventory knows about one managed entity.
#[derive(Clone, Debug, Default)]
struct Conf {
    parents: HashMap<String, Parent>,

    /// Shared range pools: identical bounds held by several certificates
    /// of this entity are one entry with a reference count.
    asn_pool: HashMap<AsnRange, usize>,
    addr_pool: HashMap<AddrRange, usize>,
}

impl Conf {
    fn acquire_ranges(&mut self, cert: &ResourceCert) {
        for range in &cert.asn_ranges {
            *self.asn_pool.entry(*range).or_insert(0) += 1;
        }
        for range in &cert.addr_ranges {
            *self.addr_pool.entry(*range).or_insert(0) += 1;
        }
    }

    fn release_ranges(&mut self, cert: &ResourceCert) {
        for range in &cert.asn_ranges {
            release(&mut self.asn_pool, range)
        }
        for range in &cert.addr_ranges {
            release(&mut self.addr_pool, range)
        }
    }
}

fn release<T: std::hash::Hash + Eq + Copy>(
    pool: &mut HashMap<T, usize>, range: &T
) {
    if let Entry::Occupied(mut entry) = pool.entry(*range) {
        *entry.get_mut() -= 1;
        if *entry.get() == 0 {
            entry.remove();
        }
    }
}


//------------ ReconcileSummary ----------------------------------------------

/// What one reconciliation run changed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconcileSummary {
    pub certs_created: usize,
    pub certs_updated: usize,
    pub certs_removed: usize,
}


//------------ Inventory -----------------------------------------------------

/// The table of received resources for all managed entities.
#[derive(Debug, Default)]
pub struct Inventory {
    confs: Mutex<HashMap<String, Conf>>,
}

/// # Reconciliation
///
impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a received-resource snapshot into the inventory.
    ///
    /// All reports must belong to the entity named by `conf_handle`.
    /// Parents appearing in the snapshot are synchronized with it:
    /// certificates are created or refreshed by URI, and certificates
    /// the parent no longer reports are removed. Parents absent from
    /// the snapshot are left alone. The snapshot is checked in full
    /// before the first change, so an invalid snapshot changes nothing.
    pub fn reconcile(
        &self, conf_handle: &str, reports: &[ReceivedResources]
    ) -> Result<ReconcileSummary, Error> {
        let mut seen = HashSet::new();
        for report in reports {
            if report.self_handle() != conf_handle {
                return Err(Error::malformed(format!(
                    "report for '{}' in snapshot of '{}'",
                    report.self_handle(), conf_handle
                )))
            }
            if !seen.insert((report.parent_handle(), report.uri())) {
                return Err(Error::conflict(format!(
                    "duplicate certificate {} under parent '{}'",
                    report.uri(), report.parent_handle()
                )))
            }
        }

        // Validation is done. Everything below is infallible, under one
        // lock acquisition.
        let mut confs = self.lock();
        let conf = confs.entry(conf_handle.into()).or_default();
        let mut summary = ReconcileSummary::default();

        // Group the snapshot by parent so stale certificates of reported
        // parents can be identified.
        let mut by_parent: HashMap<&str, Vec<&ReceivedResources>> =
            HashMap::new();
        for report in reports {
            by_parent.entry(report.parent_handle()).or_default()
                .push(report)
        }

        for (parent_handle, reports) in by_parent {
            let parent = conf.parents.entry(parent_handle.into())
                .or_default();

            let mut fresh: HashMap<uri::Rsync, ResourceCert> =
                HashMap::new();
            for report in reports {
                let mut asn_ranges = report.asn_ranges().to_vec();
                asn_ranges.sort();
                asn_ranges.dedup();
                let mut addr_ranges: Vec<_> = report.ipv4_ranges().iter()
                    .chain(report.ipv6_ranges())
                    .copied().collect();
                addr_ranges.sort();
                addr_ranges.dedup();
                fresh.insert(report.uri().clone(), ResourceCert {
                    uri: report.uri().clone(),
                    not_before: report.not_before(),
                    not_after: report.not_after(),
                    asn_ranges,
                    addr_ranges,
                });
            }

            // Drop certificates the parent no longer reports.
            let stale: Vec<_> = parent.certs.keys()
                .filter(|uri| !fresh.contains_key(uri))
                .cloned().collect();
            let mut removed_certs = Vec::new();
            for uri in stale {
                if let Some(cert) = parent.certs.remove(&uri) {
                    removed_certs.push(cert);
                    summary.certs_removed += 1;
                }
            }

            // Upsert the reported ones.
            let mut changed_pairs = Vec::new();
            for (uri, cert) in fresh {
                match parent.certs.entry(uri) {
                    Entry::Vacant(entry) => {
                        changed_pairs.push((None, cert.clone()));
                        entry.insert(cert);
                        summary.certs_created += 1;
                    }
                    Entry::Occupied(mut entry) => {
                        if *entry.get() != cert {
                            changed_pairs.push(
                                (Some(entry.get().clone()), cert.clone())
                            );
                            entry.insert(cert);
                            summary.certs_updated += 1;
                        }
                    }
                }
            }

            // Adjust the shared pools outside the parent borrow.
            for cert in &removed_certs {
                conf.release_ranges(cert)
            }
            for (old, new) in &changed_pairs {
                conf.acquire_ranges(new);
                if let Some(old) = old {
                    conf.release_ranges(old)
                }
            }
        }

        info!(
            "reconciled '{}': {} created, {} updated, {} removed",
            conf_handle, summary.certs_created, summary.certs_updated,
            summary.certs_removed
        );
        Ok(summary)
    }

    /// Removes one certificate, releasing its range references.
    pub fn destroy_cert(
        &self, conf_handle: &str, parent_handle: &str, uri: &uri::Rsync
    ) -> Result<(), Error> {
        let mut confs = self.lock();
        let conf = confs.get_mut(conf_handle).ok_or_else(
            || Error::not_found(format!("conf '{}'", conf_handle))
        )?;
        let parent = conf.parents.get_mut(parent_handle).ok_or_else(
            || Error::not_found(format!("parent '{}'", parent_handle))
        )?;
        let cert = parent.certs.remove(uri).ok_or_else(
            || Error::not_found(format!("certificate {}", uri))
        )?;
        conf.release_ranges(&cert);
        Ok(())
    }
}

/// # Queries
///
impl Inventory {
    /// Returns the certificates an entity holds under one parent.
    pub fn certs(
        &self, conf_handle: &str, parent_handle: &str
    ) -> Vec<ResourceCert> {
        let confs = self.lock();
        let mut res: Vec<_> = confs.get(conf_handle)
            .and_then(|conf| conf.parents.get(parent_handle))
            .map(|parent| parent.certs.values().cloned().collect())
            .unwrap_or_default();
        res.sort_by(|left, right| left.uri.cmp(&right.uri));
        res
    }

    /// Returns all certificates of an entity with their parent handle,
    /// ordered by parent and URI.
    ///
    /// Fails with `NotFound` when the entity is unknown.
    pub fn received_resources(
        &self, conf_handle: &str
    ) -> Result<Vec<(String, ResourceCert)>, Error> {
        let confs = self.lock();
        let conf = confs.get(conf_handle).ok_or_else(
            || Error::not_found(format!("conf '{}'", conf_handle))
        )?;
        let mut res = Vec::new();
        for (parent_handle, parent) in &conf.parents {
            for cert in parent.certs.values() {
                res.push((parent_handle.clone(), cert.clone()))
            }
        }
        res.sort_by(|left, right| {
            left.0.cmp(&right.0).then_with(|| left.1.uri.cmp(&right.1.uri))
        });
        Ok(res)
    }

    /// Returns the distinct AS ranges an entity currently holds.
    pub fn asn_ranges(&self, conf_handle: &str) -> Vec<AsnRange> {
        let confs = self.lock();
        let mut res: Vec<_> = confs.get(conf_handle)
            .map(|conf| conf.asn_pool.keys().copied().collect())
            .unwrap_or_default();
        res.sort();
        res
    }

    /// Returns the distinct address ranges an entity currently holds.
    pub fn addr_ranges(&self, conf_handle: &str) -> Vec<AddrRange> {
        let confs = self.lock();
        let mut res: Vec<_> = confs.get(conf_handle)
            .map(|conf| conf.addr_pool.keys().copied().collect())
            .unwrap_or_default();
        res.sort();
        res
    }

    /// Returns how many certificates of the entity grant this AS range.
    pub fn asn_range_refs(
        &self, conf_handle: &str, range: AsnRange
    ) -> usize {
        self.lock().get(conf_handle)
            .and_then(|conf| conf.asn_pool.get(&range).copied())
            .unwrap_or(0)
    }

    /// Returns how many certificates of the entity grant this range.
    pub fn addr_range_refs(
        &self, conf_handle: &str, range: AddrRange
    ) -> usize {
        self.lock().get(conf_handle)
            .and_then(|conf| conf.addr_pool.get(&range).copied())
            .unwrap_or(0)
    }
}

impl Inventory {
    fn lock(&self) -> std::sync::MutexGuard<HashMap<String, Conf>> {
        self.confs.lock().expect("poisoned inventory")
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use chrono::TimeZone;
    use crate::resources::AddrFamily;

    fn rsync(s: &str) -> uri::Rsync {
        uri::Rsync::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.ymd(y, m, d).and_hms(0, 0, 0)
    }

    fn report(
        parent: &str, uri: &str, asn: &str, ipv4: &str
    ) -> ReceivedResources {
        ReceivedResources::new(
            "alice", parent, rsync(uri),
            date(2026, 1, 1), date(2027, 1, 1),
            AsnRange::parse_set(asn).unwrap(),
            AddrRange::parse_set(AddrFamily::Ipv4, ipv4).unwrap(),
            Vec::new(),
        )
    }

    #[test]
    fn reconcile_is_idempotent() {
        let inventory = Inventory::new();
        let snapshot = vec![
            report(
                "ripe", "rsync://repo.example.net/repo/a.cer",
                "64496", "192.0.2.0/24"
            ),
            report(
                "ripe", "rsync://repo.example.net/repo/b.cer",
                "64497-64499", ""
            ),
        ];

        let first = inventory.reconcile("alice", &snapshot).unwrap();
        assert_eq!(first.certs_created, 2);

        let second = inventory.reconcile("alice", &snapshot).unwrap();
        assert_eq!(second, ReconcileSummary::default());
        assert_eq!(inventory.certs("alice", "ripe").len(), 2);
    }

    #[test]
    fn identical_ranges_are_shared_within_entity() {
        let inventory = Inventory::new();
        let range = AsnRange::from_str("64496").unwrap();
        inventory.reconcile("alice", &[
            report(
                "ripe", "rsync://repo.example.net/repo/a.cer",
                "64496", ""
            ),
            report(
                "arin", "rsync://repo.example.net/repo/b.cer",
                "64496", ""
            ),
        ]).unwrap();

        // Two certificates, one pool entry with two references.
        assert_eq!(inventory.asn_range_refs("alice", range), 2);
        assert_eq!(inventory.asn_ranges("alice"), vec![range]);

        // A different entity holding the same bounds shares nothing.
        inventory.reconcile("bob", &[
            ReceivedResources::new(
                "bob", "ripe",
                rsync("rsync://repo.example.net/repo/c.cer"),
                date(2026, 1, 1), date(2027, 1, 1),
                vec![range], Vec::new(), Vec::new(),
            ),
        ]).unwrap();
        assert_eq!(inventory.asn_range_refs("alice", range), 2);
        assert_eq!(inventory.asn_range_refs("bob", range), 1);
    }

    #[test]
    fn range_released_with_last_referencing_cert() {
        let inventory = Inventory::new();
        let range = AsnRange::from_str("64496").unwrap();
        inventory.reconcile("alice", &[
            report(
                "ripe", "rsync://repo.example.net/repo/a.cer",
                "64496", ""
            ),
            report(
                "ripe", "rsync://repo.example.net/repo/b.cer",
                "64496", ""
            ),
        ]).unwrap();

        inventory.destroy_cert(
            "alice", "ripe",
            &rsync("rsync://repo.example.net/repo/a.cer")
        ).unwrap();
        assert_eq!(inventory.asn_range_refs("alice", range), 1);

        inventory.destroy_cert(
            "alice", "ripe",
            &rsync("rsync://repo.example.net/repo/b.cer")
        ).unwrap();
        assert_eq!(inventory.asn_range_refs("alice", range), 0);
        assert!(inventory.asn_ranges("alice").is_empty());
    }

    #[test]
    fn refresh_updates_validity_and_ranges() {
        let inventory = Inventory::new();
        inventory.reconcile("alice", &[
            report(
                "ripe", "rsync://repo.example.net/repo/a.cer",
                "64496", "192.0.2.0/24"
            ),
        ]).unwrap();

        // Same certificate, re-issued with a later window and an
        // extra range.
        let renewed = ReceivedResources::new(
            "alice", "ripe",
            rsync("rsync://repo.example.net/repo/a.cer"),
            date(2026, 6, 1), date(2027, 6, 1),
            AsnRange::parse_set("64496,64497").unwrap(),
            AddrRange::parse_set(
                AddrFamily::Ipv4, "192.0.2.0/24"
            ).unwrap(),
            Vec::new(),
        );
        let summary = inventory.reconcile("alice", &[renewed]).unwrap();
        assert_eq!(summary.certs_updated, 1);

        let certs = inventory.certs("alice", "ripe");
        assert_eq!(certs[0].not_before(), date(2026, 6, 1));
        assert_eq!(certs[0].asn_ranges().len(), 2);
        assert_eq!(
            inventory.addr_range_refs(
                "alice", AddrRange::from_str("192.0.2.0/24").unwrap()
            ),
            1
        );
    }

    #[test]
    fn stale_certs_of_reported_parent_are_dropped() {
        let inventory = Inventory::new();
        inventory.reconcile("alice", &[
            report(
                "ripe", "rsync://repo.example.net/repo/a.cer",
                "64496", ""
            ),
            report(
                "arin", "rsync://repo.example.net/repo/b.cer",
                "64497", ""
            ),
        ]).unwrap();

        // The next snapshot only mentions ripe and no longer carries
        // a.cer. The arin holdings stay untouched.
        let summary = inventory.reconcile("alice", &[
            report(
                "ripe", "rsync://repo.example.net/repo/a2.cer",
                "64496", ""
            ),
        ]).unwrap();
        assert_eq!(summary.certs_created, 1);
        assert_eq!(summary.certs_removed, 1);
        assert_eq!(inventory.certs("alice", "ripe").len(), 1);
        assert_eq!(inventory.certs("alice", "arin").len(), 1);
    }

    #[test]
    fn invalid_snapshot_changes_nothing() {
        let inventory = Inventory::new();
        inventory.reconcile("alice", &[
            report(
                "ripe", "rsync://repo.example.net/repo/a.cer",
                "64496", ""
            ),
        ]).unwrap();

        // One good report plus one belonging to someone else.
        let err = inventory.reconcile("alice", &[
            report(
                "ripe", "rsync://repo.example.net/repo/a2.cer",
                "64497", ""
            ),
            ReceivedResources::new(
                "mallory", "ripe",
                rsync("rsync://repo.example.net/repo/m.cer"),
                date(2026, 1, 1), date(2027, 1, 1),
                Vec::new(), Vec::new(), Vec::new(),
            ),
        ]).unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::MalformedRequest);

        // The good report in the rejected snapshot was not applied.
        let certs = inventory.certs("alice", "ripe");
        assert_eq!(certs.len(), 1);
        assert_eq!(
            certs[0].uri(),
            &rsync("rsync://repo.example.net/repo/a.cer")
        );
    }
}
