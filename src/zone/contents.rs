//! Zone contents: an immutable-after-publish snapshot of a zone's RR-sets.
//!
//! Grounded on the `contents: Arc<tokio::sync::Mutex<Option<ZoneContents>>>`
//! handle pattern in `zone/mod.rs`'s `ZoneState`: a zone may have no contents
//! at all (a stub awaiting bootstrap AXFR), and once loaded the contents are
//! replaced wholesale rather than mutated record-by-record, so ordinary
//! shared references are sufficient for concurrent readers (§3 Zone contents,
//! §5 concurrency model).

use std::collections::BTreeMap;

use bytes::Bytes;
use domain::base::{Name, Serial};
use domain::rdata::Soa;

use crate::changeset::{Changeset, ResourceRecord};

//----------- ZoneContents --------------------------------------------------------

/// A zone's RR-sets as of a given apex SOA serial.
///
/// Produced once by a zone loader (AXFR bootstrap, zone file load, or
/// journal-apply replay) and never mutated afterwards; a new version is
/// built and the old [`ZoneContents`] is dropped in its entirety.
#[derive(Clone, Debug)]
pub struct ZoneContents {
    origin: Name<Bytes>,
    apex_soa: Soa<Name<Bytes>>,
    records: BTreeMap<Name<Bytes>, Vec<ResourceRecord>>,
}

impl ZoneContents {
    /// Build contents from an apex SOA and the full record set (including
    /// the apex SOA record itself, which callers are not required to
    /// duplicate in `records`).
    pub fn new(origin: Name<Bytes>, apex_soa: Soa<Name<Bytes>>, records: Vec<ResourceRecord>) -> Self {
        let mut by_owner: BTreeMap<Name<Bytes>, Vec<ResourceRecord>> = BTreeMap::new();
        for rr in records {
            by_owner.entry(rr.owner.clone()).or_default().push(rr);
        }
        Self { origin, apex_soa, records: by_owner }
    }

    pub fn origin(&self) -> &Name<Bytes> {
        &self.origin
    }

    /// The apex SOA, always present for loaded contents (§3).
    pub fn apex_soa(&self) -> &Soa<Name<Bytes>> {
        &self.apex_soa
    }

    pub fn serial(&self) -> Serial {
        self.apex_soa.serial()
    }

    /// Records owned by `name`, if any.
    pub fn records_at(&self, name: &Name<Bytes>) -> &[ResourceRecord] {
        self.records.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// Every record in the zone, in owner order. Used by `zoneio.rs` to
    /// dump the whole zone without caring how records are grouped
    /// internally.
    pub fn all_records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.values().flatten()
    }

    /// Whether this snapshot holds no data beyond the apex SOA, i.e. it is
    /// effectively a stub that merely parses. Real bootstrap replaces the
    /// whole snapshot rather than emptying this one out, but the predicate
    /// is kept for loaders that build contents incrementally.
    pub fn is_empty(&self) -> bool {
        self.records.values().all(Vec::is_empty)
    }

    /// Fold a single IXFR changeset into this snapshot: drop `removals`,
    /// append `additions`, and adopt `soa_to` as the new apex SOA (§3
    /// changeset application, §4.1).
    pub fn apply_changeset(&self, changeset: &Changeset) -> Self {
        let mut records = self.records.clone();

        for rr in &changeset.removals {
            if let Some(set) = records.get_mut(&rr.owner) {
                set.retain(|existing| !(existing.rtype == rr.rtype && existing.class == rr.class && existing.data == rr.data));
                if set.is_empty() {
                    records.remove(&rr.owner);
                }
            }
        }

        for rr in &changeset.additions {
            records.entry(rr.owner.clone()).or_default().push(rr.clone());
        }

        let apex_soa = changeset.soa_to.soa_data().cloned().unwrap_or_else(|| self.apex_soa.clone());
        Self { origin: self.origin.clone(), apex_soa, records }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::base::Ttl;

    fn name(s: &str) -> Name<Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    fn soa(serial: u32) -> Soa<Name<Bytes>> {
        Soa::new(
            name("ns1.example."),
            name("hostmaster.example."),
            Serial::from(serial),
            Ttl::from_secs(3600),
            Ttl::from_secs(600),
            Ttl::from_secs(604800),
            Ttl::from_secs(3600),
        )
    }

    fn a_rr(owner: &str) -> ResourceRecord {
        use crate::changeset::RecordData;
        use domain::base::iana::Class;
        use domain::base::Rtype;

        ResourceRecord {
            owner: name(owner),
            rtype: Rtype::A,
            class: Class::IN,
            ttl: Ttl::from_secs(300),
            data: RecordData::Opaque(Bytes::from_static(&[192, 0, 2, 1])),
        }
    }

    #[test]
    fn groups_records_by_owner() {
        let contents = ZoneContents::new(
            name("example."),
            soa(10),
            vec![a_rr("www.example."), a_rr("www.example."), a_rr("mail.example.")],
        );
        assert_eq!(contents.serial(), Serial::from(10));
        assert_eq!(contents.records_at(&name("www.example.")).len(), 2);
        assert_eq!(contents.records_at(&name("mail.example.")).len(), 1);
        assert_eq!(contents.records_at(&name("ghost.example.")).len(), 0);
        assert!(!contents.is_empty());
    }

    #[test]
    fn empty_contents_reports_is_empty() {
        let contents = ZoneContents::new(name("example."), soa(1), vec![]);
        assert!(contents.is_empty());
        assert_eq!(contents.record_count(), 0);
    }

    #[test]
    fn apply_changeset_removes_adds_and_bumps_serial() {
        use crate::changeset::ChangesetBuilder;

        let contents = ZoneContents::new(name("example."), soa(10), vec![a_rr("www.example."), a_rr("mail.example.")]);

        let mut builder = ChangesetBuilder::new();
        builder.remove_rr(a_rr("mail.example."));
        builder.add_rr(a_rr("ftp.example."));
        let changeset =
            builder.build(ResourceRecord::soa(name("example."), Ttl::from_secs(3600), soa(10)), ResourceRecord::soa(name("example."), Ttl::from_secs(3600), soa(11)));

        let updated = contents.apply_changeset(&changeset);
        assert_eq!(updated.serial(), Serial::from(11));
        assert_eq!(updated.records_at(&name("mail.example.")).len(), 0);
        assert_eq!(updated.records_at(&name("www.example.")).len(), 1);
        assert_eq!(updated.records_at(&name("ftp.example.")).len(), 1);
    }
}
