//! Zonefile sync (§4.8).
//!
//! Grounded on `original_source/zones.c: zones_zonefile_sync(_ev)`,
//! `zones_find_free_filename`, `zones_save_zone`: dump the current contents
//! to the text and compiled zone files, swap the compiled file in under a
//! free sidecar name, then clear every journal entry's dirty flag so the
//! journal can be trimmed on the next write. The whole operation holds the
//! per-zone lock (§5 per-zone mutation: "`zonefile_sync` holds the mutex for
//! the entire operation, so a reload and a sync on the same zone
//! serialise"), which is why every step here is synchronous.

use std::sync::Arc;

use crate::error::CoreError;
use crate::metrics::MetricsCollection;
use crate::util;
use crate::zone::ZoneRecord;
use crate::zoneio::ZoneIo;

/// The observable outcome of a sync attempt, used by callers (the periodic
/// timer and tests) to tell "nothing to do" apart from an actual write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The zonefile serial already matched the apex SOA serial.
    UpToDate,
    /// The zone file and journal were written.
    Written,
}

/// Run zonefile-sync for a single zone (§4.8).
///
/// Returns [`CoreError::Invalid`] for a stub zone (no contents yet); there
/// is nothing to dump.
pub fn zonefile_sync(zone: &Arc<ZoneRecord>, io: &dyn ZoneIo, metrics: &MetricsCollection) -> Result<SyncOutcome, CoreError> {
    let mut state = zone.lock();

    let Some(contents) = state.contents.as_ref() else {
        return Err(CoreError::Invalid("zone has no contents to sync".into()));
    };
    let serial_to = contents.serial();

    if state.zonefile_serial == Some(serial_to) {
        return Ok(SyncOutcome::UpToDate);
    }

    let sidecar = util::find_free_sidecar(&state.config.db).ok_or(CoreError::NoMem)?;
    io.dump(contents, &state.config.file)?;
    io.dump_and_swap(contents, &state.config.db, &sidecar)?;

    let mut recovered_from_out_of_space = false;
    if let Some(journal) = state.journal.as_mut() {
        recovered_from_out_of_space = journal.has_dirty_entries();
        journal.clear_all_dirty();
        journal.flush_sync()?;
    }

    state.zonefile_serial = Some(serial_to);
    metrics.record_journal_write(recovered_from_out_of_space);

    Ok(SyncOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zoneio::FileZoneIo;
    use bytes::Bytes;
    use domain::base::{Name, Serial, Ttl};
    use domain::rdata::Soa;

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

    #[test]
    fn stub_zone_refuses_sync() {
        let zone = Arc::new(ZoneRecord::new_stub(name("example.")));
        let metrics = MetricsCollection::new();
        let err = zonefile_sync(&zone, &FileZoneIo, &metrics);
        assert_eq!(err, Err(CoreError::Invalid("zone has no contents to sync".into())));
    }

    #[test]
    fn matching_serial_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let zone = Arc::new(ZoneRecord::new_stub(name("example.")));
        {
            let mut state = zone.lock();
            state.config = Arc::new(crate::config::ZoneConfig::stub(&name("example.")));
            state.config = Arc::new({
                let mut cfg = (*state.config).clone();
                cfg.file = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.zone")).unwrap();
                cfg.db = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.db")).unwrap();
                cfg
            });
            state.contents = Some(crate::zone::contents::ZoneContents::new(name("example."), soa(7), vec![]));
            state.zonefile_serial = Some(Serial::from(7));
        }
        let metrics = MetricsCollection::new();
        let outcome = zonefile_sync(&zone, &FileZoneIo, &metrics).unwrap();
        assert_eq!(outcome, SyncOutcome::UpToDate);
    }

    #[test]
    fn new_serial_writes_and_clears_dirty_journal() {
        let dir = tempfile::tempdir().unwrap();
        let zone = Arc::new(ZoneRecord::new_stub(name("example.")));
        {
            let mut state = zone.lock();
            let mut cfg = (*state.config).clone();
            cfg.file = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.zone")).unwrap();
            cfg.db = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.db")).unwrap();
            state.config = Arc::new(cfg);
            state.contents = Some(crate::zone::contents::ZoneContents::new(name("example."), soa(8), vec![]));

            let journal_path = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.jnl")).unwrap();
            let mut journal = crate::journal::Journal::create(journal_path, 1_000_000).unwrap();
            journal
                .write(
                    crate::journal::JournalKey::make(Serial::from(7), Serial::from(8)),
                    bytes::Bytes::from_static(b"fake"),
                )
                .unwrap();
            state.journal = Some(journal);
        }

        let metrics = MetricsCollection::new();
        let outcome = zonefile_sync(&zone, &FileZoneIo, &metrics).unwrap();
        assert_eq!(outcome, SyncOutcome::Written);
        assert!(!zone.lock().journal.as_ref().unwrap().has_dirty_entries());
        assert_eq!(zone.lock().zonefile_serial, Some(Serial::from(8)));
    }
}
