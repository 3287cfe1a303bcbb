//! The append-only keyed changeset journal (§3 Journal entry, §4.1).
//!
//! Grounded on `original_source/src/knot/server/zones.c`: `ixfrdb_key_from`,
//! `ixfrdb_key_to`, `ixfrdb_key_from_cmp`, `ixfrdb_key_to_cmp`,
//! `ixfrdb_key_make`, `zones_ixfrdb_sync_apply`, `zones_load_changesets`.
//!
//! The journal here is an in-memory ring bounded by a byte-size budget,
//! persisted to a single flat file on sync; a real deployment would use a
//! proper embedded store, but the ring-with-dirty-flags contract in §4.1 is
//! what callers depend on, not the storage engine behind it.

use std::collections::BTreeMap;

use bytes::Bytes;
use camino::Utf8PathBuf;
use domain::base::Serial;
use tokio::io::AsyncWriteExt;

use crate::changeset::Changeset;
use crate::error::{CoreError, JournalOpenError};

//----------- JournalKey ----------------------------------------------------------

/// The composite key `(serial_to << 32) | serial_from` (§3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct JournalKey(u64);

impl JournalKey {
    pub fn make(serial_from: Serial, serial_to: Serial) -> Self {
        Self((u64::from(serial_to.into_int()) << 32) | u64::from(serial_from.into_int()))
    }

    pub fn serial_from(self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }

    pub fn serial_to(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// Matches entries that *begin at* serial `s` (`ixfrdb_key_from_cmp`).
pub fn cmp_from(key: JournalKey, s: Serial) -> bool {
    key.serial_from() == s.into_int()
}

/// Matches entries that *end at* serial `s` (`ixfrdb_key_to_cmp`).
pub fn cmp_to(key: JournalKey, s: Serial) -> bool {
    key.serial_to() == s.into_int()
}

//----------- JournalEntry --------------------------------------------------------

#[derive(Clone, Debug)]
struct JournalEntry {
    bytes: Bytes,
    dirty: bool,
}

//----------- Journal --------------------------------------------------------------

/// A single zone's changeset journal.
#[derive(Debug)]
pub struct Journal {
    path: Utf8PathBuf,
    size_limit: u64,
    used: u64,
    entries: BTreeMap<JournalKey, JournalEntry>,
}

impl Journal {
    /// Open an existing journal file, or fail with [`JournalOpenError::NotFound`]
    /// so the caller can [`Journal::create`] one (§4.1).
    pub fn open(path: Utf8PathBuf, size_limit: u64) -> Result<Self, JournalOpenError> {
        if !path.exists() {
            return Err(JournalOpenError::NotFound);
        }
        let raw = std::fs::read(&path).map_err(|_| JournalOpenError::Corrupt)?;
        let entries = decode_entries(&raw).ok_or(JournalOpenError::Corrupt)?;
        let used = entries.values().map(|e| e.bytes.len() as u64).sum();
        Ok(Self { path, size_limit, used, entries })
    }

    /// Create a fresh, empty journal file and open it.
    pub fn create(path: Utf8PathBuf, size_limit: u64) -> Result<Self, CoreError> {
        crate::util::write_file(&path, &[])?;
        Ok(Self { path, size_limit, used: 0, entries: BTreeMap::new() })
    }

    /// Write a changeset's binary form to the journal (§4.1).
    ///
    /// Fails with [`CoreError::OutOfSpace`] when `size_limit` would be
    /// exceeded; the caller must run zonefile-sync to reclaim space and
    /// retry, per the protocol in §4.1.
    pub fn write(&mut self, key: JournalKey, bytes: Bytes) -> Result<(), CoreError> {
        let added = bytes.len() as u64;
        if self.used.saturating_add(added) > self.size_limit {
            return Err(CoreError::OutOfSpace);
        }
        self.used += added;
        self.entries.insert(key, JournalEntry { bytes, dirty: true });
        Ok(())
    }

    pub fn read(&self, key: JournalKey) -> Option<Bytes> {
        self.entries.get(&key).map(|e| e.bytes.clone())
    }

    /// Position a cursor on the first entry satisfying `cmp(key, start)`,
    /// then continue in ascending key order, mirroring `fetch` + iteration
    /// in §4.1.
    pub fn fetch(&self, start: Serial, cmp: impl Fn(JournalKey, Serial) -> bool) -> Vec<(JournalKey, Bytes)> {
        self.entries
            .iter()
            .filter(|(k, _)| cmp(**k, start))
            .map(|(k, e)| (*k, e.bytes.clone()))
            .collect()
    }

    /// Invoke `visitor` for every live entry (`walk`).
    pub fn walk(&self, mut visitor: impl FnMut(JournalKey, bool)) {
        for (key, entry) in &self.entries {
            visitor(*key, entry.dirty);
        }
    }

    /// Clear the dirty flag of `key` (`update`).
    pub fn clear_dirty(&mut self, key: JournalKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.dirty = false;
        }
    }

    /// Clear every entry's dirty flag at once, the `walk` + `update` loop
    /// zonefile-sync performs over the whole journal (§4.8 step 5).
    pub fn clear_all_dirty(&mut self) {
        for entry in self.entries.values_mut() {
            entry.dirty = false;
        }
    }

    /// Whether any entry is still dirty, used by tests to assert the
    /// zonefile-sync postcondition in §8 invariant 3.
    pub fn has_dirty_entries(&self) -> bool {
        self.entries.values().any(|e| e.dirty)
    }

    /// Persist the journal to disk synchronously.
    ///
    /// `zonefile_sync` (§4.8) holds the per-zone lock for its entire body
    /// (§5 per-zone mutation), and a `std::sync::Mutex` guard cannot be
    /// held across an `.await`, so the sync path writes with blocking I/O
    /// rather than `tokio::fs`.
    pub fn flush_sync(&self) -> Result<(), CoreError> {
        let mut buf = Vec::new();
        encode_entries(&self.entries, &mut buf);
        std::fs::write(&self.path, &buf)?;
        Ok(())
    }

    /// Persist the journal to disk. Used outside the zone lock, e.g. when
    /// closing down cleanly.
    pub async fn flush(&self) -> Result<(), CoreError> {
        let mut buf = Vec::new();
        encode_entries(&self.entries, &mut buf);
        let mut file = tokio::fs::File::create(&self.path).await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    pub fn close(self) {
        // Nothing to release explicitly; dropping flushes no further state.
        // Callers that want the final state on disk must `flush().await`
        // before dropping.
    }

    /// Replay the changeset chain starting at `from_serial`, stopping when no
    /// successor exists or the chain cycles back to its own start (§4.10).
    pub fn load_changesets(&self, from_serial: Serial) -> Result<Vec<Changeset>, CoreError> {
        let mut out = Vec::new();
        let mut current = from_serial;
        loop {
            let Some((key, bytes)) = self
                .entries
                .iter()
                .find(|(k, _)| cmp_from(**k, current))
                .map(|(k, e)| (*k, e.bytes.clone()))
            else {
                break;
            };
            let changeset = Changeset::deserialise(bytes)?;
            let next = Serial::from(key.serial_to());
            out.push(changeset);
            if next == from_serial {
                // Cyclic chain; stop to avoid looping forever.
                break;
            }
            current = next;
        }
        Ok(out)
    }
}

fn encode_entries(entries: &BTreeMap<JournalKey, JournalEntry>, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for (key, entry) in entries {
        buf.extend_from_slice(&key.0.to_be_bytes());
        buf.push(entry.dirty as u8);
        buf.extend_from_slice(&(entry.bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(&entry.bytes);
    }
}

fn decode_entries(raw: &[u8]) -> Option<BTreeMap<JournalKey, JournalEntry>> {
    let mut map = BTreeMap::new();
    if raw.is_empty() {
        return Some(map);
    }
    let mut pos = 0usize;
    let count = u32::from_be_bytes(raw.get(pos..pos + 4)?.try_into().ok()?);
    pos += 4;
    for _ in 0..count {
        let key = u64::from_be_bytes(raw.get(pos..pos + 8)?.try_into().ok()?);
        pos += 8;
        let dirty = *raw.get(pos)? != 0;
        pos += 1;
        let len = u32::from_be_bytes(raw.get(pos..pos + 4)?.try_into().ok()?) as usize;
        pos += 4;
        let bytes = Bytes::copy_from_slice(raw.get(pos..pos + len)?);
        pos += len;
        map.insert(JournalKey(key), JournalEntry { bytes, dirty });
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changeset_bytes(from: u32, to: u32) -> Bytes {
        use crate::changeset::{ChangesetBuilder, RecordData, ResourceRecord};
        use domain::base::{Name, Ttl};
        use domain::rdata::Soa;

        let name = |s: &str| Name::<Bytes>::from_str_relaxed(s).unwrap().octets_into();
        let soa = |serial: u32| {
            ResourceRecord::soa(
                name("example."),
                Ttl::from_secs(3600),
                Soa::new(
                    name("ns1.example."),
                    name("hostmaster.example."),
                    Serial::from(serial),
                    Ttl::from_secs(3600),
                    Ttl::from_secs(600),
                    Ttl::from_secs(604800),
                    Ttl::from_secs(3600),
                ),
            )
        };
        let _ = RecordData::Opaque(Bytes::new());
        ChangesetBuilder::new().build(soa(from), soa(to)).serialise()
    }

    #[test]
    fn write_then_fetch_in_apply_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.jnl")).unwrap();
        let mut journal = Journal::create(path, 1_000_000).unwrap();

        journal.write(JournalKey::make(Serial::from(10), Serial::from(11)), changeset_bytes(10, 11)).unwrap();
        journal.write(JournalKey::make(Serial::from(11), Serial::from(12)), changeset_bytes(11, 12)).unwrap();

        let chain = journal.load_changesets(Serial::from(10)).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].serial_to(), Serial::from(11));
        assert_eq!(chain[1].serial_to(), Serial::from(12));
    }

    #[test]
    fn out_of_space_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.jnl")).unwrap();
        let mut journal = Journal::create(path, 10).unwrap();

        let err = journal.write(JournalKey::make(Serial::from(10), Serial::from(11)), changeset_bytes(10, 11));
        assert_eq!(err, Err(CoreError::OutOfSpace));
    }

    #[test]
    fn walk_reports_dirty_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.jnl")).unwrap();
        let mut journal = Journal::create(path, 1_000_000).unwrap();
        let key = JournalKey::make(Serial::from(10), Serial::from(11));
        journal.write(key, changeset_bytes(10, 11)).unwrap();

        assert!(journal.has_dirty_entries());
        journal.clear_dirty(key);
        assert!(!journal.has_dirty_entries());
    }
}
