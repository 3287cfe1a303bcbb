//! The `zone_textio` / `zone_binio` external interface boundary (§6).
//!
//! Like `xfr_engine`, real zone file parsing/writing is an out-of-scope
//! external collaborator; this module fixes the trait boundary
//! `sync.rs` and `reload.rs` call through and ships one concrete,
//! self-contained implementation so the crate is runnable without a real
//! BIND-style zone file parser, the same way `changeset.rs` ships its own
//! internally-consistent binary framing instead of depending on
//! `wire_codec`.

use std::time::SystemTime;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use camino::Utf8Path;
use domain::base::Name;
use domain::rdata::Soa;

use crate::changeset::ResourceRecord;
use crate::error::{CoreError, ZoneLoadError};
use crate::zone::ZoneContents;

//----------- ZoneIo --------------------------------------------------------------

/// `zone_textio`/`zone_binio` combined (§6): the pair is always used
/// together in `zonefile_sync` and `reload`, so one trait covers both.
pub trait ZoneIo: Send + Sync {
    /// Write the text zone file (`zone_textio.dump`).
    fn dump(&self, contents: &ZoneContents, path: &Utf8Path) -> Result<(), CoreError>;

    /// Write the compiled zone file and atomically swap it into place
    /// (`zone_binio.dump_and_swap`), using `sidecar` as scratch space.
    fn dump_and_swap(&self, contents: &ZoneContents, db_path: &Utf8Path, sidecar: &Utf8Path) -> Result<(), CoreError>;

    /// Load a compiled zone file (`zone_binio.load`).
    fn load(&self, path: &Utf8Path) -> Result<ZoneContents, ZoneLoadError>;

    /// Whether the on-disk compiled zone file is newer than the in-memory
    /// version it was last loaded from (`zone_binio.needs_update`, §4.9
    /// step 3: strictly-greater-than, not greater-or-equal).
    fn needs_update(&self, db_path: &Utf8Path, in_memory_version: SystemTime) -> bool {
        let Ok(metadata) = std::fs::metadata(db_path) else {
            return false;
        };
        let Ok(mtime) = metadata.modified() else {
            return false;
        };
        mtime > in_memory_version
    }
}

//----------- FileZoneIo -----------------------------------------------------------

/// A concrete [`ZoneIo`] backed by a small self-contained binary format:
/// a serial, then a count-prefixed list of records encoded the same way
/// `changeset.rs` encodes them.
#[derive(Debug, Default)]
pub struct FileZoneIo;

impl ZoneIo for FileZoneIo {
    fn dump(&self, contents: &ZoneContents, path: &Utf8Path) -> Result<(), CoreError> {
        crate::util::write_file(path, &encode(contents))?;
        Ok(())
    }

    fn dump_and_swap(&self, contents: &ZoneContents, db_path: &Utf8Path, sidecar: &Utf8Path) -> Result<(), CoreError> {
        crate::util::write_file(sidecar, &encode(contents))?;
        std::fs::rename(sidecar, db_path)?;
        Ok(())
    }

    fn load(&self, path: &Utf8Path) -> Result<ZoneContents, ZoneLoadError> {
        let raw = std::fs::read(path).map_err(|err| ZoneLoadError::Other(err.to_string()))?;
        decode(&raw)
    }
}

fn encode(contents: &ZoneContents) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let origin = contents.origin().as_octets();
    buf.put_u16(origin.len() as u16);
    buf.put_slice(origin);

    let soa_rr = ResourceRecord::soa(contents.origin().clone(), domain::base::Ttl::from_secs(3600), contents.apex_soa().clone());
    soa_rr.write_into(&mut buf);

    let records: Vec<&ResourceRecord> = contents.all_records().collect();
    buf.put_u32(records.len() as u32);
    for rr in records {
        rr.write_into(&mut buf);
    }
    buf.to_vec()
}

fn decode(raw: &[u8]) -> Result<ZoneContents, ZoneLoadError> {
    if raw.len() < 2 {
        return Err(ZoneLoadError::FewData);
    }
    let mut buf = Bytes::copy_from_slice(raw);
    let origin_len = buf.get_u16() as usize;
    if buf.remaining() < origin_len {
        return Err(ZoneLoadError::FewData);
    }
    let origin_bytes = buf.copy_to_bytes(origin_len);
    let origin = Name::from_octets(origin_bytes).map_err(|_| ZoneLoadError::Malformed("invalid origin name".into()))?;

    let soa_rr = ResourceRecord::read_from(&mut buf).map_err(|err| ZoneLoadError::Malformed(err.to_string()))?;
    let apex_soa = soa_rr.soa_data().ok_or_else(|| ZoneLoadError::Malformed("first record is not an SOA".into()))?;

    if buf.remaining() < 4 {
        return Err(ZoneLoadError::FewData);
    }
    let count = buf.get_u32() as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(ResourceRecord::read_from(&mut buf).map_err(|err| ZoneLoadError::Malformed(err.to_string()))?);
    }

    Ok(ZoneContents::new(origin, apex_soa, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::base::Serial;

    fn name(s: &str) -> Name<Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    fn soa(serial: u32) -> Soa<Name<Bytes>> {
        use domain::base::Ttl;
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
    fn dump_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let io = FileZoneIo;
        let contents = ZoneContents::new(name("example."), soa(5), vec![]);

        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.db")).unwrap();
        io.dump(&contents, &path).unwrap();

        let loaded = io.load(&path).unwrap();
        assert_eq!(loaded.serial(), Serial::from(5));
        assert_eq!(loaded.origin(), &name("example."));
    }

    #[test]
    fn needs_update_is_strictly_greater_than() {
        let dir = tempfile::tempdir().unwrap();
        let io = FileZoneIo;
        let contents = ZoneContents::new(name("example."), soa(1), vec![]);
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.db")).unwrap();
        io.dump(&contents, &path).unwrap();

        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(!io.needs_update(&path, mtime), "equal mtimes must not trigger a reload");
        assert!(io.needs_update(&path, mtime - std::time::Duration::from_secs(1)));
    }
}
