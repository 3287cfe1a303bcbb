//! Zone records and the database that indexes them (§3, §4.4).
//!
//! Grounded on `zone/mod.rs`'s `Zone { name, state: Mutex<ZoneState> }`
//! shape, its `ZoneByName`/`ZoneByPtr` newtype wrappers, and the debounced
//! `mark_dirty` save idiom (`tokio::spawn` + `sleep` + `task::id()`
//! race-check), generalised from a DNSSEC-pipeline zone to the
//! master/slave zone record described in §3.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use domain::base::{Name, Serial};

use crate::acl::AclSet;
use crate::config::ZoneConfig;
use crate::error::CoreError;
use crate::journal::Journal;
use crate::notify::NotifyEvent;
use crate::util::AbortOnDrop;

pub mod contents;
pub mod database;

pub use contents::ZoneContents;
pub use database::{PublishedZoneDatabase, ZoneDatabase, ZoneDatabaseBuilder};

//----------- ZoneRecord -----------------------------------------------------------

/// Per-zone mutable state, exclusively owned by exactly one entry of the
/// active [`ZoneDatabase`] (§3 Zone record).
#[derive(Debug)]
pub struct ZoneRecord {
    pub name: Name<Bytes>,
    state: Mutex<ZoneRecordState>,
}

/// Everything the per-zone lock protects (§5 per-zone mutation).
#[derive(Debug)]
pub struct ZoneRecordState {
    /// Current contents snapshot, or absent for a stub awaiting bootstrap.
    pub contents: Option<ZoneContents>,

    /// Configuration view (name, paths, timeouts, retries): rebuilt, never
    /// mutated in place, on every reload.
    pub config: Arc<ZoneConfig>,

    /// Inbound transfer state (§3 `xfr_in.*`).
    pub xfr_in: XfrInState,

    /// Compiled ACL sets, rebuilt (never mutated) on reload (§4.2, §4.9).
    pub acl: ZoneAclSets,

    /// This zone's changeset journal, opened once per record lifetime.
    pub journal: Option<Journal>,

    /// Serial last written to the text zonefile.
    pub zonefile_serial: Option<Serial>,

    /// Pending NOTIFY events, keyed by an opaque event id.
    pub notify_pending: Vec<NotifyEvent>,

    /// Handles of currently running NOTIFY-send tasks, keyed by the same
    /// id as the matching `notify_pending` entry; pruned whenever a new
    /// one is scheduled (§4.7).
    pub notify_timers: Vec<(u64, AbortOnDrop)>,

    /// The zonefile-sync timer, rearmed unconditionally on every fire
    /// (§4.5 Zonefile-sync event).
    pub sync_timer: Option<AbortOnDrop>,
}

/// Inbound transfer (REFRESH/RETRY/EXPIRE) state (§3, §4.5).
#[derive(Debug, Default)]
pub struct XfrInState {
    /// Socket address of the authoritative master (§6 `address, family,
    /// port`). Absent means this zone is itself an authoritative origin
    /// and no REFRESH is scheduled.
    pub master: Option<SocketAddr>,

    /// At most one REFRESH/RETRY timer at a time.
    pub timer: Option<AbortOnDrop>,

    /// At most one EXPIRE timer at a time; armed iff a SOA probe has been
    /// issued without a valid answer since the last successful refresh.
    pub expire: Option<AbortOnDrop>,

    /// The message id of the awaited SOA response.
    ///
    /// Modelled as an explicit `Option<u16>` rather than an out-of-band
    /// sentinel value, since it is unclear whether a real implementation
    /// ever legitimately awaits id `0xFFFF` (§9 open question 1).
    pub next_id: Option<u16>,
}

/// The four ACL sets attached to a zone (§3 `acl.*`).
#[derive(Clone, Debug, Default)]
pub struct ZoneAclSets {
    pub xfr_in: AclSet,
    pub xfr_out: AclSet,
    pub notify_in: AclSet,
    pub notify_out: AclSet,
}

impl ZoneAclSets {
    pub fn build(config: &crate::config::ZoneAcls) -> Self {
        Self {
            xfr_in: AclSet::build(&config.xfr_in),
            xfr_out: AclSet::build(&config.xfr_out),
            notify_in: AclSet::build(&config.notify_in),
            notify_out: AclSet::build(&config.notify_out),
        }
    }
}

impl ZoneRecord {
    /// Construct a new zone record with no contents (a stub), per §4.4
    /// construction step 1-2 before the journal is opened.
    pub fn new_stub(name: Name<Bytes>) -> Self {
        Self {
            name: name.clone(),
            state: Mutex::new(ZoneRecordState {
                contents: None,
                config: Arc::new(ZoneConfig::stub(&name)),
                xfr_in: XfrInState::default(),
                acl: ZoneAclSets::default(),
                journal: None,
                zonefile_serial: None,
                notify_pending: Vec::new(),
                notify_timers: Vec::new(),
                sync_timer: None,
            }),
        }
    }

    pub fn with_contents(name: Name<Bytes>, config: Arc<ZoneConfig>, contents: ZoneContents) -> Self {
        let zonefile_serial = Some(contents.serial());
        Self {
            name,
            state: Mutex::new(ZoneRecordState {
                contents: Some(contents),
                config,
                xfr_in: XfrInState::default(),
                acl: ZoneAclSets::default(),
                journal: None,
                zonefile_serial,
                notify_pending: Vec::new(),
                notify_timers: Vec::new(),
                sync_timer: None,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ZoneRecordState> {
        self.state.lock().unwrap()
    }

    /// Whether this zone is awaiting bootstrap AXFR (no contents loaded).
    pub fn is_stub(&self) -> bool {
        self.lock().contents.is_none()
    }

    /// The apex SOA serial, if contents are loaded.
    pub fn serial(&self) -> Option<Serial> {
        self.lock().contents.as_ref().map(ZoneContents::serial)
    }
}

impl ZoneRecordState {
    /// Open the zone's journal at `config.ixfr_db`, creating it if absent
    /// (§4.4 construction step 2).
    pub fn open_journal(&mut self) -> Result<(), CoreError> {
        use crate::error::JournalOpenError;

        let path = self.config.ixfr_db.clone();
        let limit = self.config.ixfr_fslimit;
        let journal = match Journal::open(path.clone(), limit) {
            Ok(journal) => journal,
            Err(JournalOpenError::NotFound) => Journal::create(path, limit)?,
            Err(JournalOpenError::Corrupt) => return Err(CoreError::Corrupt("journal header failed validation".into())),
            Err(JournalOpenError::TooOld) => return Err(CoreError::Corrupt("journal format is too old".into())),
        };
        self.journal = Some(journal);
        Ok(())
    }
}

//----------- ZoneByName -------------------------------------------------------

/// A [`ZoneRecord`] keyed by its name.
#[derive(Clone)]
pub struct ZoneByName(pub Arc<ZoneRecord>);

impl Borrow<Name<Bytes>> for ZoneByName {
    fn borrow(&self) -> &Name<Bytes> {
        &self.0.name
    }
}

impl PartialEq for ZoneByName {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for ZoneByName {}

impl PartialOrd for ZoneByName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ZoneByName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.name.cmp(&other.0.name)
    }
}

impl Hash for ZoneByName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state)
    }
}

impl fmt::Debug for ZoneByName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//----------- ZoneByPtr --------------------------------------------------------

/// A [`ZoneRecord`] keyed by its address in memory, used to tell two
/// in-memory versions of the "same" configured zone apart (§4.9 step 3).
#[derive(Clone)]
pub struct ZoneByPtr(pub Arc<ZoneRecord>);

impl PartialEq for ZoneByPtr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ZoneByPtr {}

impl Hash for ZoneByPtr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).cast::<()>().hash(state)
    }
}

impl fmt::Debug for ZoneByPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name<Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    #[test]
    fn stub_record_has_no_contents() {
        let record = ZoneRecord::new_stub(name("example."));
        assert!(record.is_stub());
        assert_eq!(record.serial(), None);
    }

    #[test]
    fn zone_by_name_equality_ignores_instance() {
        let a = ZoneByName(Arc::new(ZoneRecord::new_stub(name("example."))));
        let b = ZoneByName(Arc::new(ZoneRecord::new_stub(name("example."))));
        assert_eq!(a, b);

        let a_ptr = ZoneByPtr(a.0.clone());
        let b_ptr = ZoneByPtr(b.0.clone());
        assert_ne!(a_ptr, b_ptr, "distinct instances must compare unequal by pointer");
    }
}
