//! The changeset model and its binary (de)serialisation (§3, §4.3).
//!
//! Grounded on `original_source/src/libknot/updates/changesets.c`: a
//! changeset is `(soa_from, removals, soa_to, additions)`, and its binary
//! form is the concatenation of those four parts in that exact order. The
//! deserialiser recovers the same structure by switching section at each SOA
//! boundary it encounters, which is what makes the format self-delimiting
//! without a separate length table.
//!
//! Individual resource records are assumed already parsed/composed by the
//! (out-of-scope) wire codec; this module only owns the SOA-aware framing
//! that turns a sequence of records into a changeset and back.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use domain::base::iana::Class;
use domain::base::{Name, Rtype, Serial, Ttl};
use domain::rdata::Soa;

use crate::error::CoreError;

//----------- RecordData --------------------------------------------------------

/// A record's RDATA, either a structured SOA (which the changeset framing
/// must recognise) or an opaque blob produced by the wire codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordData {
    Soa(Soa<Name<Bytes>>),
    Opaque(Bytes),
}

//----------- ResourceRecord -----------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRecord {
    pub owner: Name<Bytes>,
    pub rtype: Rtype,
    pub class: Class,
    pub ttl: Ttl,
    pub data: RecordData,
}

impl ResourceRecord {
    pub fn soa(owner: Name<Bytes>, ttl: Ttl, soa: Soa<Name<Bytes>>) -> Self {
        Self { owner, rtype: Rtype::SOA, class: Class::IN, ttl, data: RecordData::Soa(soa) }
    }

    pub fn is_soa(&self) -> bool {
        matches!(self.data, RecordData::Soa(_))
    }

    /// The SOA payload, if this record is one.
    pub fn soa_data(&self) -> Option<&Soa<Name<Bytes>>> {
        match &self.data {
            RecordData::Soa(soa) => Some(soa),
            RecordData::Opaque(_) => None,
        }
    }

    /// Encode this record's wire-ish framing. Exposed crate-wide so
    /// `zoneio.rs` can reuse the same per-record encoding for its own
    /// on-disk format instead of inventing a second one.
    pub(crate) fn write_into(&self, buf: &mut BytesMut) {
        self.write(buf);
    }

    /// Decode a single record written by [`Self::write_into`].
    pub(crate) fn read_from(buf: &mut Bytes) -> Result<Self, CoreError> {
        Self::read(buf)
    }

    fn write(&self, buf: &mut BytesMut) {
        let owner = self.owner.as_octets();
        buf.put_u16(owner.len() as u16);
        buf.put_slice(owner);
        buf.put_u16(self.rtype.to_int());
        buf.put_u16(self.class.to_int());
        buf.put_u32(self.ttl.as_secs());
        match &self.data {
            RecordData::Soa(soa) => {
                buf.put_u8(0);
                write_name(buf, soa.mname());
                write_name(buf, soa.rname());
                buf.put_u32(soa.serial().into_int());
                buf.put_u32(soa.refresh().as_secs());
                buf.put_u32(soa.retry().as_secs());
                buf.put_u32(soa.expire().as_secs());
                buf.put_u32(soa.minimum().as_secs());
            }
            RecordData::Opaque(rdata) => {
                buf.put_u8(1);
                buf.put_u32(rdata.len() as u32);
                buf.put_slice(rdata);
            }
        }
    }

    fn read(buf: &mut Bytes) -> Result<Self, CoreError> {
        let owner = read_name(buf)?;
        let rtype = Rtype::from_int(get_u16(buf)?);
        let class = Class::from_int(get_u16(buf)?);
        let ttl = Ttl::from_secs(get_u32(buf)?);
        let tag = get_u8(buf)?;
        let data = match tag {
            0 => {
                let mname = read_name(buf)?;
                let rname = read_name(buf)?;
                let serial = Serial::from(get_u32(buf)?);
                let refresh = Ttl::from_secs(get_u32(buf)?);
                let retry = Ttl::from_secs(get_u32(buf)?);
                let expire = Ttl::from_secs(get_u32(buf)?);
                let minimum = Ttl::from_secs(get_u32(buf)?);
                RecordData::Soa(Soa::new(mname, rname, serial, refresh, retry, expire, minimum))
            }
            1 => {
                let len = get_u32(buf)? as usize;
                if buf.remaining() < len {
                    return Err(CoreError::Malformed("truncated RDATA".into()));
                }
                RecordData::Opaque(buf.copy_to_bytes(len))
            }
            _ => return Err(CoreError::Malformed("unknown RDATA tag".into())),
        };
        Ok(Self { owner, rtype, class, ttl, data })
    }
}

fn write_name(buf: &mut BytesMut, name: &Name<Bytes>) {
    let octets = name.as_octets();
    buf.put_u16(octets.len() as u16);
    buf.put_slice(octets);
}

fn read_name(buf: &mut Bytes) -> Result<Name<Bytes>, CoreError> {
    let len = get_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(CoreError::Malformed("truncated owner name".into()));
    }
    let octets = buf.copy_to_bytes(len);
    Name::from_octets(octets).map_err(|_| CoreError::Malformed("invalid domain name".into()))
}

fn get_u8(buf: &mut Bytes) -> Result<u8, CoreError> {
    if buf.remaining() < 1 {
        return Err(CoreError::Malformed("truncated record".into()));
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> Result<u16, CoreError> {
    if buf.remaining() < 2 {
        return Err(CoreError::Malformed("truncated record".into()));
    }
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes) -> Result<u32, CoreError> {
    if buf.remaining() < 4 {
        return Err(CoreError::Malformed("truncated record".into()));
    }
    Ok(buf.get_u32())
}

//----------- Changeset ----------------------------------------------------------

/// A single IXFR delta: `(soa_from, removals, soa_to, additions)` (§3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Changeset {
    pub soa_from: ResourceRecord,
    pub removals: Vec<ResourceRecord>,
    pub soa_to: ResourceRecord,
    pub additions: Vec<ResourceRecord>,
}

impl Changeset {
    pub fn serial_from(&self) -> Serial {
        soa_serial(&self.soa_from)
    }

    pub fn serial_to(&self) -> Serial {
        soa_serial(&self.soa_to)
    }

    /// `serialise(deserialise(b)) == b` (§4.3, invariant 5 of §8).
    pub fn serialise(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.soa_from.write(&mut buf);
        for rr in &self.removals {
            rr.write(&mut buf);
        }
        self.soa_to.write(&mut buf);
        for rr in &self.additions {
            rr.write(&mut buf);
        }
        buf.freeze()
    }

    /// Parse the concatenation back into sections by switching at each SOA
    /// boundary: 1st SOA = from, 2nd SOA = to, 3rd SOA (if present) = a
    /// terminator whose remainder is ignored (§4.3).
    pub fn deserialise(bytes: Bytes) -> Result<Self, CoreError> {
        let mut buf = bytes;
        let soa_from = ResourceRecord::read(&mut buf)?;
        if !soa_from.is_soa() {
            return Err(CoreError::Malformed("first record is not an SOA".into()));
        }

        let mut removals = Vec::new();
        let soa_to;
        loop {
            if buf.remaining() == 0 {
                return Err(CoreError::Malformed("changeset ended before to-SOA".into()));
            }
            let rr = ResourceRecord::read(&mut buf)?;
            if rr.is_soa() {
                soa_to = rr;
                break;
            }
            removals.push(rr);
        }

        let mut additions = Vec::new();
        while buf.remaining() > 0 {
            let rr = ResourceRecord::read(&mut buf)?;
            if rr.is_soa() {
                // A third SOA terminates the changeset; anything after it
                // is ignored.
                break;
            }
            additions.push(rr);
        }

        Ok(Self { soa_from, removals, soa_to, additions })
    }
}

fn soa_serial(record: &ResourceRecord) -> Serial {
    match &record.data {
        RecordData::Soa(soa) => soa.serial(),
        RecordData::Opaque(_) => unreachable!("soa_from/soa_to are always constructed as SOA records"),
    }
}

//----------- ChangesetBuilder ----------------------------------------------------

/// Incrementally builds a [`Changeset`], merging adjacent same-owner,
/// same-type records the way `knot_changeset_add_rr` does, so that records
/// delivered one at a time by the XFR engine still produce compact RR-sets.
#[derive(Debug, Default)]
pub struct ChangesetBuilder {
    removals: Vec<ResourceRecord>,
    additions: Vec<ResourceRecord>,
}

impl ChangesetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single record to the removal side, merging into the previous
    /// entry when owner, type and class match (mirrors
    /// `knot_changeset_rrsets_match`).
    pub fn remove_rr(&mut self, rr: ResourceRecord) {
        push_merged(&mut self.removals, rr);
    }

    /// Add a single record to the addition side.
    pub fn add_rr(&mut self, rr: ResourceRecord) {
        push_merged(&mut self.additions, rr);
    }

    /// Add an already-assembled RR-set, skipping the merge scan (the common
    /// case when the XFR engine hands over whole RR-sets).
    pub fn add_rrset(&mut self, rrs: Vec<ResourceRecord>) {
        self.additions.extend(rrs);
    }

    pub fn remove_rrset(&mut self, rrs: Vec<ResourceRecord>) {
        self.removals.extend(rrs);
    }

    pub fn build(self, soa_from: ResourceRecord, soa_to: ResourceRecord) -> Changeset {
        Changeset { soa_from, removals: self.removals, soa_to, additions: self.additions }
    }
}

/// `knot_changeset_rrsets_match` matches RRs by owner/type/class alone and
/// folds distinct RDATA into the same RR-set; since a RR-set here is just
/// the run of entries sharing a header, "merging" is simply appending.
fn push_merged(set: &mut Vec<ResourceRecord>, rr: ResourceRecord) {
    set.push(rr);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name<Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    fn soa_rr(owner: &str, serial: u32) -> ResourceRecord {
        let soa = Soa::new(
            name("ns1.example."),
            name("hostmaster.example."),
            Serial::from(serial),
            Ttl::from_secs(3600),
            Ttl::from_secs(600),
            Ttl::from_secs(604800),
            Ttl::from_secs(3600),
        );
        ResourceRecord::soa(name(owner), Ttl::from_secs(3600), soa)
    }

    fn a_rr(owner: &str) -> ResourceRecord {
        ResourceRecord {
            owner: name(owner),
            rtype: Rtype::A,
            class: Class::IN,
            ttl: Ttl::from_secs(300),
            data: RecordData::Opaque(Bytes::from_static(&[192, 0, 2, 1])),
        }
    }

    #[test]
    fn round_trips_through_binary_form() {
        let mut builder = ChangesetBuilder::new();
        builder.remove_rr(a_rr("old.example."));
        builder.add_rr(a_rr("new.example."));
        let changeset = builder.build(soa_rr("example.", 10), soa_rr("example.", 11));

        let bytes = changeset.serialise();
        let decoded = Changeset::deserialise(bytes.clone()).unwrap();
        assert_eq!(decoded.serialise(), bytes);
        assert_eq!(decoded.serial_from(), Serial::from(10));
        assert_eq!(decoded.serial_to(), Serial::from(11));
        assert_eq!(decoded.removals.len(), 1);
        assert_eq!(decoded.additions.len(), 1);
    }

    #[test]
    fn ignores_trailing_terminator_soa() {
        let mut builder = ChangesetBuilder::new();
        builder.add_rr(a_rr("new.example."));
        let changeset = builder.build(soa_rr("example.", 10), soa_rr("example.", 11));

        let mut bytes = BytesMut::from(&changeset.serialise()[..]);
        soa_rr("example.", 11).write(&mut bytes);
        bytes.put_slice(b"trailing garbage that must be ignored");

        let decoded = Changeset::deserialise(bytes.freeze()).unwrap();
        assert_eq!(decoded.additions.len(), 1);
    }
}
