//! Error taxonomy for the zone management core.

use std::fmt;

//----------- CoreError ---------------------------------------------------------

/// An error arising from a zone management core operation.
///
/// This mirrors the discriminant-based error reporting of the subsystem this
/// core is modelled on: callers match on the variant rather than downcast a
/// boxed error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// A required argument or field was missing or malformed.
    Invalid(String),

    /// Allocation or resource exhaustion.
    NoMem,

    /// No such zone, journal entry, or on-disk artifact.
    NotFound,

    /// A record stream could not be parsed.
    Malformed(String),

    /// A journal or compiled zone file failed its integrity check.
    Corrupt(String),

    /// A journal write could not proceed; the caller must reclaim space and
    /// retry.
    OutOfSpace,

    /// A changeset chain could not reach the requested serial.
    OutOfRange,

    /// The peer is not permitted by the relevant ACL.
    AccessDenied,

    /// A response did not correlate to the awaited request.
    Mismatch,

    /// An unclassified, non-recoverable error.
    Fatal(String),
}

impl std::error::Error for CoreError {}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(reason) => write!(f, "invalid argument: {reason}"),
            Self::NoMem => f.write_str("allocation failed"),
            Self::NotFound => f.write_str("not found"),
            Self::Malformed(reason) => write!(f, "malformed record stream: {reason}"),
            Self::Corrupt(reason) => write!(f, "corrupt on-disk data: {reason}"),
            Self::OutOfSpace => f.write_str("journal is out of space"),
            Self::OutOfRange => f.write_str("changeset chain does not reach the requested serial"),
            Self::AccessDenied => f.write_str("access denied by ACL"),
            Self::Mismatch => f.write_str("response does not match the awaited request"),
            Self::Fatal(reason) => write!(f, "fatal error: {reason}"),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::OutOfMemory => Self::NoMem,
            _ => Self::Fatal(err.to_string()),
        }
    }
}

//----------- JournalOpenError ---------------------------------------------------

/// An error opening a zone's journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalOpenError {
    /// No journal file exists at the given path.
    NotFound,

    /// The journal file exists but its header failed validation.
    Corrupt,

    /// The journal file was written by an incompatible, older format.
    TooOld,
}

impl std::error::Error for JournalOpenError {}

impl fmt::Display for JournalOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "no journal file exists at the given path",
            Self::Corrupt => "the journal file failed header validation",
            Self::TooOld => "the journal file uses an incompatible, older format",
        })
    }
}

//----------- ZoneLoadError -------------------------------------------------------

/// An error loading a zone's compiled or text representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneLoadError {
    /// The file was shorter than its header claimed.
    FewData,
    /// The file's checksum did not match its contents.
    CrcMismatch,
    /// The file could not be parsed as a zone.
    Malformed(String),
    /// Any other I/O failure.
    Other(String),
}

impl std::error::Error for ZoneLoadError {}

impl fmt::Display for ZoneLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FewData => f.write_str("file is shorter than its header claims"),
            Self::CrcMismatch => f.write_str("file checksum does not match its contents"),
            Self::Malformed(reason) => write!(f, "zone file is malformed: {reason}"),
            Self::Other(reason) => write!(f, "zone file could not be loaded: {reason}"),
        }
    }
}
