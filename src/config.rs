//! Configuration for the zone management core.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

//----------- Config --------------------------------------------------------

/// The full daemon configuration, as parsed from TOML.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daemon-level settings (privilege drop, sockets, pid file).
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory holding per-zone journals (`<name>.jnl`).
    pub journal_dir: Utf8PathBuf,

    /// Directory holding compiled (binary) zone files (`<name>.db`).
    pub compiled_zone_dir: Utf8PathBuf,

    /// Directory holding text zone files (`<name>.zone`).
    pub zone_file_dir: Utf8PathBuf,

    /// Zones served by this instance, keyed by owner name.
    #[serde(default)]
    pub zones: HashMap<String, ZoneConfig>,
}

impl Config {
    /// Parse a configuration file from disk (§6 external interface
    /// `config`, §A.4).
    pub fn load(path: &Utf8PathBuf) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read(path.clone(), err))?;
        toml::from_str(&raw).map_err(|err| ConfigError::Parse(path.clone(), err))
    }
}

//----------- ConfigError -----------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Read(Utf8PathBuf, std::io::Error),
    Parse(Utf8PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(path, err) => write!(f, "could not read '{path}': {err}"),
            Self::Parse(path, err) => write!(f, "could not parse '{path}': {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

//----------- DaemonConfig ---------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// User/group to drop privileges to, if running as root.
    #[serde(default)]
    pub identity: Option<(UserId, GroupId)>,

    /// Whether to fork into the background.
    #[serde(default)]
    pub daemonize: bool,

    /// Where to write the process id, if daemonized.
    #[serde(default)]
    pub pid_file: Option<Utf8PathBuf>,

    /// UDP/TCP addresses to serve DNS queries and zone transfers on.
    #[serde(default)]
    pub listen: Vec<SocketAddr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserId {
    Named(String),
    Numeric(u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupId {
    Named(String),
    Numeric(u32),
}

//----------- LoggingConfig --------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub target: LogTarget,
    #[serde(default)]
    pub trace_targets: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            target: LogTarget::default(),
            trace_targets: Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogTarget {
    File(Utf8PathBuf),
    #[default]
    Stderr,
    Stdout,
}

//----------- ZoneConfig ------------------------------------------------------

/// Per-zone configuration (§6 EXTERNAL INTERFACES: `config`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Text zone file path (`config.file`).
    pub file: Utf8PathBuf,

    /// Compiled zone file path (`config.db`).
    pub db: Utf8PathBuf,

    /// Journal path (`config.ixfr_db`).
    pub ixfr_db: Utf8PathBuf,

    /// Maximum journal size in bytes (`config.ixfr_fslimit`).
    #[serde(default = "default_ixfr_fslimit")]
    pub ixfr_fslimit: u64,

    /// How often to check whether the zone file needs resyncing.
    #[serde(default = "default_dbsync_timeout", with = "duration_secs")]
    pub dbsync_timeout: Duration,

    /// Number of NOTIFY retries before giving up on a slave.
    #[serde(default = "default_notify_retries")]
    pub notify_retries: u8,

    /// Delay, in seconds, between NOTIFY retries.
    #[serde(default = "default_notify_timeout", with = "duration_secs")]
    pub notify_timeout: Duration,

    /// Access control lists for this zone.
    #[serde(default)]
    pub acl: ZoneAcls,
}

impl ZoneConfig {
    /// A placeholder configuration for a zone record created before its
    /// real configuration is known, e.g. in tests or before the first
    /// reload links a stub to its configured paths.
    pub fn stub(name: &domain::base::Name<bytes::Bytes>) -> Self {
        Self {
            file: Utf8PathBuf::from(format!("{name}.zone")),
            db: Utf8PathBuf::from(format!("{name}.db")),
            ixfr_db: Utf8PathBuf::from(format!("{name}.jnl")),
            ixfr_fslimit: default_ixfr_fslimit(),
            dbsync_timeout: default_dbsync_timeout(),
            notify_retries: default_notify_retries(),
            notify_timeout: default_notify_timeout(),
            acl: ZoneAcls::default(),
        }
    }
}

fn default_ixfr_fslimit() -> u64 {
    10 * 1024 * 1024
}

fn default_dbsync_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_notify_retries() -> u8 {
    5
}

fn default_notify_timeout() -> Duration {
    Duration::from_secs(15)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

//----------- ZoneAcls --------------------------------------------------------

/// The four ACL lists a zone may carry (§3 `acl.{xfr_in,xfr_out,notify_in,notify_out}`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ZoneAcls {
    /// Peers allowed to be our master for inbound AXFR/IXFR/SOA.
    #[serde(default)]
    pub xfr_in: Vec<AclEntryConfig>,

    /// Peers allowed to request AXFR/IXFR of this zone from us.
    #[serde(default)]
    pub xfr_out: Vec<AclEntryConfig>,

    /// Peers allowed to send us NOTIFY for this zone.
    #[serde(default)]
    pub notify_in: Vec<AclEntryConfig>,

    /// Peers to send NOTIFY to when this zone changes.
    #[serde(default)]
    pub notify_out: Vec<AclEntryConfig>,
}

/// One configured remote (§6: `address, family, port, name`). Port is used
/// to build the socket address dialled for masters and NOTIFY targets, but
/// never consulted by ACL admission matching, which is address-only (§4.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AclEntryConfig {
    pub address: IpAddr,
    #[serde(default = "default_acl_port")]
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_acl_port() -> u16 {
    53
}
