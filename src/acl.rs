//! Access control lists (§4.2).
//!
//! Grounded on `zones_set_acl` in the original Knot DNS source: an ACL is
//! built by starting with a default verdict and appending accept rules, each
//! binding a remote address. Matching is address-only; port is not compared.

use std::net::{IpAddr, SocketAddr};

use crate::config::AclEntryConfig;

//----------- Verdict ----------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Deny,
}

//----------- AclEntry ----------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    pub address: IpAddr,
    pub port: u16,
    pub name: Option<String>,
}

impl From<&AclEntryConfig> for AclEntry {
    fn from(config: &AclEntryConfig) -> Self {
        Self { address: config.address, port: config.port, name: config.name.clone() }
    }
}

//----------- AclSet ------------------------------------------------------------

/// An immutable-after-build list of accept rules, default-deny.
///
/// Rebuild is non-destructive: a fresh [`AclSet`] simply replaces the
/// previous one (see §4.9 reload coordinator, which rebuilds every zone's
/// ACL sets on every reload regardless of whether the zone itself changed).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AclSet {
    entries: Vec<AclEntry>,
}

impl AclSet {
    /// Build an ACL set from configuration. An empty list denies everyone.
    pub fn build(entries: &[AclEntryConfig]) -> Self {
        Self { entries: entries.iter().map(AclEntry::from).collect() }
    }

    /// Whether `addr` is accepted by this ACL (address-only match; any
    /// configured port is ignored per §4.2).
    pub fn matches(&self, addr: IpAddr) -> Verdict {
        if self.entries.iter().any(|entry| entry.address == addr) {
            Verdict::Accept
        } else {
            Verdict::Deny
        }
    }

    /// The first configured remote's socket address, used by the reload
    /// coordinator to determine a zone's master (§4.9 step 4).
    pub fn first_remote(&self) -> Option<SocketAddr> {
        self.entries.first().map(|e| SocketAddr::new(e.address, e.port))
    }

    /// Every configured remote's socket address, e.g. the NOTIFY-out
    /// targets for a zone (§4.5 NOTIFY-send event).
    pub fn remotes(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.entries.iter().map(|e| SocketAddr::new(e.address, e.port))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(addr: &str) -> AclEntryConfig {
        AclEntryConfig { address: addr.parse().unwrap(), port: 53, name: None }
    }

    #[test]
    fn default_deny_with_no_entries() {
        let acl = AclSet::build(&[]);
        assert_eq!(acl.matches("192.0.2.1".parse().unwrap()), Verdict::Deny);
    }

    #[test]
    fn accepts_configured_address_only() {
        let acl = AclSet::build(&[entry("192.0.2.1"), entry("2001:db8::1")]);
        assert_eq!(acl.matches("192.0.2.1".parse().unwrap()), Verdict::Accept);
        assert_eq!(acl.matches("2001:db8::1".parse().unwrap()), Verdict::Accept);
        assert_eq!(acl.matches("192.0.2.2".parse().unwrap()), Verdict::Deny);
    }

    #[test]
    fn first_remote_is_master_candidate() {
        let acl = AclSet::build(&[entry("192.0.2.1"), entry("192.0.2.2")]);
        assert_eq!(acl.first_remote(), Some("192.0.2.1:53".parse().unwrap()));
    }
}
