//! Local network identity resolution.
//!
//! The agent advertises its file server as `http://<ipv4>:<port>`, so it needs
//! the address peers on the LAN can reach. Resolution never aborts startup:
//! on failure the agent falls back to `0.0.0.0` and records a diagnostic.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use thiserror::Error;

/// Address advertised when resolution fails.
pub const FALLBACK_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Errors from address resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no usable network interface: {0}")]
    NoRoute(#[source] io::Error),

    #[error("interface has no IPv4 address (got {0})")]
    NotIpv4(IpAddr),

    #[error("resolved address {0} is not reachable from the network")]
    Unroutable(Ipv4Addr),
}

/// Something that knows the host's LAN IPv4 address.
pub trait AddressSource: Send + Sync {
    fn resolve(&self) -> Result<Ipv4Addr, ResolveError>;
}

/// Finds the address of the interface that routes toward `probe`.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
#[derive(Debug, Clone)]
pub struct RouteProbe {
    probe: SocketAddr,
}

impl RouteProbe {
    pub fn new(probe: SocketAddr) -> Self {
        Self { probe }
    }
}

impl Default for RouteProbe {
    fn default() -> Self {
        Self::new(SocketAddr::from(([8, 8, 8, 8], 80)))
    }
}

impl AddressSource for RouteProbe {
    fn resolve(&self) -> Result<Ipv4Addr, ResolveError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(ResolveError::NoRoute)?;
        socket.connect(self.probe).map_err(ResolveError::NoRoute)?;
        let local = socket.local_addr().map_err(ResolveError::NoRoute)?;

        match local.ip() {
            IpAddr::V4(ip) if ip.is_loopback() || ip.is_unspecified() => {
                Err(ResolveError::Unroutable(ip))
            }
            IpAddr::V4(ip) => Ok(ip),
            other => Err(ResolveError::NotIpv4(other)),
        }
    }
}

/// An address supplied by the host.
#[derive(Debug, Clone, Copy)]
pub struct FixedAddress(pub Ipv4Addr);

impl AddressSource for FixedAddress {
    fn resolve(&self) -> Result<Ipv4Addr, ResolveError> {
        Ok(self.0)
    }
}

/// Resolves an address, substituting [`FALLBACK_ADDRESS`] on error.
pub fn resolve_or_fallback(source: &dyn AddressSource) -> (Ipv4Addr, Option<ResolveError>) {
    match source.resolve() {
        Ok(ip) => (ip, None),
        Err(e) => (FALLBACK_ADDRESS, Some(e)),
    }
}

/// Decodes an address packed with the first octet in the most significant byte.
pub fn ipv4_from_word(word: u32) -> Ipv4Addr {
    Ipv4Addr::from(word.to_be_bytes())
}

/// Decodes an address packed with the first octet in the least significant byte,
/// as some platform interface APIs report it.
pub fn ipv4_from_host_word(word: u32) -> Ipv4Addr {
    ipv4_from_word(word.swap_bytes())
}
