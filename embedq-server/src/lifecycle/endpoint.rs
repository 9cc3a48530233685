use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::LifecycleError;
use crate::broker::BrokerAddr;

pub const URL_SCHEME: &str = "nats";

/// The concrete address a ready broker accepts clients on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenEndpoint {
    addr: SocketAddr,
}

impl ListenEndpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// The bound socket address, possibly unspecified (`0.0.0.0`).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Address a client on this host should dial. Wildcard binds are
    /// reached through loopback.
    pub fn dial_addr(&self) -> SocketAddr {
        let ip = match self.addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, self.addr.port())
    }

    pub fn client_url(&self) -> String {
        format!("{URL_SCHEME}://{}", self.dial_addr())
    }
}

impl fmt::Display for ListenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

impl TryFrom<BrokerAddr> for ListenEndpoint {
    type Error = LifecycleError;

    fn try_from(addr: BrokerAddr) -> Result<Self, LifecycleError> {
        match addr {
            BrokerAddr::Tcp(socket) => Ok(ListenEndpoint::new(socket)),
            other => Err(LifecycleError::AddressResolution { addr: other }),
        }
    }
}
