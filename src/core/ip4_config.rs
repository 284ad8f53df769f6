//! Typed IPv4 configuration decoded from a DHCP event.

use std::net::Ipv4Addr;

/// An address plus its prefix length, with an optional per-address gateway
/// override. Order in [`Ip4Config::addresses`] is preservation-significant:
/// the first address is primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ip4Address {
    pub address: Ipv4Addr,
    pub prefix: u8,
    pub gateway: Option<Ipv4Addr>,
}

/// A destination/prefix/next-hop triple. A route with `prefix == 0` and
/// `destination == 0.0.0.0` is never constructed: callers fold that case
/// into [`Ip4Config::gateway`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ip4Route {
    pub destination: Ipv4Addr,
    pub prefix: u8,
    pub next_hop: Ipv4Addr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ip4Config {
    pub addresses: Vec<Ip4Address>,
    pub routes: Vec<Ip4Route>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub search_domains: Vec<String>,
    pub host_name: Option<String>,
    pub domain_name: Option<String>,
    pub mtu: Option<u32>,
    pub gateway: Option<Ipv4Addr>,
}

impl Ip4Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this config is usable: at least one address was decoded. An
    /// event that decodes to none collapses the client's state to `Fail`.
    pub fn has_address(&self) -> bool {
        !self.addresses.is_empty()
    }

    pub fn primary_address(&self) -> Option<&Ip4Address> {
        self.addresses.first()
    }
}
