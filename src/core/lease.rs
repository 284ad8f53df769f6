//! Back-end-specific lease readers. Reading stale leases off
//! disk lets a freshly started client offer a candidate to the kernel
//! before the helper's first bus event arrives.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::core::ip4_config::{Ip4Address, Ip4Config};

/// Parses an ISC `dhclient.leases`-format file, keeping only leases for
/// `iface` that have not expired as of `now`, in file order (later leases
/// in the file supersede earlier ones in practice, so callers typically
/// want the last entry).
pub fn read_dhclient_leases(contents: &str, iface: &str, now: DateTime<Utc>) -> Vec<Ip4Config> {
    let mut out = Vec::new();
    for block in lease_blocks(contents) {
        let fields = parse_lease_block(&block);
        if fields.interface.as_deref() != Some(iface) {
            continue;
        }
        let Some(expire) = fields.expire else { continue };
        if expire <= now {
            continue;
        }
        let Some(address) = fields.fixed_address else {
            continue;
        };
        let prefix = fields.subnet_mask.map(super::decoder::netmask_to_prefix).unwrap_or(32);
        let mut config = Ip4Config::new();
        config.addresses.push(Ip4Address {
            address,
            prefix,
            gateway: fields.routers.first().copied(),
        });
        config.gateway = fields.routers.first().copied();
        config.dns_servers = fields.dns_servers;
        config.domain_name = fields.domain_name;
        out.push(config);
    }
    out
}

/// dhcpcd never persists a lease the Manager can re-read on startup; the
/// original's `nm_dhcp_dhcpcd_get_lease_config` unconditionally returns
/// `NULL`.
pub fn read_dhcpcd_leases(_path: &Path, _iface: &str) -> Vec<Ip4Config> {
    Vec::new()
}

fn lease_blocks(contents: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("lease") && depth == 0 {
            depth = 1;
            current.clear();
            continue;
        }
        if depth > 0 {
            depth += trimmed.matches('{').count();
            depth -= trimmed.matches('}').count();
            if depth == 0 {
                blocks.push(std::mem::take(&mut current));
                continue;
            }
            current.push_str(trimmed);
            current.push('\n');
        }
    }
    blocks
}

#[derive(Default)]
struct LeaseFields {
    interface: Option<String>,
    fixed_address: Option<std::net::Ipv4Addr>,
    subnet_mask: Option<std::net::Ipv4Addr>,
    routers: Vec<std::net::Ipv4Addr>,
    dns_servers: Vec<std::net::Ipv4Addr>,
    domain_name: Option<String>,
    expire: Option<DateTime<Utc>>,
}

fn parse_lease_block(block: &str) -> LeaseFields {
    let mut fields = LeaseFields::default();
    for stmt in block.split(';') {
        let stmt = stmt.trim();
        if let Some(rest) = stmt.strip_prefix("interface ") {
            fields.interface = Some(unquote(rest));
        } else if let Some(rest) = stmt.strip_prefix("fixed-address ") {
            fields.fixed_address = rest.trim().parse().ok();
        } else if let Some(rest) = stmt.strip_prefix("option subnet-mask ") {
            fields.subnet_mask = rest.trim().parse().ok();
        } else if let Some(rest) = stmt.strip_prefix("option routers ") {
            fields.routers = rest
                .split(',')
                .filter_map(|t| t.trim().parse().ok())
                .collect();
        } else if let Some(rest) = stmt.strip_prefix("option domain-name-servers ") {
            fields.dns_servers = rest
                .split(',')
                .filter_map(|t| t.trim().parse().ok())
                .collect();
        } else if let Some(rest) = stmt.strip_prefix("option domain-name ") {
            fields.domain_name = Some(unquote(rest));
        } else if let Some(rest) = stmt.strip_prefix("expire ") {
            fields.expire = parse_expire(rest.trim());
        }
    }
    fields
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}

/// ISC format: `<weekday> YYYY/MM/DD HH:MM:SS UTC;` — the weekday digit and
/// trailing `UTC` are dropped, the rest parsed as naive UTC.
fn parse_expire(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim_end_matches("UTC").trim();
    let s = s.split_once(' ').map(|(_, rest)| rest).unwrap_or(s);
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y/%m/%d %H:%M:%S").ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}
