//! Converts the raw `{name: bytes}` option mapping delivered over the bus
//! into typed fields. Grounded in the original's `garray_to_string`
//! (byte-wise translation) and `real_ip4_process_classless_routes`
//! (RFC-3442 token parsing).

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::core::ip4_config::{Ip4Address, Ip4Config, Ip4Route};
use crate::errors::DhcpError;

/// Mapping from option name to its raw byte-array value, as delivered over
/// the system bus. Values may contain embedded zero bytes and non-ASCII
/// bytes.
pub type OptionBlob = HashMap<String, Vec<u8>>;

/// Translates a raw byte array into a printable, null-free, best-effort
/// UTF-8 string: each `0x00` becomes a space, each byte `> 127` becomes
/// `?`, everything else is preserved untouched.
///
/// The original C implementation appends a NUL terminator before handing
/// the buffer to a C string API; a Rust `String` has no such need, so that
/// terminator is not represented here. Because the translation step maps
/// every byte into `0x00..=0x7F` \ {0x00}, the output is always valid ASCII
/// (hence valid UTF-8) by construction — the `from_utf8` fallback below is
/// defensive, matching the original's own belt-and-suspenders validation.
pub fn decode_string(blob: &OptionBlob, key: &str) -> Option<String> {
    let raw = blob.get(key)?;
    let translated: Vec<u8> = raw
        .iter()
        .map(|&b| if b == 0 { b' ' } else if b > 127 { b'?' } else { b })
        .collect();

    match String::from_utf8(translated) {
        Ok(s) => Some(s),
        Err(e) => {
            log::warn!("DHCP option '{key}' couldn't be converted to UTF-8");
            Some(String::from_utf8_lossy(e.as_bytes()).into_owned())
        }
    }
}

/// Decodes a single dotted-quad address option (e.g. `new_ip_address`).
pub fn decode_ip4(blob: &OptionBlob, key: &str) -> Option<Ipv4Addr> {
    let s = decode_string(blob, key)?;
    match s.trim().parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            log::warn!("DHCP option '{key}' is not a valid IPv4 address: '{s}'");
            None
        }
    }
}

/// Decodes a space-separated list of addresses (e.g.
/// `new_domain_name_servers`, `new_routers`). Invalid tokens are skipped
/// with a warning; they do not poison the rest of the list.
pub fn decode_ip4_list(blob: &OptionBlob, key: &str) -> Vec<Ipv4Addr> {
    let Some(s) = decode_string(blob, key) else {
        return Vec::new();
    };
    s.split_whitespace()
        .filter_map(|tok| match tok.parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                log::warn!("DHCP option '{key}' contains an invalid address: '{tok}'");
                None
            }
        })
        .collect()
}

/// Decodes a space-separated list of search domains (e.g.
/// `new_domain_search`).
pub fn decode_domain_list(blob: &OptionBlob, key: &str) -> Vec<String> {
    decode_string(blob, key)
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Decodes an unsigned decimal option (e.g. `new_interface_mtu`).
pub fn decode_u32(blob: &OptionBlob, key: &str) -> Option<u32> {
    let s = decode_string(blob, key)?;
    match s.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("DHCP option '{key}' is not a valid number: '{s}'");
            None
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClasslessRoutes {
    pub routes: Vec<Ip4Route>,
    pub default_gateway: Option<Ipv4Addr>,
    pub have_routes: bool,
}

/// Parses RFC-3442 classless static routes. Tries
/// `new_classless_static_routes` first, falling back to the Microsoft
/// dialect `new_ms_classless_static_routes`; the RFC-3442 key takes
/// precedence when both are present.
///
/// Each pair of whitespace-separated tokens is `(destination, next-hop)`;
/// an odd token count rejects the whole option. `destination` is
/// `addr[/cidr]`, defaulting to `/32`; `0.0.0.0/0` denotes a default
/// gateway (returned via `default_gateway`, never added to `routes`). A
/// malformed pair is skipped individually with a warning and does not
/// poison the remaining pairs.
pub fn parse_classless_routes(blob: &OptionBlob) -> ClasslessRoutes {
    let mut result = ClasslessRoutes::default();

    let raw = match decode_string(blob, "new_classless_static_routes")
        .or_else(|| decode_string(blob, "new_ms_classless_static_routes"))
    {
        Some(s) => s,
        None => return result,
    };

    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() {
        return result;
    }
    if tokens.len() % 2 != 0 {
        log::warn!("classless static routes provided, but invalid (odd token count)");
        return result;
    }

    for pair in tokens.chunks(2) {
        let (dest_tok, hop_tok) = (pair[0], pair[1]);

        let (addr_str, cidr_str) = match dest_tok.split_once('/') {
            Some((a, c)) => (a, Some(c)),
            None => (dest_tok, None),
        };

        let prefix: u8 = match cidr_str {
            None => 32,
            Some(c) => match c.parse::<u8>() {
                Ok(v) if v <= 32 => v,
                _ => {
                    log::warn!(
                        "{}",
                        DhcpError::InvalidOption {
                            key: "new_classless_static_routes".to_string(),
                            reason: format!("invalid cidr '{c}'"),
                        }
                    );
                    continue;
                }
            },
        };

        let destination: Ipv4Addr = match addr_str.parse() {
            Ok(a) => a,
            Err(_) => {
                log::warn!(
                    "{}",
                    DhcpError::InvalidOption {
                        key: "new_classless_static_routes".to_string(),
                        reason: format!("invalid destination address '{addr_str}'"),
                    }
                );
                continue;
            }
        };

        let next_hop: Ipv4Addr = match hop_tok.parse() {
            Ok(a) => a,
            Err(_) => {
                log::warn!(
                    "{}",
                    DhcpError::InvalidOption {
                        key: "new_classless_static_routes".to_string(),
                        reason: format!("invalid gateway '{hop_tok}'"),
                    }
                );
                continue;
            }
        };

        result.have_routes = true;
        if prefix == 0 && destination == Ipv4Addr::new(0, 0, 0, 0) {
            result.default_gateway = Some(next_hop);
        } else {
            result.routes.push(Ip4Route {
                destination,
                prefix,
                next_hop,
            });
            log::info!("classless static route {destination}/{prefix} gw {next_hop}");
        }
    }

    result
}

/// Converts a dotted-quad netmask into a CIDR prefix length by counting its
/// leading one bits. A non-canonical mask (ones after a zero) still yields
/// the leading-run length rather than rejecting the option outright — the
/// helper already validated the mask syntactically.
pub(crate) fn netmask_to_prefix(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

/// Decodes the full set of IPv4 lease fields carried by a single DHCP event
/// into a fresh [`Ip4Config`]. Per RFC 3442, presence of *either*
/// classless-routes key — even one that fails to parse into any usable
/// pair — suppresses the plain `new_routers` option entirely.
pub fn decode_ip4_config(blob: &OptionBlob) -> Ip4Config {
    let mut config = Ip4Config::new();

    if let Some(address) = decode_ip4(blob, "new_ip_address") {
        let prefix = decode_ip4(blob, "new_subnet_mask")
            .map(netmask_to_prefix)
            .unwrap_or(32);
        config.addresses.push(Ip4Address {
            address,
            prefix,
            gateway: None,
        });
    }

    config.dns_servers = decode_ip4_list(blob, "new_domain_name_servers");
    config.search_domains = decode_domain_list(blob, "new_domain_search");
    config.host_name = decode_string(blob, "new_host_name");
    config.domain_name = decode_string(blob, "new_domain_name");
    config.mtu = decode_u32(blob, "new_interface_mtu");

    let classless_present = blob.contains_key("new_classless_static_routes")
        || blob.contains_key("new_ms_classless_static_routes");

    if classless_present {
        let classless = parse_classless_routes(blob);
        config.routes = classless.routes;
        config.gateway = classless.default_gateway;
    } else {
        config.gateway = decode_ip4_list(blob, "new_routers").into_iter().next();
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(pairs: &[(&str, &[u8])]) -> OptionBlob {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn decode_string_strips_nulls_and_high_bytes() {
        let b = blob(&[("reason", b"BO\x00UND\xffZ")]);
        let decoded = decode_string(&b, "reason").unwrap();
        assert!(!decoded.as_bytes().contains(&0x00));
        assert!(decoded.as_bytes().iter().all(|&c| c <= 127));
        assert_eq!(decoded, "BO UND?Z");
    }

    #[test]
    fn decode_string_absent_key_is_none() {
        let b = blob(&[]);
        assert_eq!(decode_string(&b, "missing"), None);
    }

    #[test]
    fn classless_routes_empty_string_yields_nothing() {
        let b = blob(&[("new_classless_static_routes", b"")]);
        let result = parse_classless_routes(&b);
        assert!(result.routes.is_empty());
        assert_eq!(result.default_gateway, None);
        assert!(!result.have_routes);
    }

    #[test]
    fn classless_routes_absent_yields_nothing() {
        let b = blob(&[]);
        let result = parse_classless_routes(&b);
        assert!(result.routes.is_empty());
        assert!(!result.have_routes);
    }

    #[test]
    fn classless_routes_odd_tokens_are_rejected_entirely() {
        let b = blob(&[(
            "new_classless_static_routes",
            b"10.0.0.0/8 10.0.0.1 192.168.0.0/16",
        )]);
        let result = parse_classless_routes(&b);
        assert!(result.routes.is_empty());
        assert!(!result.have_routes);
    }

    #[test]
    fn classless_routes_default_gateway_overrides_routers() {
        let b = blob(&[(
            "new_classless_static_routes",
            b"10.0.0.0/8 192.0.2.1 0.0.0.0/0 192.0.2.254",
        )]);
        let result = parse_classless_routes(&b);
        assert_eq!(result.default_gateway, Some(Ipv4Addr::new(192, 0, 2, 254)));
        assert_eq!(result.routes.len(), 1);
        assert_eq!(result.routes[0].destination, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(result.routes[0].prefix, 8);
        assert_eq!(result.routes[0].next_hop, Ipv4Addr::new(192, 0, 2, 1));
        assert!(result.have_routes);
    }

    #[test]
    fn classless_routes_ms_variant_is_used_when_rfc_key_absent() {
        let b = blob(&[("new_ms_classless_static_routes", b"172.16.0.0/12 10.0.0.1")]);
        let result = parse_classless_routes(&b);
        assert_eq!(result.routes.len(), 1);
        assert_eq!(result.routes[0].destination, Ipv4Addr::new(172, 16, 0, 0));
        assert_eq!(result.routes[0].prefix, 12);
        assert_eq!(result.routes[0].next_hop, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn classless_routes_rfc_key_takes_precedence_over_ms() {
        let b = blob(&[
            ("new_classless_static_routes", b"10.0.0.0/8 192.0.2.1"),
            ("new_ms_classless_static_routes", b"172.16.0.0/12 10.0.0.1"),
        ]);
        let result = parse_classless_routes(&b);
        assert_eq!(result.routes[0].destination, Ipv4Addr::new(10, 0, 0, 0));
    }

    #[test]
    fn decode_ip4_list_skips_bad_tokens() {
        let b = blob(&[("new_domain_name_servers", b"192.0.2.1 not-an-ip 192.0.2.2")]);
        let list = decode_ip4_list(&b, "new_domain_name_servers");
        assert_eq!(
            list,
            vec![Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 2)]
        );
    }

    #[test]
    fn decode_domain_list_splits_on_whitespace() {
        let b = blob(&[("new_domain_search", b"example.com corp.example.com")]);
        let list = decode_domain_list(&b, "new_domain_search");
        assert_eq!(list, vec!["example.com", "corp.example.com"]);
    }

    #[test]
    fn full_decode_happy_path_address_and_router_gateway() {
        let b = blob(&[
            ("new_ip_address", b"192.0.2.7"),
            ("new_subnet_mask", b"255.255.255.0"),
            ("new_routers", b"192.0.2.1"),
        ]);
        let config = decode_ip4_config(&b);
        let primary = config.primary_address().unwrap();
        assert_eq!(primary.address, Ipv4Addr::new(192, 0, 2, 7));
        assert_eq!(primary.prefix, 24);
        assert_eq!(config.gateway, Some(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(config.routes.is_empty());
    }

    #[test]
    fn full_decode_classless_routes_supersede_plain_routers() {
        let b = blob(&[
            ("new_ip_address", b"192.0.2.7"),
            ("new_subnet_mask", b"255.255.255.0"),
            ("new_routers", b"192.0.2.1"),
            (
                "new_classless_static_routes",
                b"10.0.0.0/8 192.0.2.1 0.0.0.0/0 192.0.2.254",
            ),
        ]);
        let config = decode_ip4_config(&b);
        assert_eq!(config.gateway, Some(Ipv4Addr::new(192, 0, 2, 254)));
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].destination, Ipv4Addr::new(10, 0, 0, 0));
    }

    #[test]
    fn full_decode_ms_classless_variant_fallback() {
        let b = blob(&[
            ("new_ip_address", b"192.0.2.7"),
            ("new_subnet_mask", b"255.255.255.0"),
            ("new_ms_classless_static_routes", b"172.16.0.0/12 10.0.0.1"),
        ]);
        let config = decode_ip4_config(&b);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].destination, Ipv4Addr::new(172, 16, 0, 0));
        assert_eq!(config.gateway, None);
    }

    #[test]
    fn full_decode_odd_tokens_suppress_routers_but_yield_no_routes() {
        let b = blob(&[
            ("new_ip_address", b"192.0.2.7"),
            ("new_subnet_mask", b"255.255.255.0"),
            ("new_routers", b"192.0.2.1"),
            (
                "new_classless_static_routes",
                b"10.0.0.0/8 10.0.0.1 192.168.0.0/16",
            ),
        ]);
        let config = decode_ip4_config(&b);
        assert!(config.routes.is_empty());
        assert_eq!(config.gateway, None);
    }

    #[test]
    fn netmask_counts_leading_ones() {
        assert_eq!(netmask_to_prefix(Ipv4Addr::new(255, 255, 255, 0)), 24);
        assert_eq!(netmask_to_prefix(Ipv4Addr::new(255, 255, 255, 255)), 32);
        assert_eq!(netmask_to_prefix(Ipv4Addr::new(0, 0, 0, 0)), 0);
    }
}
