//! Member address helpers.
//!
//! Endpoint addresses written to the cluster must be IPs, so a domain member
//! is stored as [`DOMAIN_PLACEHOLDER_IP`] and its domain travels in the
//! [`DOMAIN_ANNOTATION`] of the Service. [`encode_host`] and [`decode_host`]
//! are the only places that know about the placeholder.

use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::net::IpAddr;

use pkg_constants::thirdparty::{DOMAIN_ANNOTATION, DOMAIN_PLACEHOLDER_IP};

/// True when `host` is not a literal IPv4/IPv6 address.
pub fn is_domain(host: &str) -> bool {
    host.parse::<IpAddr>().is_err()
}

/// Map a member host to the IP written into Endpoints.
/// Returns the domain alongside when a placeholder was used.
pub fn encode_host(host: &str) -> (String, Option<String>) {
    if is_domain(host) {
        (DOMAIN_PLACEHOLDER_IP.to_string(), Some(host.to_string()))
    } else {
        (host.to_string(), None)
    }
}

/// Inverse of [`encode_host`]: restore the domain hidden behind the
/// placeholder using the Service annotations.
pub fn decode_host(ip: &str, annotations: &BTreeMap<String, String>) -> String {
    if ip == DOMAIN_PLACEHOLDER_IP {
        if let Some(domain) = annotations.get(DOMAIN_ANNOTATION) {
            return domain.clone();
        }
    }
    ip.to_string()
}

/// Split `host`, `host:port` or `[v6]:port`. A bare IPv6 address is
/// returned whole with no port.
pub fn split_host_port(addr: &str) -> Result<(String, Option<u16>)> {
    let addr = addr.trim();
    if addr.is_empty() {
        bail!("address must not be empty");
    }

    if let Some(rest) = addr.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            bail!("address '{}' has an unterminated '['", addr);
        };
        if tail.is_empty() {
            return Ok((host.to_string(), None));
        }
        let Some(port) = tail.strip_prefix(':') else {
            bail!("address '{}' has garbage after ']'", addr);
        };
        return Ok((host.to_string(), Some(parse_port(addr, port)?)));
    }

    if addr.parse::<IpAddr>().is_ok() {
        return Ok((addr.to_string(), None));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                bail!("address '{}' has an empty host", addr);
            }
            Ok((host.to_string(), Some(parse_port(addr, port)?)))
        }
        None => Ok((addr.to_string(), None)),
    }
}

fn parse_port(addr: &str, port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => bail!("address '{}' has an invalid port '{}'", addr, port),
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_and_ips() {
        assert!(!is_domain("10.0.0.1"));
        assert!(!is_domain("::1"));
        assert!(is_domain("db.example.com"));
        assert!(is_domain("localhost"));
    }

    #[test]
    fn placeholder_round_trip() {
        let (ip, domain) = encode_host("db.example.com");
        assert_eq!(ip, "1.1.1.1");
        assert_eq!(domain.as_deref(), Some("db.example.com"));

        let mut annotations = BTreeMap::new();
        annotations.insert("domain".to_string(), "db.example.com".to_string());
        assert_eq!(decode_host(&ip, &annotations), "db.example.com");

        // Without the annotation the placeholder is all we know.
        assert_eq!(decode_host(&ip, &BTreeMap::new()), "1.1.1.1");

        let (ip, domain) = encode_host("10.0.0.7");
        assert_eq!(ip, "10.0.0.7");
        assert!(domain.is_none());
        assert_eq!(decode_host(&ip, &annotations), "10.0.0.7");
    }

    #[test]
    fn valid_addresses() {
        assert_eq!(
            split_host_port("10.0.0.1:8080").unwrap(),
            ("10.0.0.1".to_string(), Some(8080))
        );
        assert_eq!(
            split_host_port("db.example.com").unwrap(),
            ("db.example.com".to_string(), None)
        );
        assert_eq!(
            split_host_port("[::1]:53").unwrap(),
            ("::1".to_string(), Some(53))
        );
        assert_eq!(split_host_port("fe80::1").unwrap(), ("fe80::1".to_string(), None));
        assert_eq!(join_host_port("::1", 53), "[::1]:53");
        assert_eq!(join_host_port("10.0.0.1", 80), "10.0.0.1:80");
    }

    #[test]
    fn invalid_addresses() {
        assert!(split_host_port("").is_err());
        assert!(split_host_port("10.0.0.1:http").is_err());
        assert!(split_host_port("10.0.0.1:0").is_err());
        assert!(split_host_port(":80").is_err());
        assert!(split_host_port("[::1").is_err());
        assert!(split_host_port("[::1]x").is_err());
    }
}
