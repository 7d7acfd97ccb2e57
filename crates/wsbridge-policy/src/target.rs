//! Relay target filtering (SSRF guard)

use std::net::{IpAddr, Ipv6Addr};

/// Host spellings refused without parsing.
const LOCAL_ALIASES: [&str; 4] = ["127.0.0.1", "localhost", "::1", "0.0.0.0"];

/// Returns `true` if the relay must refuse to dial `target`.
///
/// `target` is the host as it appears in the request path: a DNS name or an
/// IP literal (IPv6 literals may keep their brackets). Names other than
/// `localhost` are not resolved and pass this check.
pub fn is_disallowed_target(target: &str) -> bool {
    let target = target.trim();
    let bare = target
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(target);
    let name = bare.trim_end_matches('.');

    if LOCAL_ALIASES
        .iter()
        .any(|alias| alias.eq_ignore_ascii_case(name))
    {
        return true;
    }

    match bare.parse::<IpAddr>() {
        Ok(ip) => is_disallowed_ip(ip),
        Err(_) => false,
    }
}

/// Loopback, private-use and unspecified addresses.
///
/// IPv4-mapped IPv6 addresses (`::ffff:10.0.0.1`) are judged by their IPv4
/// form. For IPv6, private use means the unique-local range `fc00::/7`.
pub fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_unspecified(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_disallowed_ip(IpAddr::V4(v4)),
            None => v6.is_loopback() || v6.is_unspecified() || is_unique_local(&v6),
        },
    }
}

fn is_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_aliases() {
        assert!(is_disallowed_target("127.0.0.1"));
        assert!(is_disallowed_target("localhost"));
        assert!(is_disallowed_target("LOCALHOST."));
        assert!(is_disallowed_target("::1"));
        assert!(is_disallowed_target("[::1]"));
        assert!(is_disallowed_target("0.0.0.0"));
    }

    #[test]
    fn test_rfc1918_ranges() {
        for target in [
            "10.0.0.1",
            "10.255.255.255",
            "172.16.0.1",
            "172.31.255.254",
            "192.168.1.100",
        ] {
            assert!(is_disallowed_target(target), "{} should be refused", target);
        }
        assert!(!is_disallowed_target("172.32.0.1"));
        assert!(!is_disallowed_target("192.169.0.1"));
    }

    #[test]
    fn test_other_loopback_and_unspecified() {
        assert!(is_disallowed_target("127.8.8.8"));
        assert!(is_disallowed_target("::"));
        assert!(is_disallowed_target("[::]"));
    }

    #[test]
    fn test_ipv6_unique_local() {
        assert!(is_disallowed_target("fd12:3456:789a::1"));
        assert!(is_disallowed_target("fc00::1"));
        assert!(!is_disallowed_target("fe80::1"));
    }

    #[test]
    fn test_ipv4_mapped_ipv6() {
        assert!(is_disallowed_target("::ffff:127.0.0.1"));
        assert!(is_disallowed_target("::ffff:192.168.0.1"));
        assert!(!is_disallowed_target("::ffff:93.184.216.34"));
    }

    #[test]
    fn test_public_addresses_allowed() {
        assert!(!is_disallowed_target("93.184.216.34"));
        assert!(!is_disallowed_target("8.8.8.8"));
        assert!(!is_disallowed_target("2606:4700:4700::1111"));
    }

    #[test]
    fn test_names_are_not_resolved() {
        assert!(!is_disallowed_target("example.com"));
        assert!(!is_disallowed_target("internal.corp"));
    }
}
