//! SSRF (Server-Side Request Forgery) protection.
//!
//! Validates a render target before any outbound fetch is permitted, so the
//! rendering backend cannot be steered at loopback, RFC 1918, link-local,
//! or cloud-metadata addresses. The check is pure and cheap; callers run it
//! at admission and the worker runs it again at the point of fetch to cover
//! redirect-based bypasses.
//!
//! The host denylist is matched by substring containment. That is broader
//! than strictly necessary (it also rejects hosts like
//! `metadata-service.example.com`) and intentionally so: false positives
//! are acceptable here, false negatives are not.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;

use crate::Error;

/// URL schemes a render target may use.
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Hostname fragments that are never valid render targets.
///
/// Compared case-insensitively by containment against the URL host.
const BLOCKED_HOST_PATTERNS: &[&str] = &[
    "localhost",
    "127.",
    "0.0.0.0",
    "[::1]",
    // RFC 1918
    "10.",
    "192.168.",
    "172.16.",
    "172.17.",
    "172.18.",
    "172.19.",
    "172.20.",
    "172.21.",
    "172.22.",
    "172.23.",
    "172.24.",
    "172.25.",
    "172.26.",
    "172.27.",
    "172.28.",
    "172.29.",
    "172.30.",
    "172.31.",
    // link-local, incl. cloud metadata IP
    "169.254.",
    // cloud metadata hostnames
    "metadata",
    "instance-data",
    // internal-only TLD suffixes
    ".internal",
    ".local",
    ".localdomain",
    ".home.arpa",
];

/// Check if an IP address is private, reserved, or otherwise blocked.
///
/// Covers loopback, RFC 1918, link-local, CGNAT shared space
/// (100.64.0.0/10), multicast, broadcast, and unspecified addresses for
/// IPv4; loopback, unique-local, link-local, multicast, and unspecified
/// for IPv6. IPv4-mapped and IPv4-compatible IPv6 addresses are
/// classified as the IPv4 address they embed, so `::ffff:127.0.0.1` is
/// as blocked as `127.0.0.1` itself.
pub fn is_private_or_reserved(ip: IpAddr) -> bool {
    // 100.64.0.0/10; no std helper for the shared address space
    const CGNAT: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(100, 64, 0, 0), 10);

    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.octets()[0] == 0
                || CGNAT.contains(&v4)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped().or_else(|| v6.to_ipv4()) {
                return is_private_or_reserved(IpAddr::V4(v4));
            }
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Validate that a URL is a safe render target.
///
/// Fails with [`Error::InvalidUrl`] when the input is unparsable and
/// [`Error::BlockedTarget`] when the scheme or host is unsafe. Rejections
/// are logged as security-relevant events.
pub fn validate(raw: &str) -> Result<(), Error> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;

    let scheme = parsed.scheme();
    if !ALLOWED_SCHEMES.contains(&scheme) {
        tracing::warn!(url = raw, scheme, "ssrf: blocked scheme");
        return Err(Error::BlockedTarget(format!("scheme not allowed: {scheme}")));
    }

    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return Err(Error::InvalidUrl(format!("{raw}: missing host"))),
    };

    for pattern in BLOCKED_HOST_PATTERNS {
        if host.contains(pattern) {
            tracing::warn!(url = raw, %host, pattern, "ssrf: blocked host");
            return Err(Error::BlockedTarget(format!("host not allowed: {host}")));
        }
    }

    // Literal IP representations the string patterns miss.
    if let Some(ip) = parse_literal_ip(&host)
        && is_private_or_reserved(ip)
    {
        tracing::warn!(url = raw, %ip, "ssrf: blocked address");
        return Err(Error::BlockedTarget(format!("address not allowed: {ip}")));
    }

    Ok(())
}

/// Parse a host as a literal IP address, if it is one.
///
/// Accepts dotted-quad IPv4 and bracketed IPv6 forms.
fn parse_literal_ip(host: &str) -> Option<IpAddr> {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse::<IpAddr>().ok();
    }
    host.parse::<Ipv4Addr>().ok().map(IpAddr::V4)
}
