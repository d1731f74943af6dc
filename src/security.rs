//! Connection-target safety checks.
//!
//! The resolver fetches URLs supplied by untrusted clients, which makes it a
//! textbook SSRF target. Every outbound connection is restricted to TCP on
//! ports 80/443 toward public unicast addresses:
//!
//! - IP-literal hosts and ports are checked before a request is built, so a
//!   rejected target never causes any I/O.
//! - Hostnames are resolved through [`SafeDns`], which fails lookups that
//!   yield any non-public address.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use log::debug;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use url::{Host, Url};

/// Why a connection target was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// Network is not tcp4/tcp6
    #[error("unsafe network type")]
    UnsafeNetwork,
    /// Address is not a host:port pair
    #[error("invalid host/port pair in address")]
    InvalidAddress,
    /// Port is not 80 or 443
    #[error("unsafe port number")]
    UnsafePort,
    /// Host is not an IP literal
    #[error("invalid IP address")]
    InvalidIp,
    /// IP is not a public unicast address
    #[error("unsafe IP address")]
    UnsafeIp,
}

/// IPv4 blocks that are never dialed, as (network address, prefix length).
const RESERVED_IPV4_NETS: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),       // Current network
    (Ipv4Addr::new(10, 0, 0, 0), 8),      // Private
    (Ipv4Addr::new(100, 64, 0, 0), 10),   // Carrier-grade NAT (RFC 6598)
    (Ipv4Addr::new(127, 0, 0, 0), 8),     // Loopback
    (Ipv4Addr::new(169, 254, 0, 0), 16),  // Link-local
    (Ipv4Addr::new(172, 16, 0, 0), 12),   // Private
    (Ipv4Addr::new(192, 0, 0, 0), 24),    // IETF protocol assignments (RFC 6890)
    (Ipv4Addr::new(192, 0, 2, 0), 24),    // TEST-NET-1
    (Ipv4Addr::new(192, 88, 99, 0), 24),  // 6to4 relay
    (Ipv4Addr::new(192, 168, 0, 0), 16),  // Private
    (Ipv4Addr::new(198, 18, 0, 0), 15),   // Benchmarking
    (Ipv4Addr::new(198, 51, 100, 0), 24), // TEST-NET-2
    (Ipv4Addr::new(203, 0, 113, 0), 24),  // TEST-NET-3
    (Ipv4Addr::new(224, 0, 0, 0), 4),     // Multicast
    (Ipv4Addr::new(240, 0, 0, 0), 4),     // Reserved, includes broadcast
];

fn ipv4_net_contains(net: Ipv4Addr, prefix_len: u8, ip: Ipv4Addr) -> bool {
    let mask = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    };
    (u32::from(ip) & mask) == (u32::from(net) & mask)
}

fn is_ipv4_reserved(ip: Ipv4Addr) -> bool {
    RESERVED_IPV4_NETS
        .iter()
        .any(|&(net, prefix)| ipv4_net_contains(net, prefix, ip))
}

/// Returns `true` for addresses we are willing to connect to: IPv4 outside
/// the reserved blocks, or IPv6 in the global unicast range 2000::/3.
/// IPv4-mapped IPv6 addresses are judged by their embedded IPv4 address.
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !is_ipv4_reserved(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => !is_ipv4_reserved(v4),
            // 2000::/3: top three bits are 001
            None => (v6.segments()[0] & 0xe000) == 0x2000,
        },
    }
}

fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        // Bracketed IPv6 literal: [::1]:443
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        Some((host, port))
    } else {
        let (host, port) = address.rsplit_once(':')?;
        // More than one bare colon means an unbracketed IPv6 literal,
        // which is not a valid host:port pair.
        if host.contains(':') {
            return None;
        }
        Some((host, port))
    }
}

/// Permits only TCP connections to port 80 and 443 on public IP addresses.
///
/// Fails before any I/O is attempted.
///
/// # Arguments
///
/// * `network` - The network type, `tcp4` or `tcp6`
/// * `address` - A `host:port` pair whose host must be an IP literal
///
/// # Errors
///
/// One distinct [`TargetError`] per rejected condition, so callers can
/// report exactly which rule a target violated.
pub fn check_address(network: &str, address: &str) -> Result<(), TargetError> {
    if network != "tcp4" && network != "tcp6" {
        return Err(TargetError::UnsafeNetwork);
    }

    let (host, port) = split_host_port(address).ok_or(TargetError::InvalidAddress)?;

    if port != "80" && port != "443" {
        return Err(TargetError::UnsafePort);
    }

    let ip: IpAddr = host.parse().map_err(|_| TargetError::InvalidIp)?;

    if !is_public_ip(ip) {
        return Err(TargetError::UnsafeIp);
    }

    Ok(())
}

/// Pre-flight check for a request URL.
///
/// Rejects non-http(s) schemes, ports other than 80/443, and IP-literal
/// hosts pointing at non-public addresses. Hostname targets are left to
/// [`SafeDns`], which vets the addresses they resolve to.
pub fn check_url(url: &Url) -> Result<(), TargetError> {
    match url.scheme() {
        "http" | "https" => {}
        _ => return Err(TargetError::UnsafeNetwork),
    }

    let port = url
        .port_or_known_default()
        .ok_or(TargetError::InvalidAddress)?;
    if port != 80 && port != 443 {
        return Err(TargetError::UnsafePort);
    }

    match url.host() {
        Some(Host::Ipv4(ip)) => check_address("tcp4", &format!("{ip}:{port}")),
        Some(Host::Ipv6(ip)) => check_address("tcp6", &format!("[{ip}]:{port}")),
        Some(Host::Domain(_)) => Ok(()),
        None => Err(TargetError::InvalidAddress),
    }
}

/// DNS resolver that refuses to return non-public addresses.
///
/// Plugged into the reqwest client so that a hostname controlled by an
/// attacker cannot point the resolver at loopback, RFC 1918 space, or a
/// cloud metadata endpoint. A lookup that yields any unsafe address fails
/// entirely instead of silently filtering, which also blunts DNS answers
/// that mix public and private records.
pub struct SafeDns {
    resolver: TokioAsyncResolver,
}

impl SafeDns {
    pub fn new() -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(crate::config::DNS_TIMEOUT_SECS);
        opts.attempts = 2;

        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

impl Default for SafeDns {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolve for SafeDns {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.resolver.clone();
        Box::pin(async move {
            let lookup = resolver.lookup_ip(name.as_str()).await?;

            let mut addrs: Vec<SocketAddr> = Vec::new();
            for ip in lookup.iter() {
                if !is_public_ip(ip) {
                    debug!(
                        "refusing to dial {}: resolved to unsafe address {ip}",
                        name.as_str()
                    );
                    return Err(Box::new(TargetError::UnsafeIp) as _);
                }
                // The connector fills in the real port.
                addrs.push(SocketAddr::new(ip, 0));
            }

            if addrs.is_empty() {
                return Err(Box::new(TargetError::InvalidIp) as _);
            }

            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
