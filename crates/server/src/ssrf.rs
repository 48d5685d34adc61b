use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SsrfError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("blocked url: {0}")]
    Blocked(String),
    #[error("dns resolution failed for {0}")]
    Resolve(String),
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    // 10/8, 172.16/12, 192.168/16, CGNAT 100.64/10
    octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    // fc00::/7 unique-local, fec0::/10 site-local
    (segments[0] & 0xfe00) == 0xfc00 || (segments[0] & 0xffc0) == 0xfec0
}

/// Extracts the IPv4 address from mapped (::ffff:a.b.c.d) and deprecated
/// compatible (::a.b.c.d) forms so IPv4 rules cannot be bypassed through an
/// IPv6 literal.
fn ipv4_from_mapped(ip: &Ipv6Addr) -> Option<Ipv4Addr> {
    let s = ip.segments();
    let mapped = s[0] == 0 && s[1] == 0 && s[2] == 0 && s[3] == 0 && s[4] == 0 && s[5] == 0xffff;
    let compat = s[0] == 0
        && s[1] == 0
        && s[2] == 0
        && s[3] == 0
        && s[4] == 0
        && s[5] == 0
        && (s[6] != 0 || s[7] != 0);
    if !mapped && !compat {
        return None;
    }
    Some(Ipv4Addr::new(
        (s[6] >> 8) as u8,
        (s[6] & 0xff) as u8,
        (s[7] >> 8) as u8,
        (s[7] & 0xff) as u8,
    ))
}

fn check_ipv4(ip: &Ipv4Addr) -> Option<&'static str> {
    if ip.is_loopback() {
        return Some("loopback address");
    }
    if is_private_ipv4(ip) {
        return Some("private address range");
    }
    if ip.is_link_local() {
        return Some("link-local address");
    }
    if ip.is_broadcast() || ip.is_multicast() {
        return Some("broadcast or multicast address");
    }
    if ip.octets()[0] == 0 {
        return Some("this-network address");
    }
    None
}

/// Returns the reason an address must never be dialled, or `None` when it is
/// publicly routable.
pub fn blocked_reason(ip: &IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => check_ipv4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = ipv4_from_mapped(v6)
                && let Some(reason) = check_ipv4(&mapped)
            {
                return Some(reason);
            }
            if v6.is_loopback() {
                return Some("loopback address");
            }
            if v6.is_unspecified() {
                return Some("unspecified address");
            }
            if is_private_ipv6(v6) {
                return Some("private address range");
            }
            if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                return Some("link-local address");
            }
            if v6.is_multicast() {
                return Some("multicast address");
            }
            None
        }
    }
}

/// Syntactic half of the guard: scheme, hostname and IP-literal checks that
/// need no network access.
pub fn check_url_syntax(raw: &str) -> Result<Url, SsrfError> {
    let url = Url::parse(raw.trim()).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(SsrfError::InvalidUrl(format!(
                "scheme '{}' is not allowed",
                scheme
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| SsrfError::InvalidUrl("url has no host".to_string()))?;
    let host_lower = host.to_ascii_lowercase();

    if host_lower == "localhost" || host_lower.ends_with(".local") {
        return Err(SsrfError::Blocked(format!("host '{}' is local", host)));
    }

    match url.host() {
        Some(url::Host::Ipv4(ip)) => {
            if let Some(reason) = blocked_reason(&IpAddr::V4(ip)) {
                return Err(SsrfError::Blocked(format!("{} ({})", ip, reason)));
            }
        }
        Some(url::Host::Ipv6(ip)) => {
            if let Some(reason) = blocked_reason(&IpAddr::V6(ip)) {
                return Err(SsrfError::Blocked(format!("{} ({})", ip, reason)));
            }
        }
        _ => {}
    }

    Ok(url)
}

/// Full guard: parse, host checks, then resolve every A/AAAA address and
/// reject on the first one inside a denied range.
pub async fn ensure_public_url(raw: &str) -> Result<Url, SsrfError> {
    let url = check_url_syntax(raw)?;

    // IP literals were already validated above.
    if matches!(url.host(), Some(url::Host::Domain(_))) {
        let host = url.host_str().unwrap_or_default().to_string();
        let port = url.port_or_known_default().unwrap_or(443);

        let addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|_| SsrfError::Resolve(host.clone()))?
            .collect::<Vec<_>>();

        if addrs.is_empty() {
            return Err(SsrfError::Resolve(host));
        }

        for addr in &addrs {
            if let Some(reason) = blocked_reason(&addr.ip()) {
                return Err(SsrfError::Blocked(format!(
                    "host '{}' resolves to {} ({})",
                    host,
                    addr.ip(),
                    reason
                )));
            }
        }
    }

    Ok(url)
}
