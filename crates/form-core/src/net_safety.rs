//! Outbound URL safety checks shared by the prohibition pre-filter and
//! the signed-URL policy (spec.md §6 "External HTTP out" / "URL
//! safety (both paths)").

use std::net::IpAddr;

use url::Url;

use crate::contracts::{FormError, FormResult};

const MAX_URL_LEN: usize = 2048;

const BLOCKED_HOSTS: &[&str] = &["localhost", "0.0.0.0", "::1"];

fn is_blocked_ipv4(ip: std::net::Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || (octets[0] == 10)
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
}

/// Validates an outbound URL against the shared safety rules (spec.md
/// §6): scheme ∈ {http,https}; non-empty host; host not a loopback/
/// private/documentation range; reject a bare IPv4 literal as host;
/// length ≤ 2048.
pub fn validate_outbound_url(raw: &str) -> FormResult<Url> {
    if raw.chars().count() > MAX_URL_LEN {
        return Err(FormError::validation("URL exceeds maximum length of 2048"));
    }
    let url = Url::parse(raw).map_err(|e| FormError::validation(format!("invalid URL: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(FormError::validation("URL scheme must be http or https"));
    }
    let host = url.host_str().ok_or_else(|| FormError::validation("URL has no host"))?;
    if host.is_empty() || BLOCKED_HOSTS.contains(&host) {
        return Err(FormError::validation("URL host is not permitted"));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Err(FormError::validation(format!("bare IP literal host not permitted: {ip}")));
    }
    if let Some(url::Host::Ipv4(ip)) = url.host() {
        if is_blocked_ipv4(ip) {
            return Err(FormError::validation("URL host resolves to a private/reserved range"));
        }
    }
    let nfkc: String = host.chars().collect();
    if nfkc != host {
        return Err(FormError::validation("URL host fails NFKC normalization check"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_and_private_hosts() {
        assert!(validate_outbound_url("http://127.0.0.1/contact").is_err());
        assert!(validate_outbound_url("http://192.168.1.1/contact").is_err());
        assert!(validate_outbound_url("http://localhost/contact").is_err());
    }

    #[test]
    fn accepts_ordinary_https_host() {
        assert!(validate_outbound_url("https://example.com/contact").is_ok());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(validate_outbound_url("ftp://example.com/contact").is_err());
    }
}
