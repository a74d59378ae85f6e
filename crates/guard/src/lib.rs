//! SSRF guard — validates user-supplied URLs before the gateway fetches them.
//!
//! Every URL the gateway will itself dereference (spec URL, upstream base
//! URL, site URL) passes through [`UrlGuard::validate`] at registration
//! time. Hostnames are resolved up front and every returned address is
//! checked against the private/link-local/loopback ranges; proxied calls
//! later reuse the pinned base URL without re-validation.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use agentdoor_core::GuardError;
use tracing::{debug, warn};
use url::{Host, Url};

/// Hostnames rejected outright, before any DNS work.
const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "metadata.google.internal"];

/// URL validation policy.
///
/// `allow_private` admits loopback and RFC-1918 targets; it exists for
/// development and tests that stand up upstreams on loopback, and is off in
/// every production configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlGuard {
    pub allow_private: bool,
}

impl UrlGuard {
    pub fn new(allow_private: bool) -> Self {
        Self { allow_private }
    }

    /// Validate a single user-supplied URL.
    ///
    /// Checks, in order: URL syntax, scheme (`http`/`https` only), blocked
    /// hostnames, IP-literal ranges (no DNS), and finally the resolved
    /// addresses of domain names. Any single blocked address rejects the
    /// whole URL.
    pub async fn validate(&self, raw: &str) -> Result<(), GuardError> {
        let url = Url::parse(raw).map_err(|_| GuardError::Invalid)?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(GuardError::Scheme);
        }

        let host = url.host().ok_or(GuardError::Invalid)?;
        match host {
            Host::Domain(domain) => {
                let name = domain.to_ascii_lowercase();
                if BLOCKED_HOSTNAMES.contains(&name.as_str()) {
                    if self.allow_private {
                        return Ok(());
                    }
                    warn!(host = %name, "Blocked hostname in user-supplied URL");
                    return Err(GuardError::Private);
                }
                self.check_resolved(&name).await
            }
            Host::Ipv4(ip) => self.check_ip(IpAddr::V4(ip)),
            Host::Ipv6(ip) => self.check_ip(IpAddr::V6(ip)),
        }
    }

    /// Resolve A and AAAA records and require every address to be public.
    async fn check_resolved(&self, domain: &str) -> Result<(), GuardError> {
        let addrs: Vec<IpAddr> = match tokio::net::lookup_host((domain, 0u16)).await {
            Ok(iter) => iter.map(|sock| sock.ip()).collect(),
            Err(e) => {
                debug!(host = %domain, error = %e, "DNS resolution failed");
                return Err(GuardError::Unresolvable);
            }
        };
        if addrs.is_empty() {
            return Err(GuardError::Unresolvable);
        }
        for addr in addrs {
            self.check_ip(addr)?;
        }
        Ok(())
    }

    fn check_ip(&self, addr: IpAddr) -> Result<(), GuardError> {
        if !self.allow_private && ip_is_blocked(addr) {
            warn!(addr = %addr, "Blocked address in user-supplied URL");
            return Err(GuardError::Private);
        }
        Ok(())
    }
}

/// Whether an address falls in a blocked range.
///
/// IPv4: 10/8, 127/8, 172.16/12, 192.168/16, 169.254/16, 0/8.
/// IPv6: `::1`, `::`, unique-local fc00::/7, link-local fe80::/10, and
/// IPv4-mapped addresses unwrapped and rechecked as IPv4.
pub fn ip_is_blocked(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => ipv4_is_blocked(v4),
        IpAddr::V6(v6) => ipv6_is_blocked(v6),
    }
}

fn ipv4_is_blocked(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    match octets[0] {
        10 | 127 | 0 => true,
        172 => (16..=31).contains(&octets[1]),
        192 => octets[1] == 168,
        169 => octets[1] == 254,
        _ => false,
    }
}

fn ipv6_is_blocked(addr: Ipv6Addr) -> bool {
    // Both textual mapped forms (::ffff:a.b.c.d and ::ffff:XXYY:ZZWW) parse
    // to the same address, so one unwrap covers them.
    if let Some(v4) = addr.to_ipv4_mapped() {
        return ipv4_is_blocked(v4);
    }
    if addr == Ipv6Addr::LOCALHOST || addr == Ipv6Addr::UNSPECIFIED {
        return true;
    }
    let segments = addr.segments();
    // fc00::/7 unique-local
    if segments[0] & 0xfe00 == 0xfc00 {
        return true;
    }
    // fe80::/10 link-local
    if segments[0] & 0xffc0 == 0xfe80 {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> UrlGuard {
        UrlGuard::new(false)
    }

    #[tokio::test]
    async fn malformed_url_is_invalid() {
        assert_eq!(strict().validate("not a url").await, Err(GuardError::Invalid));
        assert_eq!(strict().validate("").await, Err(GuardError::Invalid));
    }

    #[tokio::test]
    async fn non_http_schemes_rejected() {
        assert_eq!(
            strict().validate("ftp://files.example.com").await,
            Err(GuardError::Scheme)
        );
        assert_eq!(
            strict().validate("file:///etc/passwd").await,
            Err(GuardError::Scheme)
        );
        assert_eq!(
            strict().validate("gopher://example.com").await,
            Err(GuardError::Scheme)
        );
    }

    #[tokio::test]
    async fn loopback_and_private_literals_rejected() {
        for url in [
            "http://127.0.0.1/admin",
            "http://10.0.0.1/",
            "http://172.16.0.1/",
            "http://172.31.255.255/",
            "http://192.168.1.1/router",
            "http://169.254.169.254/latest/meta-data/",
            "http://0.0.0.0/",
        ] {
            assert_eq!(strict().validate(url).await, Err(GuardError::Private), "{url}");
        }
    }

    #[tokio::test]
    async fn boundary_ranges_are_exact() {
        // 172.15 and 172.32 sit just outside 172.16/12
        assert!(!ipv4_is_blocked("172.15.0.1".parse().unwrap()));
        assert!(ipv4_is_blocked("172.16.0.1".parse().unwrap()));
        assert!(ipv4_is_blocked("172.31.0.1".parse().unwrap()));
        assert!(!ipv4_is_blocked("172.32.0.1".parse().unwrap()));
        assert!(!ipv4_is_blocked("192.167.0.1".parse().unwrap()));
        assert!(!ipv4_is_blocked("169.253.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn ipv6_literals_rejected() {
        assert_eq!(strict().validate("http://[::1]/").await, Err(GuardError::Private));
        assert_eq!(strict().validate("http://[::]/").await, Err(GuardError::Private));
        assert_eq!(
            strict().validate("http://[fc00::1]/").await,
            Err(GuardError::Private)
        );
        assert_eq!(
            strict().validate("http://[fe80::1]/").await,
            Err(GuardError::Private)
        );
        // Global unicast is fine
        assert!(ip_is_blocked("2001:db8::1".parse::<IpAddr>().unwrap()) == false);
    }

    #[tokio::test]
    async fn ipv4_mapped_ipv6_unwrapped() {
        assert_eq!(
            strict().validate("http://[::ffff:127.0.0.1]/").await,
            Err(GuardError::Private)
        );
        // Hex form of 169.254.169.254
        assert_eq!(
            strict().validate("http://[::ffff:a9fe:a9fe]/").await,
            Err(GuardError::Private)
        );
        // Mapped public address passes the range check
        assert!(!ip_is_blocked("::ffff:93.184.216.34".parse::<IpAddr>().unwrap()));
    }

    #[tokio::test]
    async fn blocked_hostnames_skip_dns() {
        assert_eq!(
            strict().validate("http://localhost:3000/").await,
            Err(GuardError::Private)
        );
        assert_eq!(
            strict().validate("http://LOCALHOST/").await,
            Err(GuardError::Private)
        );
        assert_eq!(
            strict().validate("http://metadata.google.internal/computeMetadata/").await,
            Err(GuardError::Private)
        );
    }

    #[tokio::test]
    async fn permissive_policy_admits_loopback() {
        let guard = UrlGuard::new(true);
        assert!(guard.validate("http://127.0.0.1:8080/").await.is_ok());
        assert!(guard.validate("http://localhost:8080/").await.is_ok());
        // Scheme and syntax checks still apply
        assert_eq!(guard.validate("ftp://127.0.0.1/").await, Err(GuardError::Scheme));
    }

    #[test]
    fn public_addresses_pass() {
        assert!(!ip_is_blocked("93.184.216.34".parse().unwrap()));
        assert!(!ip_is_blocked("8.8.8.8".parse().unwrap()));
        assert!(!ip_is_blocked("2606:2800:220:1::1".parse().unwrap()));
    }
}
