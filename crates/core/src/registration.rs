//! Tenant registration records and slug policy.
//!
//! A `SiteRegistration` is the persisted identity of one tenant: where its
//! public site lives, where its API lives, and how hard its clients may hit
//! the gateway. Wire and storage representation is camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Slugs that would shadow gateway-level routes and can never be registered.
pub const RESERVED_SLUGS: &[&str] = &[
    "register",
    "sites",
    "health",
    "admin",
    "api",
    "static",
    "assets",
    "favicon.ico",
    "robots.txt",
    ".well-known",
];

/// Inclusive bounds for a tenant's per-IP requests-per-minute limit.
pub const RATE_LIMIT_MIN: u32 = 1;
pub const RATE_LIMIT_MAX: u32 = 1000;

/// Default per-IP requests-per-minute for tenants that don't choose one.
pub const RATE_LIMIT_DEFAULT: u32 = 60;

/// A persisted tenant record. `slug` is the unique primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteRegistration {
    /// URL-safe tenant identifier; see [`slug_is_valid`].
    pub slug: String,

    /// Display name shown in discovery documents.
    pub site_name: String,

    /// Public site URL (http/https, public host).
    pub site_url: String,

    /// Upstream API base URL, trailing slash stripped.
    pub api_url: String,

    /// Explicit OpenAPI descriptor URL; when absent the spec lives at
    /// `api_url + "/openapi.json"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_api_url: Option<String>,

    /// Requests per minute per client IP, in `[RATE_LIMIT_MIN, RATE_LIMIT_MAX]`.
    pub rate_limit: u32,

    /// Wall-clock time of registration.
    pub created_at: DateTime<Utc>,
}

impl SiteRegistration {
    /// The URL the OpenAPI document is fetched from.
    pub fn spec_url(&self) -> String {
        match &self.open_api_url {
            Some(url) => url.clone(),
            None => format!("{}/openapi.json", self.api_url),
        }
    }
}

/// Validate a slug against the tenant naming policy.
///
/// Equivalent to `^[a-z0-9][a-z0-9-]{0,38}[a-z0-9]$`: 2–40 characters of
/// lowercase ASCII alphanumerics and hyphens, with no leading or trailing
/// hyphen. Checked with string operations so no regex is ever compiled from
/// request input.
pub fn slug_is_valid(slug: &str) -> bool {
    let bytes = slug.as_bytes();
    if bytes.len() < 2 || bytes.len() > 40 {
        return false;
    }
    let inner_ok = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    inner_ok && edge_ok(bytes[0]) && edge_ok(bytes[bytes.len() - 1])
}

/// True when the slug collides with a gateway-level route.
pub fn slug_is_reserved(slug: &str) -> bool {
    RESERVED_SLUGS.contains(&slug)
}

/// Strip a single trailing slash from an upstream base URL.
pub fn normalize_base_url(url: &str) -> String {
    url.strip_suffix('/').unwrap_or(url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_length_boundaries() {
        assert!(!slug_is_valid("a"));
        assert!(slug_is_valid("ab"));
        assert!(slug_is_valid(&"a".repeat(40)));
        assert!(!slug_is_valid(&"a".repeat(41)));
    }

    #[test]
    fn slug_hyphen_rules() {
        assert!(slug_is_valid("my-store"));
        assert!(slug_is_valid("a-b-c-1"));
        assert!(!slug_is_valid("-store"));
        assert!(!slug_is_valid("store-"));
    }

    #[test]
    fn slug_charset() {
        assert!(!slug_is_valid("My-Store"));
        assert!(!slug_is_valid("my_store"));
        assert!(!slug_is_valid("my store"));
        assert!(!slug_is_valid("café"));
        assert!(slug_is_valid("store42"));
    }

    #[test]
    fn reserved_slugs_rejected() {
        assert!(slug_is_reserved("register"));
        assert!(slug_is_reserved(".well-known"));
        assert!(!slug_is_reserved("my-store"));
    }

    #[test]
    fn base_url_normalization() {
        assert_eq!(normalize_base_url("https://api.x.com/"), "https://api.x.com");
        assert_eq!(normalize_base_url("https://api.x.com"), "https://api.x.com");
    }

    #[test]
    fn spec_url_defaults_to_openapi_json() {
        let reg = SiteRegistration {
            slug: "s1".into(),
            site_name: "T".into(),
            site_url: "https://a.example.com".into(),
            api_url: "https://api.example.com".into(),
            open_api_url: None,
            rate_limit: RATE_LIMIT_DEFAULT,
            created_at: Utc::now(),
        };
        assert_eq!(reg.spec_url(), "https://api.example.com/openapi.json");
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let reg = SiteRegistration {
            slug: "s1".into(),
            site_name: "T".into(),
            site_url: "https://a.example.com".into(),
            api_url: "https://api.example.com".into(),
            open_api_url: Some("https://api.example.com/spec.json".into()),
            rate_limit: 60,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&reg).unwrap();
        assert!(json.get("siteName").is_some());
        assert!(json.get("openApiUrl").is_some());
        assert!(json.get("site_name").is_none());
    }
}
