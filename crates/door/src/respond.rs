//! Response envelope and client-identity helpers shared by the tenant
//! router and the gateway.
//!
//! Every JSON answer is `{ok:true, data:…}` or `{ok:false, error:"…"}`;
//! error strings are written for clients and never carry internal detail.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde_json::{Value, json};

/// `200 {ok:true, data:…}`.
pub fn ok_json(data: Value) -> Response {
    Json(json!({"ok": true, "data": data})).into_response()
}

/// `<status> {ok:false, error:…}`.
pub fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"ok": false, "error": message}))).into_response()
}

/// `429` with a `Retry-After` header.
pub fn rate_limited(message: &str, retry_after_secs: i64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs.to_string())],
        Json(json!({"ok": false, "error": message})),
    )
        .into_response()
}

/// The opaque rate-limit key for a request.
///
/// Honors `X-Forwarded-For` (first hop) only when the deployment declared a
/// trusted proxy; otherwise uses the socket peer address, falling back to a
/// shared bucket for transports with no peer (tests, unix sockets).
pub fn client_key(headers: &HeaderMap, extensions: &Extensions, trusted_proxy: bool) -> String {
    if trusted_proxy
        && let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Pull a bearer-style token from `Authorization: Bearer <t>` or the given
/// fallback header.
pub fn bearer_token<'a>(headers: &'a HeaderMap, fallback_header: &str) -> Option<&'a str> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }
    headers
        .get(fallback_header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_takes_precedence_over_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("x-session-token", HeaderValue::from_static("def"));
        assert_eq!(bearer_token(&headers, "x-session-token"), Some("abc"));
    }

    #[test]
    fn fallback_header_used_without_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-token", HeaderValue::from_static("def"));
        assert_eq!(bearer_token(&headers, "x-session-token"), Some("def"));
        assert_eq!(bearer_token(&HeaderMap::new(), "x-session-token"), None);
    }

    #[test]
    fn forwarded_header_ignored_without_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        let extensions = Extensions::new();
        assert_eq!(client_key(&headers, &extensions, false), "unknown");
        assert_eq!(client_key(&headers, &extensions, true), "1.2.3.4");
    }

    #[test]
    fn socket_peer_used_when_present() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo::<SocketAddr>("9.8.7.6:1234".parse().unwrap()));
        assert_eq!(client_key(&HeaderMap::new(), &extensions, false), "9.8.7.6");
    }
}
