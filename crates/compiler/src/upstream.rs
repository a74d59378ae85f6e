//! The proxied side of a capability: one HTTP call to the registered
//! upstream, built from the capability's path template and the caller's
//! inputs.
//!
//! Non-2xx upstream answers surface only their status code; bodies go to the
//! debug log and never to the caller.

use std::collections::HashMap;
use std::time::Duration;

use agentdoor_core::{Capability, HttpMethod, UpstreamError};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Inputs to one capability invocation, as extracted by the tenant router.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Path-bound parameters, substituted into `{k}` template placeholders.
    pub params: HashMap<String, String>,
    /// Request query pairs, forwarded verbatim for bodyless verbs.
    pub query: Vec<(String, String)>,
    /// Parsed JSON request body, forwarded for body-carrying verbs.
    pub body: Option<Value>,
}

/// Calls one tenant's upstream API. Cheap to clone; the inner `reqwest`
/// client is shared.
#[derive(Debug, Clone)]
pub struct UpstreamCaller {
    client: reqwest::Client,
    base_url: String,
}

impl UpstreamCaller {
    /// Build a caller pinned to the registration's base URL.
    ///
    /// `timeout` bounds each proxied call; client disconnects additionally
    /// cancel the in-flight request when the handler future is dropped.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// Perform the single proxied call for `cap`.
    pub async fn call(&self, cap: &Capability, invocation: Invocation) -> Result<Value, UpstreamError> {
        let url = self.resolve_url(cap, &invocation)?;
        let method = request_method(cap.method);

        let mut request = self.client.request(method, url);
        if !cap.method.is_bodyless()
            && let Some(body) = &invocation.body
            && !body.is_null()
        {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(capability = %cap.name, error = %e, "Upstream request failed");
            UpstreamError::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                capability = %cap.name,
                status = status.as_u16(),
                body_len = body.len(),
                "Upstream returned an error status"
            );
            return Err(UpstreamError::Status(status.as_u16()));
        }

        response.json().await.map_err(|e| {
            debug!(capability = %cap.name, error = %e, "Upstream body was not JSON");
            UpstreamError::InvalidJson
        })
    }

    /// Resolve the capability's path template against the pinned base URL.
    ///
    /// Template segments are substituted from `params` and pushed through the
    /// URL's segment writer, which percent-encodes the values; the query
    /// string is appended pair-wise for bodyless verbs.
    fn resolve_url(&self, cap: &Capability, invocation: &Invocation) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| UpstreamError::Network(format!("bad base url: {e}")))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| UpstreamError::Network("base url cannot have segments".into()))?;
            segments.pop_if_empty();
            for segment in cap.path_template.split('/').filter(|s| !s.is_empty()) {
                segments.push(&substitute(segment, &invocation.params));
            }
        }

        if cap.method.is_bodyless() && !invocation.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&invocation.query);
        }
        Ok(url)
    }
}

fn request_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Replace every `{k}` in a template segment with its bound value.
/// Placeholders with no binding stay literal.
fn substitute(segment: &str, params: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match params.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
