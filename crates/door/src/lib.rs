//! The tenant runtime ("door") — one per registered site.
//!
//! A `Door` bundles the registration record, the compiled capability table,
//! a session store, and a rate limiter behind an axum router that serves
//! the tenant's `/.well-known` surface:
//!
//! - `GET  <base>/agents.txt`          — human-readable capability summary
//! - `GET  <base>/agents.json`         — machine-readable manifest
//! - `POST <base>/agents/api/session`  — create a session
//! - `DELETE <base>/agents/api/session`— end a session
//! - compiled capability routes under `<base>/agents/api/...`
//!
//! The gateway strips the `/<slug>` prefix before handing a request to the
//! door, so routes here are slug-relative. Every response carries CORS
//! headers and a `Link` advertisement for the manifest; `OPTIONS` answers
//! 204 before any route matching.

pub mod ratelimit;
pub mod respond;
pub mod session_store;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use agentdoor_compiler::{Compiled, Invocation, UpstreamCaller};
use agentdoor_config::CorsOrigins;
use agentdoor_core::{Capability, HttpMethod, ParamSpec, SiteRegistration, UpstreamError};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{RawPathParams, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, get, on, post};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

pub use ratelimit::{RateDecision, RateLimiter};
pub use respond::{bearer_token, client_key, error_json, ok_json, rate_limited};
pub use session_store::SessionStore;

/// Largest JSON body accepted on a capability route.
const MAX_CAPABILITY_BODY: usize = 1024 * 1024;

/// Header carrying a session token when `Authorization` is taken.
const SESSION_HEADER: &str = "x-session-token";

/// Construction-time knobs a door inherits from the gateway.
#[derive(Debug, Clone)]
pub struct DoorOptions {
    /// Prefix the discovery surface mounts under.
    pub base_path: String,
    pub cors: CorsOrigins,
    pub trusted_proxy: bool,
    /// Bound on each proxied upstream call.
    pub upstream_timeout: Duration,
}

impl Default for DoorOptions {
    fn default() -> Self {
        Self {
            base_path: "/.well-known".to_string(),
            cors: CorsOrigins::Any,
            trusted_proxy: false,
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

struct DoorState {
    registration: SiteRegistration,
    capabilities: Vec<Capability>,
    description: Option<String>,
    sessions: SessionStore,
    limiter: RateLimiter,
    upstream: UpstreamCaller,
    options: DoorOptions,
}

/// One tenant's runtime. Owned by the gateway's tenant map; destroyed when
/// the slug is deleted or the process shuts down.
pub struct Door {
    state: Arc<DoorState>,
    router: Router,
}

impl Door {
    /// Build the runtime for a registration and its compiled spec. Must run
    /// inside a tokio runtime (session/rate compaction tasks are spawned).
    pub fn new(
        registration: SiteRegistration,
        compiled: Compiled,
        options: DoorOptions,
    ) -> Result<Self, UpstreamError> {
        let upstream = UpstreamCaller::new(registration.api_url.clone(), options.upstream_timeout)?;
        let state = Arc::new(DoorState {
            registration,
            capabilities: compiled.capabilities,
            description: compiled.description,
            sessions: SessionStore::new(),
            limiter: RateLimiter::new(),
            upstream,
            options,
        });
        let router = build_router(Arc::clone(&state));
        Ok(Self { state, router })
    }

    /// A cheap clone of the tenant router, ready for `oneshot`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn registration(&self) -> &SiteRegistration {
        &self.state.registration
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.state.capabilities
    }

    /// Tear down the session store and rate limiter. Sessions die here
    /// regardless of remaining TTL.
    pub fn destroy(&self) {
        self.state.sessions.destroy();
        self.state.limiter.destroy();
        debug!(slug = %self.state.registration.slug, "Door destroyed");
    }
}

fn build_router(state: Arc<DoorState>) -> Router {
    let base = state.options.base_path.clone();
    let mut router: Router<Arc<DoorState>> = Router::new()
        .route(&format!("{base}/agents.txt"), get(agents_txt))
        .route(&format!("{base}/agents.json"), get(agents_json))
        .route(
            &format!("{base}/agents/api/session"),
            post(create_session).delete(end_session),
        );

    // Capability routes in compile order; the first (path, method) pair wins
    // on ambiguity, later duplicates are dropped. The fixed session routes
    // are seeded so a capability named "session" can never shadow them.
    let mut mounted: HashSet<(String, HttpMethod)> = HashSet::new();
    mounted.insert((format!("{base}/agents/api/session"), HttpMethod::Post));
    mounted.insert((format!("{base}/agents/api/session"), HttpMethod::Delete));
    for capability in &state.capabilities {
        let path = format!("{base}{}", capability.route_path());
        if !mounted.insert((path.clone(), capability.method)) {
            warn!(
                slug = %state.registration.slug,
                capability = %capability.name,
                "Duplicate capability route dropped"
            );
            continue;
        }
        let cap = Arc::new(capability.clone());
        let cap_state = Arc::clone(&state);
        let handler = move |params: RawPathParams, request: Request| {
            let state = Arc::clone(&cap_state);
            let cap = Arc::clone(&cap);
            async move { invoke_capability(state, cap, params, request).await }
        };
        router = router.route(&path, on(method_filter(capability.method), handler));
    }

    router
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(Arc::clone(&state), advertise))
        .with_state(state)
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
        HttpMethod::Put => MethodFilter::PUT,
        HttpMethod::Patch => MethodFilter::PATCH,
        HttpMethod::Delete => MethodFilter::DELETE,
    }
}

// ── Advertisement middleware ──────────────────────────────────────────────

/// CORS + `Link` headers on every response; `OPTIONS` short-circuits to 204
/// before route matching.
async fn advertise(
    State(state): State<Arc<DoorState>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_headers(&mut response, &state, origin.as_deref());
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &state, origin.as_deref());
    response
}

fn apply_headers(response: &mut Response, state: &DoorState, origin: Option<&str>) {
    let headers = response.headers_mut();
    if let Some(allow) = state.options.cors.allow_value(origin)
        && let Ok(value) = HeaderValue::from_str(&allow)
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization, X-Session-Token, X-Api-Key"),
        );
    }
    let link = format!(
        "</{}{}/agents.json>; rel=\"agent-manifest\"",
        state.registration.slug, state.options.base_path
    );
    if let Ok(value) = HeaderValue::from_str(&link) {
        headers.insert(header::LINK, value);
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────

async fn agents_txt(State(state): State<Arc<DoorState>>) -> Response {
    let reg = &state.registration;
    let mut text = String::new();
    text.push_str(&format!("# {}\n", reg.site_name));
    text.push_str(&format!("# {}\n", reg.site_url));
    if let Some(description) = &state.description {
        text.push_str(&format!("#\n# {description}\n"));
    }
    text.push_str(&format!(
        "#\n# {} capabilities. Discovery: /{}{}/agents.json\n\n",
        state.capabilities.len(),
        reg.slug,
        state.options.base_path
    ));
    for cap in &state.capabilities {
        let gate = if cap.requires_session { "  [session]" } else { "" };
        text.push_str(&format!(
            "{:<6} /{}{}{}{}\n",
            cap.method.as_str(),
            reg.slug,
            state.options.base_path,
            cap.route_path(),
            gate
        ));
        for (name, spec) in &cap.params {
            let required = if spec.required { ", required" } else { "" };
            text.push_str(&format!("       - {name} ({}{required})\n", spec.param_type));
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response()
}

#[derive(Serialize)]
struct Manifest<'a> {
    schema_version: &'static str,
    site: ManifestSite<'a>,
    capabilities: Vec<ManifestCapability<'a>>,
}

#[derive(Serialize)]
struct ManifestSite<'a> {
    name: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct ManifestCapability<'a> {
    name: &'a str,
    method: &'static str,
    params: &'a BTreeMap<String, ParamSpec>,
    requires_session: bool,
}

async fn agents_json(State(state): State<Arc<DoorState>>) -> Response {
    let manifest = Manifest {
        schema_version: "1.0",
        site: ManifestSite {
            name: &state.registration.site_name,
            url: &state.registration.site_url,
            description: state.description.as_deref(),
        },
        capabilities: state
            .capabilities
            .iter()
            .map(|cap| ManifestCapability {
                name: &cap.name,
                method: cap.method.as_str(),
                params: &cap.params,
                requires_session: cap.requires_session,
            })
            .collect(),
    };
    axum::Json(manifest).into_response()
}

// ── Session lifecycle ─────────────────────────────────────────────────────

async fn create_session(State(state): State<Arc<DoorState>>) -> Response {
    let names: Vec<String> = state.capabilities.iter().map(|c| c.name.clone()).collect();
    let session = state.sessions.create(names);
    ok_json(json!({
        "session_token": session.token,
        "expires_at": session.expires_at,
        "capabilities": session.capabilities,
    }))
}

async fn end_session(State(state): State<Arc<DoorState>>, headers: HeaderMap) -> Response {
    if let Some(token) = bearer_token(&headers, SESSION_HEADER) {
        state.sessions.end(token);
    }
    ok_json(json!({"ended": true}))
}

// ── Capability dispatch ───────────────────────────────────────────────────

async fn invoke_capability(
    state: Arc<DoorState>,
    cap: Arc<Capability>,
    params: RawPathParams,
    request: Request,
) -> Response {
    let key = client_key(
        request.headers(),
        request.extensions(),
        state.options.trusted_proxy,
    );
    let decision = state.limiter.check(&key, state.registration.rate_limit);
    if !decision.allowed {
        return rate_limited("Rate limit exceeded", decision.retry_after_secs());
    }

    if cap.requires_session {
        let valid = bearer_token(request.headers(), SESSION_HEADER)
            .and_then(|token| state.sessions.validate(token))
            .is_some();
        if !valid {
            return error_json(StatusCode::UNAUTHORIZED, "Invalid or missing session token");
        }
    }

    let path_params: HashMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let query: Vec<(String, String)> = request
        .uri()
        .query()
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let body = match read_json_body(&cap, request).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let invocation = Invocation {
        params: path_params,
        query,
        body,
    };
    match state.upstream.call(&cap, invocation).await {
        Ok(data) => ok_json(data),
        Err(err) => {
            warn!(
                slug = %state.registration.slug,
                capability = %cap.name,
                error = %err,
                "Capability call failed"
            );
            error_json(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

async fn read_json_body(
    cap: &Capability,
    request: Request,
) -> Result<Option<serde_json::Value>, Response> {
    if cap.method.is_bodyless() {
        return Ok(None);
    }
    let bytes: Bytes = match axum::body::to_bytes(request.into_body(), MAX_CAPABILITY_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Err(error_json(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large",
            ));
        }
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(error_json(StatusCode::BAD_REQUEST, "Invalid JSON body")),
    }
}

async fn not_found() -> Response {
    error_json(StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn registration(rate_limit: u32) -> SiteRegistration {
        SiteRegistration {
            slug: "toy-shop".into(),
            site_name: "Toy Shop".into(),
            site_url: "https://toys.example.com".into(),
            // Unroutable loopback port so proxied calls fail fast
            api_url: "http://127.0.0.1:1".into(),
            open_api_url: None,
            rate_limit,
            created_at: Utc::now(),
        }
    }

    fn compiled() -> Compiled {
        agentdoor_compiler::compile(&serde_json::json!({
            "info": {"description": "Toys over HTTP"},
            "paths": {
                "/items": {"get": {"operationId": "listItems"}},
                "/orders": {"post": {"operationId": "placeOrder", "x-requires-session": true}}
            }
        }))
        .unwrap()
    }

    fn door(rate_limit: u32) -> Door {
        Door::new(registration(rate_limit), compiled(), DoorOptions::default()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn manifest_lists_capabilities() {
        let response = door(60)
            .router()
            .oneshot(
                HttpRequest::get("/.well-known/agents.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::LINK));

        let manifest = body_json(response).await;
        assert_eq!(manifest["schema_version"], "1.0");
        assert_eq!(manifest["site"]["name"], "Toy Shop");
        assert_eq!(manifest["site"]["description"], "Toys over HTTP");
        let caps = manifest["capabilities"].as_array().unwrap();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0]["name"], "listItems");
        assert_eq!(caps[0]["method"], "GET");
        assert_eq!(caps[0]["requires_session"], false);
        assert_eq!(caps[1]["requires_session"], true);
    }

    #[tokio::test]
    async fn agents_txt_is_plain_text() {
        let response = door(60)
            .router()
            .oneshot(
                HttpRequest::get("/.well-known/agents.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("Toy Shop"));
        assert!(text.contains("listItems"));
    }

    #[tokio::test]
    async fn options_preflight_short_circuits() {
        let response = door(60)
            .router()
            .oneshot(
                HttpRequest::builder()
                    .method(Method::OPTIONS)
                    .uri("/.well-known/agents/api/listItems")
                    .header(header::ORIGIN, "https://agent.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let door = door(60);
        let router = door.router();

        let created = router
            .clone()
            .oneshot(
                HttpRequest::post("/.well-known/agents/api/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::OK);
        let body = body_json(created).await;
        let token = body["data"]["session_token"].as_str().unwrap().to_string();
        assert_eq!(token.len(), 64);
        assert_eq!(
            body["data"]["capabilities"],
            serde_json::json!(["listItems", "placeOrder"])
        );

        let ended = router
            .clone()
            .oneshot(
                HttpRequest::delete("/.well-known/agents/api/session")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ended.status(), StatusCode::OK);
        assert_eq!(body_json(ended).await["data"]["ended"], true);

        // Ending an unknown token is still {ended:true}
        let again = router
            .oneshot(
                HttpRequest::delete("/.well-known/agents/api/session")
                    .header("X-Session-Token", "0".repeat(64))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(again).await["data"]["ended"], true);
    }

    #[tokio::test]
    async fn gated_capability_requires_session() {
        let door = door(60);
        let router = door.router();

        let denied = router
            .clone()
            .oneshot(
                HttpRequest::post("/.well-known/agents/api/placeOrder")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        // With a session the request reaches the (unreachable) upstream
        let created = router
            .clone()
            .oneshot(
                HttpRequest::post("/.well-known/agents/api/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let token = body_json(created).await["data"]["session_token"]
            .as_str()
            .unwrap()
            .to_string();

        let attempted = router
            .oneshot(
                HttpRequest::post("/.well-known/agents/api/placeOrder")
                    .header("X-Session-Token", &token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(attempted.status(), StatusCode::BAD_REQUEST);
        let body = body_json(attempted).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "Upstream request failed");
    }

    #[tokio::test]
    async fn capability_rate_limit_enforced() {
        let door = door(2);
        let router = door.router();
        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = router
                .clone()
                .oneshot(
                    HttpRequest::get("/.well-known/agents/api/listItems")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            statuses.push(response.status());
        }
        // First two reach the (unreachable) upstream, third hits the window
        assert_eq!(
            statuses,
            vec![
                StatusCode::BAD_REQUEST,
                StatusCode::BAD_REQUEST,
                StatusCode::TOO_MANY_REQUESTS
            ]
        );

        let denied = router
            .oneshot(
                HttpRequest::get("/.well-known/agents/api/listItems")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(denied.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(body_json(denied).await["error"], "Rate limit exceeded");
    }

    #[tokio::test]
    async fn unknown_route_is_enveloped_404_with_headers() {
        let response = door(60)
            .router()
            .oneshot(
                HttpRequest::get("/.well-known/agents/api/nonsense")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(header::LINK));
        assert_eq!(body_json(response).await["ok"], false);
    }

    #[tokio::test]
    async fn invalid_json_body_rejected_before_upstream() {
        let door = door(60);
        // placeOrder is gated; mint a session first
        let router = door.router();
        let created = router
            .clone()
            .oneshot(
                HttpRequest::post("/.well-known/agents/api/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let token = body_json(created).await["data"]["session_token"]
            .as_str()
            .unwrap()
            .to_string();

        let response = router
            .oneshot(
                HttpRequest::post("/.well-known/agents/api/placeOrder")
                    .header("X-Session-Token", &token)
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Invalid JSON body");
    }

    #[tokio::test]
    async fn destroy_drops_sessions() {
        let door = door(60);
        let router = door.router();
        let created = router
            .clone()
            .oneshot(
                HttpRequest::post("/.well-known/agents/api/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let token = body_json(created).await["data"]["session_token"]
            .as_str()
            .unwrap()
            .to_string();

        door.destroy();

        let denied = router
            .oneshot(
                HttpRequest::post("/.well-known/agents/api/placeOrder")
                    .header("X-Session-Token", &token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    }
}
