//! Admin surface — registration admission, site listing and deletion.
//!
//! Every endpoint here sits behind the admin rate window and, when a key is
//! configured, bearer authentication. With no `ADMIN_API_KEY` the surface is
//! fail-closed: requests answer 503 until the operator sets a key, so a
//! production deployment can never run open by omission.

use std::sync::Arc;
use std::time::Duration;

use agentdoor_core::registration::{
    self, RATE_LIMIT_DEFAULT, RATE_LIMIT_MAX, RATE_LIMIT_MIN, SiteRegistration,
};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use agentdoor_door::{bearer_token, client_key, error_json, ok_json, rate_limited};

use crate::{GatewayState, REGISTRATIONS_PER_MINUTE};

/// Largest `POST /register` body.
pub(crate) const MAX_REGISTER_BODY: usize = 100 * 1024;

/// Largest OpenAPI document accepted from an upstream.
pub(crate) const MAX_SPEC_BYTES: usize = 5 * 1024 * 1024;

// ── Auth ──────────────────────────────────────────────────────────────────

/// Admin bearer auth. Runs inside the rate window so bad keys still burn the
/// caller's admin budget.
pub(crate) async fn auth(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.config.admin_api_key else {
        return error_json(
            StatusCode::SERVICE_UNAVAILABLE,
            "Admin API disabled: set ADMIN_API_KEY",
        );
    };
    let provided = supplied_key(request.headers());
    if !key_matches(expected, provided) {
        warn!("Rejected admin request: missing or invalid API key");
        return error_json(StatusCode::UNAUTHORIZED, "Invalid API key");
    }
    next.run(request).await
}

fn supplied_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| bearer_token(headers, "x-api-key"))
}

/// Timing-safe key comparison over fixed-length SHA-256 digests. A missing
/// key still pays for a dummy digest compare before being refused.
fn key_matches(expected: &str, provided: Option<&str>) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let supplied = Sha256::digest(provided.unwrap_or("").as_bytes());
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(supplied.iter()) {
        diff |= a ^ b;
    }
    diff == 0 && provided.is_some()
}

/// Per-IP window over all admin operations.
pub(crate) async fn rate(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(
        request.headers(),
        request.extensions(),
        state.config.trusted_proxy,
    );
    let decision = state.admin_limiter.check(&key, crate::ADMIN_OPS_PER_MINUTE);
    if !decision.allowed {
        return rate_limited("Too many admin requests", decision.retry_after_secs());
    }
    next.run(request).await
}

// ── Body field shapes ─────────────────────────────────────────────────────

/// Shape-tagged view of one request-body field. Everything is checked by
/// shape before use; a wrong-shaped field is distinct from an absent one.
enum BodyField<'a> {
    Str(&'a str),
    Int(i64),
    Bool(bool),
    Absent,
    WrongShape,
}

fn field<'a>(body: &'a Value, key: &str) -> BodyField<'a> {
    match body.get(key) {
        None | Some(Value::Null) => BodyField::Absent,
        Some(Value::String(s)) => BodyField::Str(s),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => BodyField::Int(i),
            None => BodyField::WrongShape,
        },
        Some(Value::Bool(b)) => BodyField::Bool(*b),
        Some(_) => BodyField::WrongShape,
    }
}

fn required_string<'a>(body: &'a Value, key: &str) -> Result<&'a str, Response> {
    match field(body, key) {
        BodyField::Str(s) if !s.trim().is_empty() => Ok(s.trim()),
        BodyField::Absent | BodyField::Str(_) => Err(error_json(
            StatusCode::BAD_REQUEST,
            &format!("Missing required field: {key}"),
        )),
        _ => Err(error_json(
            StatusCode::BAD_REQUEST,
            &format!("Field {key} must be a string"),
        )),
    }
}

fn optional_string<'a>(body: &'a Value, key: &str) -> Result<Option<&'a str>, Response> {
    match field(body, key) {
        BodyField::Absent => Ok(None),
        BodyField::Str(s) if !s.trim().is_empty() => Ok(Some(s.trim())),
        _ => Err(error_json(
            StatusCode::BAD_REQUEST,
            &format!("Field {key} must be a non-empty string"),
        )),
    }
}

// ── Registration ──────────────────────────────────────────────────────────

/// `POST /register` — the admission pipeline. Validation order is fixed;
/// the first failing step terminates the request.
pub(crate) async fn register(
    State(state): State<Arc<GatewayState>>,
    request: Request,
) -> Response {
    let caller = client_key(
        request.headers(),
        request.extensions(),
        state.config.trusted_proxy,
    );
    let response_base = state.public_base_url(request.headers());

    // 1. Body size
    let bytes = match axum::body::to_bytes(request.into_body(), MAX_REGISTER_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_json(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };
    let body: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return error_json(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };

    // 2. Required strings
    let slug = match required_string(&body, "slug") {
        Ok(s) => s.to_string(),
        Err(response) => return response,
    };
    let site_name = match required_string(&body, "siteName") {
        Ok(s) => s.to_string(),
        Err(response) => return response,
    };
    let site_url = match required_string(&body, "siteUrl") {
        Ok(s) => s.to_string(),
        Err(response) => return response,
    };

    // 3. An upstream must be named
    let api_url = match optional_string(&body, "apiUrl") {
        Ok(value) => value.map(str::to_string),
        Err(response) => return response,
    };
    let open_api_url = match optional_string(&body, "openApiUrl") {
        Ok(value) => value.map(str::to_string),
        Err(response) => return response,
    };
    if api_url.is_none() && open_api_url.is_none() {
        return error_json(StatusCode::BAD_REQUEST, "Provide apiUrl or openApiUrl");
    }

    // 4. Slug policy
    if !registration::slug_is_valid(&slug) {
        return error_json(
            StatusCode::BAD_REQUEST,
            "Invalid slug: 2-40 lowercase letters, digits, or hyphens, no leading/trailing hyphen",
        );
    }

    // 5. Reserved names
    if registration::slug_is_reserved(&slug) {
        return error_json(StatusCode::BAD_REQUEST, "Slug is reserved");
    }

    // 6. Rate limit bounds
    let rate_limit = match field(&body, "rateLimit") {
        BodyField::Absent => RATE_LIMIT_DEFAULT,
        BodyField::Int(n) if (RATE_LIMIT_MIN as i64..=RATE_LIMIT_MAX as i64).contains(&n) => {
            n as u32
        }
        _ => {
            return error_json(
                StatusCode::BAD_REQUEST,
                "rateLimit must be an integer between 1 and 1000",
            );
        }
    };

    // 7. Capacity
    if state.doors.read().await.len() >= state.config.max_registrations {
        return error_json(
            StatusCode::SERVICE_UNAVAILABLE,
            "Maximum number of registrations reached",
        );
    }

    // 8. Uniqueness
    if state.doors.read().await.contains_key(&slug) || state.registry.get(&slug).await.is_some() {
        return error_json(StatusCode::CONFLICT, "Slug already registered");
    }

    // 9. URL safety: every URL the gateway may dereference
    for url in [Some(&site_url), api_url.as_ref(), open_api_url.as_ref()]
        .into_iter()
        .flatten()
    {
        if let Err(err) = state.guard.validate(url).await {
            return error_json(StatusCode::BAD_REQUEST, &err.to_string());
        }
    }

    // 10. Resolve and guard the effective spec URL
    let resolved_api_url =
        registration::normalize_base_url(api_url.as_deref().unwrap_or(&site_url));
    let spec_url = open_api_url
        .clone()
        .unwrap_or_else(|| format!("{resolved_api_url}/openapi.json"));
    if let Err(err) = state.guard.validate(&spec_url).await {
        return error_json(StatusCode::BAD_REQUEST, &err.to_string());
    }

    // 11. Registration window
    let decision = state
        .registration_window
        .check(&caller, REGISTRATIONS_PER_MINUTE);
    if !decision.allowed {
        return rate_limited("Too many registrations, slow down", 60);
    }

    // 12. Fetch, parse, compile
    let spec_text = match fetch_spec(
        &state.http,
        &spec_url,
        Duration::from_millis(state.config.fetch_timeout_ms),
    )
    .await
    {
        Ok(text) => text,
        Err(err) => {
            warn!(slug = %slug, error = %err, "Spec fetch failed");
            return error_json(StatusCode::BAD_REQUEST, &err.to_string());
        }
    };
    let spec: Value = match serde_json::from_str(&spec_text) {
        Ok(value) => value,
        Err(_) => return error_json(StatusCode::BAD_REQUEST, "OpenAPI spec is not valid JSON"),
    };
    let compiled = match agentdoor_compiler::compile(&spec) {
        Ok(compiled) => compiled,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let registration = SiteRegistration {
        slug: slug.clone(),
        site_name,
        site_url,
        api_url: resolved_api_url,
        open_api_url,
        rate_limit,
        created_at: Utc::now(),
    };

    if let Err(err) = state.registry.register(registration.clone(), spec_text).await {
        tracing::error!(slug = %slug, error = %err, "Failed to persist registration");
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
    }

    // The door must be reachable before the caller sees success.
    let door = match crate::build_door(&state.config, registration, compiled) {
        Ok(door) => door,
        Err(err) => {
            tracing::error!(slug = %slug, error = %err, "Failed to build tenant runtime");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };
    state.doors.write().await.insert(slug.clone(), Arc::new(door));

    info!(slug = %slug, "Site registered");
    ok_json(json!({
        "slug": slug,
        "gateway_url": format!("{response_base}/{slug}"),
        "agents_txt": format!("{response_base}/{slug}/.well-known/agents.txt"),
        "agents_json": format!("{response_base}/{slug}/.well-known/agents.json"),
    }))
}

// ── Spec fetch ────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("OpenAPI spec too large (max 5 MB)")]
    TooLarge,

    #[error("Could not load OpenAPI spec")]
    Failed,
}

/// Fetch the OpenAPI document under a hard deadline, enforcing the size cap
/// on both the `Content-Length` header and the streamed byte count.
async fn fetch_spec(
    client: &reqwest::Client,
    url: &str,
    deadline: Duration,
) -> Result<String, FetchError> {
    let fetch = async {
        let mut response = client.get(url).send().await.map_err(|_| FetchError::Failed)?;
        if !response.status().is_success() {
            return Err(FetchError::Failed);
        }
        if let Some(declared) = response.content_length()
            && declared > MAX_SPEC_BYTES as u64
        {
            return Err(FetchError::TooLarge);
        }
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|_| FetchError::Failed)? {
            if bytes.len() + chunk.len() > MAX_SPEC_BYTES {
                return Err(FetchError::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        String::from_utf8(bytes).map_err(|_| FetchError::Failed)
    };
    tokio::time::timeout(deadline, fetch)
        .await
        .map_err(|_| FetchError::Failed)?
}

// ── Site management ───────────────────────────────────────────────────────

/// `GET /sites` — all registrations, creation order, no spec payload.
pub(crate) async fn list_sites(State(state): State<Arc<GatewayState>>) -> Response {
    match serde_json::to_value(state.registry.list().await) {
        Ok(sites) => ok_json(sites),
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize site list");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// `DELETE /sites/{slug}` — remove the record and destroy the runtime. The
/// door leaves the dispatch map before the response; in-flight requests
/// holding a reference complete normally.
pub(crate) async fn delete_site(
    State(state): State<Arc<GatewayState>>,
    Path(slug): Path<String>,
) -> Response {
    let door = state.doors.write().await.remove(&slug);
    if let Some(door) = &door {
        door.destroy();
    }
    let persisted = match state.registry.delete(&slug).await {
        Ok(existed) => existed,
        Err(err) => {
            tracing::error!(slug = %slug, error = %err, "Failed to delete registration");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };
    if door.is_none() && !persisted {
        return error_json(StatusCode::NOT_FOUND, "Unknown slug");
    }
    info!(slug = %slug, "Site deleted");
    ok_json(json!({"slug": slug, "deleted": true}))
}

/// `GET /` — liveness. Unauthenticated by design.
pub(crate) async fn liveness() -> impl IntoResponse {
    Json(json!({
        "service": "agent-door",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
