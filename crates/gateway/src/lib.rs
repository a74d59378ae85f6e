//! The Agent Door gateway core.
//!
//! Composes the admin surface, per-slug tenant dispatch, restart-time
//! restoration, and process lifecycle around one explicit [`GatewayState`]
//! object: the tenant map, the durable registry, the URL guard, and the
//! admin/registration rate windows. Handlers receive the state by
//! reference; tenants never hold a back-reference to the gateway.

pub mod admin;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agentdoor_config::AppConfig;
use agentdoor_core::{RegistryError, SiteRegistration, UpstreamError};
use agentdoor_door::{Door, DoorOptions, RateLimiter, error_json};
use agentdoor_guard::UrlGuard;
use agentdoor_registry::Registry;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Hard per-IP ceiling across all admin operations.
pub const ADMIN_OPS_PER_MINUTE: u32 = 20;

/// Per-IP ceiling on `POST /register`.
pub const REGISTRATIONS_PER_MINUTE: u32 = 10;

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Failed to bind listener: {0}")]
    Bind(std::io::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Shutdown drain timed out")]
    DrainTimeout,
}

/// Everything a request handler can reach. Constructed once at startup and
/// shared behind an `Arc`.
pub struct GatewayState {
    pub(crate) config: AppConfig,
    pub(crate) registry: Registry,
    pub(crate) guard: UrlGuard,
    pub(crate) doors: RwLock<HashMap<String, Arc<Door>>>,
    pub(crate) admin_limiter: RateLimiter,
    pub(crate) registration_window: RateLimiter,
    pub(crate) http: reqwest::Client,
}

impl GatewayState {
    /// The base URL used when building registration-response links. The
    /// request `Host` is honored only under a trusted-proxy policy; user
    /// headers are never echoed otherwise.
    pub(crate) fn public_base_url(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.config.base_url {
            return base.clone();
        }
        if self.config.trusted_proxy {
            let proto = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("http");
            let host = headers
                .get("x-forwarded-host")
                .or_else(|| headers.get(header::HOST))
                .and_then(|v| v.to_str().ok());
            if let Some(host) = host {
                return format!("{proto}://{host}");
            }
        }
        format!("http://127.0.0.1:{}", self.config.port)
    }
}

/// The running gateway: state plus the composed router.
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Open the registry, restore persisted tenants, and assemble the
    /// gateway. A tenant that fails to restore is logged and skipped;
    /// startup only fails on unusable storage.
    pub async fn start(config: AppConfig) -> Result<Self, GatewayError> {
        let registry = Registry::open(&config.data_dir)?;
        let state = Arc::new(GatewayState {
            guard: UrlGuard::new(config.allow_private_networks),
            doors: RwLock::new(HashMap::new()),
            admin_limiter: RateLimiter::new(),
            registration_window: RateLimiter::new(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.fetch_timeout_ms))
                .build()
                .map_err(|e| GatewayError::Server(e.to_string()))?,
            registry,
            config,
        });
        restore_tenants(&state).await;
        Ok(Self { state })
    }

    /// The full gateway router: liveness, admin routes behind rate + auth
    /// layers, and slug dispatch as the fallback.
    pub fn router(&self) -> Router {
        let state = Arc::clone(&self.state);
        let admin = Router::new()
            .route("/register", post(admin::register))
            .route("/sites", get(admin::list_sites))
            .route("/sites/{slug}", delete(admin::delete_site))
            // route_layer order: the rate window runs before auth, so bad
            // keys still consume admin budget
            .route_layer(middleware::from_fn_with_state(Arc::clone(&state), admin::auth))
            .route_layer(middleware::from_fn_with_state(Arc::clone(&state), admin::rate));

        Router::new()
            .route("/", get(admin::liveness))
            .merge(admin)
            .fallback(dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured port and run until a shutdown signal. In-flight
    /// requests get [`DRAIN_TIMEOUT`] to finish; afterwards every door is
    /// destroyed and the registry closed.
    pub async fn serve(self) -> Result<(), GatewayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(GatewayError::Bind)?;
        info!(addr = %addr, "Agent Door gateway listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut drain_rx = shutdown_rx.clone();
        let mut server = tokio::spawn(async move {
            let mut graceful_rx = shutdown_rx;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = graceful_rx.changed().await;
                })
                .await
        });

        let result = tokio::select! {
            joined = &mut server => finish(joined),
            _ = drain_rx.changed() => {
                info!("Shutdown signal received, draining in-flight requests");
                match tokio::time::timeout(DRAIN_TIMEOUT, &mut server).await {
                    Ok(joined) => finish(joined),
                    Err(_) => {
                        warn!("Drain deadline exceeded, forcing shutdown");
                        server.abort();
                        Err(GatewayError::DrainTimeout)
                    }
                }
            }
        };

        self.teardown().await;
        result
    }

    /// Destroy every tenant and close the registry.
    pub async fn teardown(&self) {
        let doors: Vec<Arc<Door>> = self.state.doors.write().await.drain().map(|(_, d)| d).collect();
        for door in doors {
            door.destroy();
        }
        if let Err(err) = self.state.registry.close().await {
            error!(error = %err, "Failed to close registry");
        }
        info!("Gateway torn down");
    }

    /// Number of live tenants.
    pub async fn tenant_count(&self) -> usize {
        self.state.doors.read().await.len()
    }
}

fn finish(joined: Result<std::io::Result<()>, tokio::task::JoinError>) -> Result<(), GatewayError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(GatewayError::Server(err.to_string())),
        Err(err) => Err(GatewayError::Server(err.to_string())),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Build one tenant runtime with the gateway's door options.
pub(crate) fn build_door(
    config: &AppConfig,
    registration: SiteRegistration,
    compiled: agentdoor_compiler::Compiled,
) -> Result<Door, UpstreamError> {
    Door::new(
        registration,
        compiled,
        DoorOptions {
            cors: config.cors_origins.clone(),
            trusted_proxy: config.trusted_proxy,
            ..DoorOptions::default()
        },
    )
}

/// Rebuild doors for every persisted registration. Failures skip the tenant
/// and keep the gateway booting.
async fn restore_tenants(state: &Arc<GatewayState>) {
    let stored = state.registry.list_with_specs().await;
    let total = stored.len();
    let mut restored = 0usize;
    for entry in stored {
        let slug = entry.registration.slug.clone();
        match restore_one(state, entry.registration, &entry.spec_json) {
            Ok(door) => {
                state.doors.write().await.insert(slug, Arc::new(door));
                restored += 1;
            }
            Err(reason) => {
                warn!(slug = %slug, reason = %reason, "Skipping tenant during restore");
            }
        }
    }
    if total > 0 {
        info!(restored, total, "Restored tenants from registry");
    }
}

fn restore_one(
    state: &Arc<GatewayState>,
    registration: SiteRegistration,
    spec_json: &str,
) -> Result<Door, String> {
    let spec: serde_json::Value =
        serde_json::from_str(spec_json).map_err(|e| format!("stored spec unparsable: {e}"))?;
    let compiled = agentdoor_compiler::compile(&spec).map_err(|e| e.to_string())?;
    build_door(&state.config, registration, compiled).map_err(|e| e.to_string())
}

/// Fallback handler: route `/<slug>/<rest>` to the slug's door with the
/// prefix stripped (plain string operations, never a regex over request
/// input). Unknown slugs get the gateway's enveloped 404.
async fn dispatch(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let path = request.uri().path();
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return not_found();
    }
    let (slug, rest) = match trimmed.split_once('/') {
        Some((slug, rest)) => (slug, format!("/{rest}")),
        None => (trimmed, "/".to_string()),
    };

    let door = state.doors.read().await.get(slug).cloned();
    let Some(door) = door else {
        return not_found();
    };

    let mut request = request;
    *request.uri_mut() = rewrite_uri(request.uri(), &rest);
    match door.router().oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Swap the path while keeping the query string.
fn rewrite_uri(uri: &Uri, new_path: &str) -> Uri {
    let path_and_query = match uri.query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path.to_string(),
    };
    Uri::builder()
        .path_and_query(path_and_query)
        .build()
        .unwrap_or_else(|_| uri.clone())
}

fn not_found() -> Response {
    error_json(StatusCode::NOT_FOUND, "Not found").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_rewrite_keeps_query() {
        let uri: Uri = "/my-store/.well-known/agents.json?x=1&y=2".parse().unwrap();
        let rewritten = rewrite_uri(&uri, "/.well-known/agents.json");
        assert_eq!(rewritten.path(), "/.well-known/agents.json");
        assert_eq!(rewritten.query(), Some("x=1&y=2"));
    }

    #[test]
    fn uri_rewrite_without_query() {
        let uri: Uri = "/my-store".parse().unwrap();
        assert_eq!(rewrite_uri(&uri, "/").path(), "/");
    }
}
