//! HTTP listener and the `/ws/{server}/{port}` upgrade endpoint

use crate::config::RelayConfig;
use crate::dialer::{Dialer, TcpDialer};
use crate::session::RelaySession;
use crate::{RelayError, RelayResult};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsbridge_policy::AccessPolicy;

/// Route of the relay endpoint
pub const RELAY_ROUTE: &str = "/ws/{server}/{port}";

#[derive(Clone)]
struct RelayState {
    policy: Arc<AccessPolicy>,
    config: Arc<RelayConfig>,
    dialer: Arc<dyn Dialer>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
}

/// Decrements the active session count when the session task ends.
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The relay HTTP service
///
/// Every session started by this server is cancelled when `shutdown` is.
#[derive(Clone)]
pub struct RelayServer {
    state: RelayState,
}

impl RelayServer {
    /// Create a server that dials targets with [`TcpDialer`].
    pub fn new(config: RelayConfig, policy: AccessPolicy, shutdown: CancellationToken) -> Self {
        let dialer = Arc::new(TcpDialer::new(config.dial_timeout, policy.clone()));
        Self {
            state: RelayState {
                policy: Arc::new(policy),
                config: Arc::new(config),
                dialer,
                shutdown,
                active: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    /// Replace the dialer.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.state.dialer = dialer;
        self
    }

    /// Router serving the relay endpoint. Merge other routes or a fallback
    /// into it as needed.
    pub fn router(&self) -> Router {
        Router::new()
            .route(RELAY_ROUTE, get(relay_handler))
            .with_state(self.state.clone())
    }

    /// Number of sessions currently relaying or dialing
    pub fn active_sessions(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }
}

/// Bind the relay's TCP listener.
pub async fn bind(address: &str, port: u16) -> RelayResult<TcpListener> {
    TcpListener::bind((address, port))
        .await
        .map_err(|e| RelayError::BindError {
            address: address.to_string(),
            port,
            reason: e.to_string(),
        })
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> RelayResult<()> {
    let local_addr = listener.local_addr()?;
    info!("Relay listening on {}", local_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Relay on {} stopped", local_addr);
    Ok(())
}

fn forbidden(body: &'static str) -> Response {
    (StatusCode::FORBIDDEN, body).into_response()
}

async fn relay_handler(
    State(state): State<RelayState>,
    Path((server, port)): Path<(String, String)>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .map(|value| value.to_str().unwrap_or_default());
    if let Err(e) = state.policy.check_origin(origin) {
        warn!("Refused relay request for {}:{}: {}", server, port, e);
        return forbidden("not allow");
    }

    // Plain GETs double as a health check.
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!("Not a WebSocket upgrade ({}), answering health check", rejection);
            return (StatusCode::OK, "OK").into_response();
        }
    };

    if let Err(e) = state.policy.check_target(&server) {
        warn!("Refused relay request: {}", e);
        return forbidden("bad request");
    }

    let port: u16 = match port.parse() {
        Ok(port) if port != 0 => port,
        _ => {
            debug!("Invalid port {:?} for {}", port, server);
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        }
    };

    let session = RelaySession::new(server, port, state.config.clone(), &state.shutdown);
    let session_id = session.id().to_string();
    debug!("[{}] Upgrading relay request for {}", session_id, session.target());

    upgrade
        .on_failed_upgrade(move |e| warn!("[{}] WebSocket upgrade failed: {}", session_id, e))
        .on_upgrade(move |socket| async move {
            let _active = ActiveSession::enter(&state.active);
            let target = session.target();
            if let Err(e) = session.run(socket, state.dialer.as_ref()).await {
                warn!("Relay to {} failed: {}", target, e);
            }
        })
}
