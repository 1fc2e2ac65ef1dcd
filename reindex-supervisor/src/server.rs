//! HTTP health interface.
//!
//! | Route      | Response                                         |
//! |------------|--------------------------------------------------|
//! | `/health`  | `200 OK`, or `503 UNHEALTHY (failures: N)`        |
//! | `/metrics` | `200` JSON [`HealthSnapshot`]                     |
//! | `/ready`   | `200 READY`                                       |
//! | `/reset`   | `200 OK - failures reset`                         |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::HealthServerConfig;
use crate::health::{HealthRegistry, HealthSnapshot};

/// Build the health routes over a shared registry.
pub fn router(registry: Arc<HealthRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ready", get(ready_handler))
        .route("/reset", get(reset_handler))
        .with_state(registry)
}

async fn health_handler(State(registry): State<Arc<HealthRegistry>>) -> (StatusCode, String) {
    if registry.is_healthy() {
        (StatusCode::OK, "OK".to_string())
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("UNHEALTHY (failures: {})", registry.consecutive_failures()),
        )
    }
}

async fn metrics_handler(State(registry): State<Arc<HealthRegistry>>) -> Json<HealthSnapshot> {
    Json(registry.snapshot())
}

async fn ready_handler() -> &'static str {
    "READY"
}

async fn reset_handler(State(registry): State<Arc<HealthRegistry>>) -> &'static str {
    registry.reset_failures();
    "OK - failures reset"
}

/// A running health server.
#[derive(Debug)]
pub struct HealthServer {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl HealthServer {
    /// Address actually bound, useful when the configured port is 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server to stop after shutdown was requested.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("Health server task ended abnormally: {e}");
        }
    }
}

/// Bind and serve the health interface until `shutdown` fires.
///
/// Returns `None` when disabled or when the address cannot be bound; the
/// supervisor keeps running without it.
pub async fn spawn_health_server(
    config: &HealthServerConfig,
    registry: Arc<HealthRegistry>,
    shutdown: CancellationToken,
) -> Option<HealthServer> {
    if !config.enabled {
        info!("Health server disabled");
        return None;
    }

    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Health server not started: {e}");
            return None;
        }
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Health server could not bind {addr}: {e}");
            return None;
        }
    };
    let local_addr = listener.local_addr().unwrap_or(addr);
    info!("Health server listening on http://{local_addr}");

    let app = router(registry);
    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("Health server error: {e}");
        }
    });

    Some(HealthServer { local_addr, handle })
}
