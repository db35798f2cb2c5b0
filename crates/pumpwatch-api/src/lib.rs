//! ---
//! pw_section: "05-networking-external-interfaces"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "HTTP control surface for scenarios, executors and manual alerts."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use pumpwatch_detect::{AlertAck, AlertAggregator, ManualAlert};
use pumpwatch_sim::{Ack, AssetStatus, RegistryError, ScenarioDefinition, SimulationRegistry};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared API state exposed to handlers.
pub struct ApiState {
    registry: Arc<SimulationRegistry>,
    aggregator: Arc<AlertAggregator>,
}

impl ApiState {
    pub fn new(registry: Arc<SimulationRegistry>, aggregator: Arc<AlertAggregator>) -> Self {
        Self {
            registry,
            aggregator,
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("assets", &self.registry.asset_ids())
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Routes of the control surface, without a listener.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/assets", get(get_assets))
        .route("/api/assets/:asset_id", get(get_asset))
        .route("/api/assets/:asset_id/start", post(post_start))
        .route("/api/assets/:asset_id/stop", post(post_stop))
        .route("/api/assets/:asset_id/reset", post(post_reset))
        .route("/api/scenarios", post(post_scenario))
        .route("/api/alerts", post(post_alert))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve the control surface until shutdown.
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let bound = listener.local_addr().unwrap_or(addr);
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %bound, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    assets: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::InvalidState { .. } => StatusCode::CONFLICT,
            RegistryError::ExecutorLost { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

async fn get_health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        assets: state.registry.asset_ids().len(),
    })
}

async fn get_assets(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<AssetStatus>>, ApiError> {
    Ok(Json(state.registry.status(None)?))
}

async fn get_asset(
    State(state): State<Arc<ApiState>>,
    Path(asset_id): Path<String>,
) -> Result<Json<AssetStatus>, ApiError> {
    let status = state
        .registry
        .status(Some(&asset_id))?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::from(RegistryError::NotFound { asset_id }))?;
    Ok(Json(status))
}

async fn post_scenario(
    State(state): State<Arc<ApiState>>,
    Json(document): Json<Value>,
) -> Result<(StatusCode, Json<Ack>), ApiError> {
    let definition = ScenarioDefinition::from_value(document).map_err(RegistryError::from)?;
    let ack = state.registry.load(definition).await?;
    Ok((StatusCode::CREATED, Json(ack)))
}

async fn post_start(
    State(state): State<Arc<ApiState>>,
    Path(asset_id): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    Ok(Json(state.registry.start(&asset_id).await?))
}

async fn post_stop(
    State(state): State<Arc<ApiState>>,
    Path(asset_id): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    Ok(Json(state.registry.stop(&asset_id).await?))
}

async fn post_reset(
    State(state): State<Arc<ApiState>>,
    Path(asset_id): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    Ok(Json(state.registry.reset(&asset_id).await?))
}

async fn post_alert(
    State(state): State<Arc<ApiState>>,
    Json(manual): Json<ManualAlert>,
) -> (StatusCode, Json<AlertAck>) {
    let ack = state.aggregator.trigger_alert(manual.into_event(Utc::now()));
    (StatusCode::ACCEPTED, Json(ack))
}
