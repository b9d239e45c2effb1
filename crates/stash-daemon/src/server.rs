use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use stash_store::{StorageConfig, StoreContext, StoreError, StoreResolver};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const LISTEN_ADDR_ENV: &str = "STASH_API_ADDR";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let resolver = StoreResolver::new(config.storage);
    let stores = resolver
        .context()
        .await
        .context("failed to initialize storage backends")?;
    let state = Arc::new(AppState { stores });

    let app = build_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(addr = %config.listen_addr, "stash-daemon listening");
    axum::serve(listener, app)
        .await
        .context("HTTP server exited")?;
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/blobs/:reference", get(redirect_to_blob))
        .with_state(state)
}

pub struct AppState {
    pub stores: StoreContext,
}

#[derive(Debug)]
struct AppConfig {
    listen_addr: SocketAddr,
    storage: StorageConfig,
}

impl AppConfig {
    fn from_env() -> Result<Self> {
        let listen_addr = env::var(LISTEN_ADDR_ENV)
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .with_context(|| format!("invalid {LISTEN_ADDR_ENV}"))?;
        let storage = StorageConfig::from_env().context("invalid storage configuration")?;
        Ok(Self {
            listen_addr,
            storage,
        })
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    records: &'static str,
    blobs: &'static str,
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        records: state.stores.records.backend(),
        blobs: state.stores.blobs.backend(),
    })
}

async fn redirect_to_blob(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Response, ApiError> {
    let Some(url) = state.stores.blobs.get(&reference).await? else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("blob '{reference}' not found"),
        ));
    };
    let location = HeaderValue::from_str(&url).map_err(ApiError::internal)?;
    Ok((StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response())
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

    fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "api error");
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}
