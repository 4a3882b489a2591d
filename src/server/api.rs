//! HTTP API server implementation

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::core::config::ServiceConfig;
use crate::core::errors::TranslationError;
use crate::core::hub::ModelFetcher;
use crate::core::models::{ErrorResponse, TranslationRequest, TranslationResponse};
use crate::core::registry::ModelRegistry;
use crate::server::page::render_index;

/// Message returned for any failure that is not the caller's fault
const INTERNAL_ERROR_MESSAGE: &str = "Error interno del servidor";

/// Application state
#[derive(Clone)]
pub struct AppState {
    registry: Arc<ModelRegistry>,
    index_page: Arc<str>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        let index_page = render_index(&registry.keys()).into();
        Self {
            registry,
            index_page,
            started_at: Utc::now(),
        }
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    languages: Vec<String>,
    started_at: DateTime<Utc>,
}

/// Language list response
#[derive(Serialize)]
struct LanguagesResponse {
    languages: Vec<LanguageInfo>,
}

#[derive(Serialize)]
struct LanguageInfo {
    lang: String,
    repo_id: String,
    revision: String,
}

/// Error wrapper that renders as `{"error": ...}`
#[derive(Debug)]
pub struct ApiError(TranslationError);

impl From<TranslationError> for ApiError {
    fn from(err: TranslationError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = if self.0.is_client_error() {
            (StatusCode::BAD_REQUEST, self.0.to_string())
        } else {
            error!("Translation request failed: {}", self.0);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR_MESSAGE.to_string(),
            )
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Translation form
async fn index(State(state): State<AppState>) -> Html<String> {
    Html(state.index_page.to_string())
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        languages: state.registry.keys(),
        started_at: state.started_at,
    })
}

/// Registered language pairs
async fn get_languages(State(state): State<AppState>) -> Json<LanguagesResponse> {
    let languages = state
        .registry
        .entries()
        .map(|entry| LanguageInfo {
            lang: entry.source.lang.to_string(),
            repo_id: entry.source.repo_id.clone(),
            revision: entry.source.revision.clone(),
        })
        .collect();

    Json(LanguagesResponse { languages })
}

/// Translation handler
async fn translate(
    State(state): State<AppState>,
    payload: Result<Json<TranslationRequest>, JsonRejection>,
) -> Result<Json<TranslationResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected translation payload: {}", rejection.body_text());
        TranslationError::InvalidPayload {
            message: rejection.body_text(),
        }
    })?;

    if request.text.is_empty() {
        return Err(TranslationError::EmptyText.into());
    }

    let entry = state
        .registry
        .get(&request.lang)
        .ok_or_else(|| TranslationError::UnsupportedLanguage {
            lang: request.lang.clone(),
        })?;

    // Generation is CPU bound; keep it off the async workers
    let translator = entry.translator();
    let text = request.text;
    let translation = tokio::task::spawn_blocking(move || translator.translate(&text))
        .await
        .map_err(|e| TranslationError::InternalError(e.to_string()))??;

    Ok(Json(TranslationResponse { translation }))
}

/// Build the router with permissive CORS on every route
pub fn router(registry: Arc<ModelRegistry>) -> Router {
    let state = AppState::new(registry);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/languages", get(get_languages))
        .route("/translate", post(translate))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running server that can be stopped or awaited
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, finish in-flight requests and wait for the task
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task.await??;
        info!("Server on {} stopped", self.local_addr);
        Ok(())
    }

    /// Serve until the server task ends on its own
    pub async fn wait(mut self) -> anyhow::Result<()> {
        // Dropping the sender would trigger shutdown
        let _shutdown_tx = self.shutdown_tx.take();
        self.task.await??;
        Ok(())
    }
}

/// Bind `host:port` (port 0 picks a free port) and serve in a background task
pub async fn spawn_server(
    host: &str,
    port: u16,
    registry: Arc<ModelRegistry>,
) -> anyhow::Result<ServerHandle> {
    let app = router(registry);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    info!("Starting server on {}", local_addr);

    Ok(ServerHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

/// Load every model, then serve until Ctrl-C (or forever when signal shutdown is off)
pub async fn run_server(config: ServiceConfig) -> anyhow::Result<()> {
    let fetcher = ModelFetcher::new(&config)?.with_progress(true);
    let registry = ModelRegistry::load_with(&config, fetcher).await?;
    info!("Serving language pairs: {}", registry.keys().join(", "));

    let handle = spawn_server(&config.host, config.port, Arc::new(registry)).await?;

    if config.shutdown_on_signal {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C, shutting down");
        handle.shutdown().await
    } else {
        handle.wait().await
    }
}
