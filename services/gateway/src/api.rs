use crate::config::ApiConfig;
use crate::error::{GatewayError, Result};
use crate::ingest::{IngestionHandler, Upload};
use crate::listing::{DisplayEntry, ListingOrchestrator};
use crate::object_store::ObjectStore;
use crate::record_store::{Record, RecordStore};
use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub listing: Arc<ListingOrchestrator>,
    pub ingest: Arc<IngestionHandler>,
    pub objects: Arc<dyn ObjectStore>,
    pub records: Arc<dyn RecordStore>,
}

/// Body of `GET /images`
#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub urls: Vec<DisplayEntry>,
}

/// Body of `POST /upload/:image_url`
#[derive(Debug, Deserialize)]
pub struct RehostRequest {
    #[serde(default)]
    pub title: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, max_body_bytes: usize) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(landing_page))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/images", get(list_images))
        .route("/images/*key", get(get_image))
        .route("/upload", post(upload_image))
        .route("/upload/:image_url", post(rehost_image))
        .route("/movies", get(list_movies))
        .route("/movies/:title", get(get_movie))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn landing_page() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "cinemage-gateway"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.records.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "database": "disconnected"
                })),
            )
        }
    }
}

/// List displayable images with temporary links
#[instrument(skip(state))]
async fn list_images(State(state): State<AppState>) -> Result<Json<ImagesResponse>> {
    let urls = state.listing.list_display_entries().await?;
    Ok(Json(ImagesResponse { urls }))
}

/// Stream one stored image back through the gateway
#[instrument(skip(state))]
async fn get_image(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response> {
    let object = state.objects.fetch(&key).await?;
    Ok(([(header::CONTENT_TYPE, object.content_type)], object.body).into_response())
}

/// Store the `image` field of a multipart form
#[instrument(skip(state, multipart))]
async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    let upload = read_image_field(&mut multipart).await?;
    state.ingest.upload_direct(upload).await?;
    Ok(Json(json!({})))
}

/// Fetch a remote image and store it as the poster for a title
#[instrument(skip(state, body))]
async fn rehost_image(
    State(state): State<AppState>,
    Path(image_url): Path<String>,
    body: std::result::Result<Json<RehostRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    // A missing or malformed body is a BadPayload, like a missing title
    let Json(request) = body?;

    // The path extractor has already percent-decoded the URL
    state
        .ingest
        .rehost_remote(&image_url, &request.title)
        .await?;
    Ok(Json(json!({})))
}

/// List every movie record
#[instrument(skip(state))]
async fn list_movies(State(state): State<AppState>) -> Result<Json<Vec<Record>>> {
    Ok(Json(state.records.list_all().await?))
}

/// Look up one movie by title; `null` when absent
#[instrument(skip(state))]
async fn get_movie(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> Result<Json<Option<Record>>> {
    Ok(Json(state.records.find_by_key(&title).await?))
}

async fn read_image_field(multipart: &mut Multipart) -> Result<Upload> {
    let bad_multipart = |e: axum::extract::multipart::MultipartError| {
        GatewayError::BadPayload(format!("malformed multipart body: {e}"))
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("image") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(String::from)
            .ok_or_else(|| GatewayError::BadPayload("image field has no file name".to_string()))?;
        let content_type = field.content_type().map(String::from);
        let body = field.bytes().await.map_err(bad_multipart)?;

        return Ok(Upload {
            file_name,
            content_type,
            body,
        });
    }

    Err(GatewayError::BadPayload(
        "missing multipart field `image`".to_string(),
    ))
}

/// Start the gateway API server, returning once `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    max_body_bytes: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = create_router(state, config, max_body_bytes);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gateway API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
