use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, put},
    Router,
};
use beacon_common::{
    Properties, PublishResponse, RegisterRequest, ResolvedConfig, ServiceInstance, ServiceSummary,
    StatusUpdate,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ConfigService;
use crate::discovery::Discovery;
use crate::error::ApiError;
use crate::registry::RegistryStore;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryStore>,
    pub discovery: Discovery,
    pub config: ConfigService,
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/registry", get(list_services))
        .route("/registry/{service}", get(resolve_service))
        .route(
            "/registry/{service}/{instance_id}",
            put(register_or_renew).delete(deregister),
        )
        .route("/registry/{service}/{instance_id}/status", put(update_status))
        .route("/config/{application}/{profile}", get(fetch_config))
        .route(
            "/config/{application}/{profile}/{label}",
            get(fetch_config_at_label).put(publish_config),
        )
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

/// A JSON body registers (or replaces) the instance; an empty body is a heartbeat.
async fn register_or_renew(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<ServiceInstance>, ApiError> {
    let now = Utc::now();
    if body.iter().all(u8::is_ascii_whitespace) {
        let instance = state.registry.renew(&service, &instance_id, now).await?;
        return Ok(Json(instance));
    }

    let request: RegisterRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid registration body: {}", e)))?;
    let instance = state
        .registry
        .register(&service, &instance_id, request, now)
        .await?;
    Ok(Json(instance))
}

async fn deregister(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
) -> StatusCode {
    state.registry.deregister(&service, &instance_id).await;
    StatusCode::NO_CONTENT
}

async fn update_status(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<ServiceInstance>, ApiError> {
    let instance = state
        .registry
        .set_status(&service, &instance_id, update.status)
        .await?;
    Ok(Json(instance))
}

async fn resolve_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Json<Vec<ServiceInstance>> {
    Json(state.discovery.resolve(&service).await)
}

async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceSummary>> {
    Json(state.discovery.services().await)
}

async fn fetch_config(
    State(state): State<AppState>,
    Path((application, profile)): Path<(String, String)>,
) -> Result<Json<ResolvedConfig>, ApiError> {
    let resolved = state.config.fetch(&application, &profile, None).await?;
    Ok(Json(resolved))
}

async fn fetch_config_at_label(
    State(state): State<AppState>,
    Path((application, profile, label)): Path<(String, String, String)>,
) -> Result<Json<ResolvedConfig>, ApiError> {
    let resolved = state
        .config
        .fetch(&application, &profile, Some(&label))
        .await?;
    Ok(Json(resolved))
}

async fn publish_config(
    State(state): State<AppState>,
    Path((application, profile, label)): Path<(String, String, String)>,
    Json(properties): Json<Properties>,
) -> Result<Json<PublishResponse>, ApiError> {
    let doc = state
        .config
        .publish(&application, &profile, Some(&label), properties)
        .await?;
    Ok(Json(PublishResponse {
        application: doc.application,
        profile: doc.profile,
        label: doc.label,
        version: doc.version,
    }))
}
