//! Demo business service: registers with beacon, pulls its configuration at
//! startup and on `POST /actuator/refresh`, and serves `GET /users`.

use anyhow::Context;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use beacon_client::{heartbeat_interval, spawn_heartbeat, BeaconClient, ClientError, Registration, RetryPolicy};
use beacon_common::{Properties, RegisterRequest};
use clap::Parser;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "user-service";

#[derive(Parser, Debug, Clone)]
#[command(name = "user-service", version)]
struct Args {
    /// Address to serve on
    #[arg(long, env = "USER_SERVICE_LISTEN", default_value = "127.0.0.1:8081")]
    listen: SocketAddr,

    /// Host name advertised to the registry (default: listen address IP)
    #[arg(long, env = "USER_SERVICE_ADVERTISE_HOST")]
    advertise_host: Option<String>,

    /// Beacon daemon URL
    #[arg(long, env = "BEACON_URL", default_value = beacon_client::DEFAULT_BASE_URL)]
    beacon_url: String,

    /// Config profile(s), comma separated
    #[arg(long, env = "USER_SERVICE_PROFILE", default_value = "default")]
    profile: String,

    /// Config label (server default when omitted)
    #[arg(long, env = "USER_SERVICE_LABEL")]
    label: Option<String>,

    /// Lease requested from the registry, in seconds
    #[arg(long, env = "USER_SERVICE_LEASE_SECONDS", default_value_t = 30)]
    lease_seconds: u64,
}

#[derive(Clone)]
struct AppState {
    beacon: BeaconClient,
    profile: String,
    label: Option<String>,
    properties: Arc<RwLock<Properties>>,
}

impl AppState {
    /// Pull the current config. An application without published config
    /// runs on empty defaults.
    async fn load_config(&self) -> Result<Properties, ClientError> {
        match self
            .beacon
            .fetch_config_with_retry(SERVICE_NAME, &self.profile, self.label.as_deref(), RetryPolicy::default())
            .await
        {
            Ok(resolved) => Ok(resolved.properties),
            Err(e) if e.is_not_found() => {
                warn!("no configuration published for {}, using defaults", SERVICE_NAME);
                Ok(Properties::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let beacon = BeaconClient::new(&args.beacon_url)?;

    let state = AppState {
        beacon: beacon.clone(),
        profile: args.profile.clone(),
        label: args.label.clone(),
        properties: Arc::new(RwLock::new(Properties::new())),
    };
    let initial = state
        .load_config()
        .await
        .context("failed to fetch configuration")?;
    info!(keys = initial.len(), "configuration loaded");
    *state.properties.write().await = initial;

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    let local = listener.local_addr()?;

    let registration = Registration {
        service: SERVICE_NAME.to_string(),
        instance_id: format!("{}-{}", SERVICE_NAME, local.port()),
        request: RegisterRequest {
            host: args.advertise_host.clone().unwrap_or_else(|| local.ip().to_string()),
            port: local.port(),
            lease_seconds: Some(args.lease_seconds),
            ..Default::default()
        },
    };
    let registered = registration
        .register(&beacon)
        .await
        .context("failed to register with beacon")?;
    info!(instance_id = %registration.instance_id, addr = %local, lease_seconds = registered.lease_seconds, "registered");

    let instance_id = registration.instance_id.clone();
    let every = heartbeat_interval(&registered);
    let heartbeat = spawn_heartbeat(beacon.clone(), registration, every);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    heartbeat.abort();
    if let Err(e) = beacon.deregister(SERVICE_NAME, &instance_id).await {
        warn!(error = %e, "failed to deregister");
    }
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", get(get_users))
        .route("/actuator/env", get(get_env))
        .route("/actuator/refresh", post(refresh))
        .with_state(state)
}

async fn get_users() -> &'static str {
    "List of users"
}

async fn get_env(State(state): State<AppState>) -> Json<Properties> {
    Json(state.properties.read().await.clone())
}

/// Re-fetch configuration and report which keys changed.
async fn refresh(State(state): State<AppState>) -> (axum::http::StatusCode, Json<Value>) {
    let fresh = match state.load_config().await {
        Ok(props) => props,
        Err(e) => {
            warn!(error = %e, "refresh failed, keeping current configuration");
            return (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    let mut current = state.properties.write().await;
    let changed = changed_keys(&current, &fresh);
    *current = fresh;
    info!(changed = changed.len(), "configuration refreshed");
    (axum::http::StatusCode::OK, Json(json!(changed)))
}

fn changed_keys(old: &Properties, new: &Properties) -> Vec<String> {
    let mut keys: Vec<String> = old
        .keys()
        .chain(new.keys())
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}
