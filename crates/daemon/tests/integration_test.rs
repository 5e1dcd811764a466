use beacon_common::{
    ConfigDocument, ErrorBody, InstanceStatus, Properties, PublishResponse, RegisterRequest,
    ResolvedConfig, ServiceInstance, ServiceSummary, StatusUpdate,
};
use beacon_daemon::{
    assemble,
    config::{ConfigBackend, ConfigServiceConfig, SqliteConfigStore},
    error::ConfigError,
    http,
    lease::LeaseConfig,
    registry::RegistryConfig,
};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Serve a fresh daemon on an ephemeral port and return its base URL.
async fn spawn_daemon() -> String {
    let store = Arc::new(SqliteConfigStore::open_in_memory().unwrap());
    spawn_daemon_with(store, Duration::from_secs(5)).await
}

async fn spawn_daemon_with(backend: Arc<dyn ConfigBackend>, request_timeout: Duration) -> String {
    let components = assemble(
        RegistryConfig::default(),
        LeaseConfig::default(),
        backend,
        ConfigServiceConfig::default(),
    );
    let app = http::router(components.state, request_timeout);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn registration(port: u16) -> RegisterRequest {
    RegisterRequest {
        host: "127.0.0.1".to_string(),
        port,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let base = spawn_daemon().await;
    let client = Client::new();

    // 1. Register
    let resp = client
        .put(format!("{}/registry/user-service/users-1", base))
        .json(&registration(8081))
        .send()
        .await
        .expect("Failed to send register request");
    assert_eq!(resp.status(), StatusCode::OK);
    let registered: ServiceInstance = resp.json().await.unwrap();
    assert_eq!(registered.status, InstanceStatus::Up);

    // 2. Heartbeat
    let resp = client
        .put(format!("{}/registry/user-service/users-1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let renewed: ServiceInstance = resp.json().await.unwrap();
    assert!(renewed.last_heartbeat >= registered.last_heartbeat);

    // 3. Discover
    let found: Vec<ServiceInstance> = client
        .get(format!("{}/registry/user-service", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].port, 8081);

    let services: Vec<ServiceSummary> = client
        .get(format!("{}/registry", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services, vec![ServiceSummary { service_name: "user-service".into(), up: 1, total: 1 }]);

    // 4. Deregister (twice: the second is a no-op)
    for _ in 0..2 {
        let resp = client
            .delete(format!("{}/registry/user-service/users-1", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    let found: Vec<ServiceInstance> = client
        .get(format!("{}/registry/user-service", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn unknown_service_resolves_to_empty_list() {
    let base = spawn_daemon().await;
    let resp = reqwest::get(format!("{}/registry/nobody", base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let found: Vec<ServiceInstance> = resp.json().await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn heartbeat_for_unknown_instance_is_404() {
    let base = spawn_daemon().await;
    let resp = Client::new()
        .put(format!("{}/registry/user-service/ghost", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "unknown_instance");
}

#[tokio::test]
async fn malformed_registration_is_rejected() {
    let base = spawn_daemon().await;
    let client = Client::new();

    let resp = client
        .put(format!("{}/registry/user-service/users-1", base))
        .json(&registration(0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "validation");
    assert!(!body.retryable);

    let resp = client
        .put(format!("{}/registry/user-service/users-1", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let found: Vec<ServiceInstance> = client
        .get(format!("{}/registry/user-service", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn status_change_hides_instance() {
    let base = spawn_daemon().await;
    let client = Client::new();
    client
        .put(format!("{}/registry/orders/o1", base))
        .json(&registration(9000))
        .send()
        .await
        .unwrap();

    let resp = client
        .put(format!("{}/registry/orders/o1/status", base))
        .json(&StatusUpdate { status: InstanceStatus::Down })
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let found: Vec<ServiceInstance> = client
        .get(format!("{}/registry/orders", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn publish_then_fetch_merged_config() {
    let base = spawn_daemon().await;
    let client = Client::new();

    let base_doc: BTreeMap<&str, &str> = [("a", "1"), ("b", "2")].into_iter().collect();
    let prod_doc: BTreeMap<&str, &str> = [("b", "3"), ("c", "4")].into_iter().collect();

    let published: PublishResponse = client
        .put(format!("{}/config/user-service/default/main", base))
        .json(&base_doc)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(published.version, 1);
    client
        .put(format!("{}/config/user-service/prod/main", base))
        .json(&prod_doc)
        .send()
        .await
        .unwrap();

    let resolved: ResolvedConfig = client
        .get(format!("{}/config/user-service/prod", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let expected: BTreeMap<String, String> = [("a", "1"), ("b", "3"), ("c", "4")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(resolved.properties, expected);
    assert_eq!(resolved.label, "main");

    let explicit: ResolvedConfig = client
        .get(format!("{}/config/user-service/prod/main", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(explicit, resolved);
}

#[tokio::test]
async fn missing_config_is_404() {
    let base = spawn_daemon().await;
    let resp = reqwest::get(format!("{}/config/billing/dev", base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "not_found");
}

/// Config store that takes longer than any request is allowed to.
struct StalledBackend;

impl ConfigBackend for StalledBackend {
    fn latest(&self, _: &str, _: &str, _: &str) -> Result<Option<ConfigDocument>, ConfigError> {
        std::thread::sleep(Duration::from_millis(400));
        Ok(None)
    }

    fn publish(&self, _: &str, _: &str, _: &str, _: Properties) -> Result<ConfigDocument, ConfigError> {
        std::thread::sleep(Duration::from_millis(400));
        Err(ConfigError::Unavailable("stalled".into()))
    }
}

#[tokio::test]
async fn test_slow_request_times_out() {
    let base = spawn_daemon_with(Arc::new(StalledBackend), Duration::from_millis(100)).await;
    let client = Client::new();

    let resp = client
        .get(format!("{}/config/users/default", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);

    // registry routes don't touch the store and stay fast
    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
