use beacon_common::{
    ErrorBody, InstanceStatus, Properties, PublishResponse, RegisterRequest, ResolvedConfig,
    ServiceInstance, ServiceSummary, StatusUpdate,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time;
use tracing::warn;

use crate::error::ClientError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8761";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the registry and config endpoints of a beacon daemon.
#[derive(Clone)]
pub struct BeaconClient {
    http: Client,
    base_url: String,
}

impl BeaconClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Every request made by this client fails once `timeout` elapses.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(
        &self,
        service: &str,
        instance_id: &str,
        request: &RegisterRequest,
    ) -> Result<ServiceInstance, ClientError> {
        let resp = self
            .http
            .put(format!("{}/registry/{}/{}", self.base_url, service, instance_id))
            .json(request)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn heartbeat(&self, service: &str, instance_id: &str) -> Result<ServiceInstance, ClientError> {
        let resp = self
            .http
            .put(format!("{}/registry/{}/{}", self.base_url, service, instance_id))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn set_status(
        &self,
        service: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<ServiceInstance, ClientError> {
        let resp = self
            .http
            .put(format!("{}/registry/{}/{}/status", self.base_url, service, instance_id))
            .json(&StatusUpdate { status })
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn deregister(&self, service: &str, instance_id: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(format!("{}/registry/{}/{}", self.base_url, service, instance_id))
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    /// UP instances of a service; empty when none are registered.
    pub async fn resolve(&self, service: &str) -> Result<Vec<ServiceInstance>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/registry/{}", self.base_url, service))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn services(&self) -> Result<Vec<ServiceSummary>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/registry", self.base_url))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn fetch_config(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<ResolvedConfig, ClientError> {
        let url = match label {
            Some(label) => format!("{}/config/{}/{}/{}", self.base_url, application, profile, label),
            None => format!("{}/config/{}/{}", self.base_url, application, profile),
        };
        let resp = self.http.get(url).send().await?;
        decode(resp).await
    }

    /// Fetch config, retrying retryable failures with exponential backoff.
    pub async fn fetch_config_with_retry(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
        policy: RetryPolicy,
    ) -> Result<ResolvedConfig, ClientError> {
        let mut backoff = policy.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.fetch_config(application, profile, label).await {
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    warn!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "config fetch failed, retrying");
                    time::sleep(backoff).await;
                    backoff = (backoff * 2).min(policy.max_backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn publish_config(
        &self,
        application: &str,
        profile: &str,
        label: &str,
        properties: &Properties,
    ) -> Result<PublishResponse, ClientError> {
        let resp = self
            .http
            .put(format!("{}/config/{}/{}/{}", self.base_url, application, profile, label))
            .json(properties)
            .send()
            .await?;
        decode(resp).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match resp.json::<ErrorBody>().await {
        Ok(body) => Err(ClientError::Api { status, body }),
        Err(_) => Err(ClientError::Status(status)),
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    Ok(check(resp).await?.json().await?)
}
