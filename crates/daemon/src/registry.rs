//! In-memory registry of service instances.
//!
//! Instances are grouped per service name, and every service has its own lock.
//! The outer map is only touched to find or create a service's lock, so
//! traffic for different services never waits on the same lock.

use beacon_common::{InstanceStatus, RegisterRequest, ServiceInstance};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::RegistryError;

const MAX_NAME_LEN: usize = 128;
/// Longest lease a client may ask for (one day).
pub const MAX_LEASE_SECONDS: u64 = 86_400;

pub type InstanceTable = HashMap<String, ServiceInstance>;
pub type ServiceHandle = Arc<RwLock<InstanceTable>>;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Lease granted to registrations that don't ask for one.
    pub default_lease: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_lease: Duration::from_secs(30),
        }
    }
}

pub struct RegistryStore {
    services: DashMap<String, ServiceHandle>,
    config: RegistryConfig,
}

impl RegistryStore {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            services: DashMap::new(),
            config,
        }
    }

    /// Insert or replace an instance record.
    pub async fn register(
        &self,
        service: &str,
        instance_id: &str,
        request: RegisterRequest,
        now: DateTime<Utc>,
    ) -> Result<ServiceInstance, RegistryError> {
        validate_name("service name", service)?;
        validate_name("instance id", instance_id)?;
        if request.host.trim().is_empty() {
            return Err(RegistryError::Validation("host must not be empty".into()));
        }
        if request.port == 0 {
            return Err(RegistryError::Validation("port must be non-zero".into()));
        }
        match request.lease_seconds {
            Some(0) => {
                return Err(RegistryError::Validation("lease_seconds must be non-zero".into()));
            }
            Some(secs) if secs > MAX_LEASE_SECONDS => {
                return Err(RegistryError::Validation(format!(
                    "lease_seconds must be at most {}",
                    MAX_LEASE_SECONDS
                )));
            }
            _ => {}
        }

        let instance = ServiceInstance {
            service_name: service.to_string(),
            instance_id: instance_id.to_string(),
            host: request.host,
            port: request.port,
            status: request.status.unwrap_or_default(),
            registered_at: now,
            last_heartbeat: now,
            lease_seconds: request
                .lease_seconds
                .unwrap_or(self.config.default_lease.as_secs().max(1)),
            metadata: request.metadata,
            lapsed_status: None,
        };

        let handle = self.handle_or_create(service);
        let mut instances = handle.write().await;
        let replaced = instances.insert(instance_id.to_string(), instance.clone()).is_some();
        drop(instances);

        info!(
            service,
            instance_id,
            host = %instance.host,
            port = instance.port,
            status = %instance.status,
            replaced,
            "registered instance"
        );
        Ok(instance)
    }

    /// Refresh the heartbeat of a registered instance.
    ///
    /// An instance the sweeper marked DOWN after its lease lapsed gets back
    /// the status it held before (UP or STARTING).
    pub async fn renew(
        &self,
        service: &str,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ServiceInstance, RegistryError> {
        let unknown = || RegistryError::UnknownInstance {
            service: service.to_string(),
            instance_id: instance_id.to_string(),
        };

        let handle = self.handle(service).ok_or_else(unknown)?;
        let mut instances = handle.write().await;
        let instance = instances.get_mut(instance_id).ok_or_else(unknown)?;

        if let Some(prior) = instance.lapsed_status.take() {
            if instance.status == InstanceStatus::Down {
                info!(service, instance_id, status = %prior, "lapsed instance renewed");
                instance.status = prior;
            }
        }
        instance.last_heartbeat = now;
        debug!(service, instance_id, "heartbeat");
        Ok(instance.clone())
    }

    /// Change an instance's status without touching its lease.
    pub async fn set_status(
        &self,
        service: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<ServiceInstance, RegistryError> {
        let unknown = || RegistryError::UnknownInstance {
            service: service.to_string(),
            instance_id: instance_id.to_string(),
        };

        let handle = self.handle(service).ok_or_else(unknown)?;
        let mut instances = handle.write().await;
        let instance = instances.get_mut(instance_id).ok_or_else(unknown)?;
        instance.status = status;
        instance.lapsed_status = None;
        info!(service, instance_id, %status, "status changed");
        Ok(instance.clone())
    }

    /// Remove an instance. Returns whether anything was removed.
    pub async fn deregister(&self, service: &str, instance_id: &str) -> bool {
        let Some(handle) = self.handle(service) else {
            return false;
        };
        let removed = handle.write().await.remove(instance_id).is_some();
        drop(handle);
        if removed {
            info!(service, instance_id, "deregistered instance");
            self.prune_if_empty(service);
        }
        removed
    }

    /// Snapshot of UP instances for a service; empty if unknown.
    pub async fn list_instances(&self, service: &str) -> Vec<ServiceInstance> {
        match self.handle(service) {
            Some(handle) => handle
                .read()
                .await
                .values()
                .filter(|i| i.status == InstanceStatus::Up)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every instance of a service regardless of status.
    pub async fn all_instances(&self, service: &str) -> Vec<ServiceInstance> {
        match self.handle(service) {
            Some(handle) => handle.read().await.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Cloned handles for every known service. Holding one does not block
    /// the outer map.
    pub(crate) fn snapshot(&self) -> Vec<(String, ServiceHandle)> {
        self.services
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Drop a service entry once it has no instances and nobody else holds
    /// its handle. `remove_if` holds the shard lock, so no one can grab the
    /// handle between the check and the removal.
    pub(crate) fn prune_if_empty(&self, service: &str) {
        let pruned = self.services.remove_if(service, |_, handle| {
            Arc::strong_count(handle) == 1
                && handle.try_read().map(|t| t.is_empty()).unwrap_or(false)
        });
        if pruned.is_some() {
            debug!(service, "pruned empty service");
        }
    }

    fn handle(&self, service: &str) -> Option<ServiceHandle> {
        self.services.get(service).map(|e| Arc::clone(e.value()))
    }

    fn handle_or_create(&self, service: &str) -> ServiceHandle {
        if let Some(handle) = self.handle(service) {
            return handle;
        }
        let entry = self.services.entry(service.to_string()).or_default();
        Arc::clone(entry.value())
    }
}

fn validate_name(what: &str, value: &str) -> Result<(), RegistryError> {
    if value.is_empty() {
        return Err(RegistryError::Validation(format!("{} must not be empty", what)));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(RegistryError::Validation(format!(
            "{} is longer than {} characters",
            what, MAX_NAME_LEN
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(RegistryError::Validation(format!(
            "{} contains invalid character {:?}",
            what, c
        )));
    }
    Ok(())
}
