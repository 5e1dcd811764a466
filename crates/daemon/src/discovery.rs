use beacon_common::{InstanceStatus, ServiceInstance, ServiceSummary};
use std::sync::Arc;

use crate::registry::RegistryStore;

/// Read side of the registry used by clients resolving services.
#[derive(Clone)]
pub struct Discovery {
    store: Arc<RegistryStore>,
}

impl Discovery {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self { store }
    }

    /// Current UP instances of `service`, in no particular order. Unknown
    /// services resolve to an empty set.
    pub async fn resolve(&self, service: &str) -> Vec<ServiceInstance> {
        self.store.list_instances(service).await
    }

    pub async fn services(&self) -> Vec<ServiceSummary> {
        let mut out = Vec::new();
        for name in self.store.service_names() {
            let instances = self.store.all_instances(&name).await;
            if instances.is_empty() {
                continue;
            }
            out.push(ServiceSummary {
                up: instances
                    .iter()
                    .filter(|i| i.status == InstanceStatus::Up)
                    .count(),
                total: instances.len(),
                service_name: name,
            });
        }
        out
    }
}
