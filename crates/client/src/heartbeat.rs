//! Keeps a registration alive.

use beacon_common::{RegisterRequest, ServiceInstance};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::BeaconClient;
use crate::error::ClientError;

/// What an instance tells the registry about itself.
#[derive(Debug, Clone)]
pub struct Registration {
    pub service: String,
    pub instance_id: String,
    pub request: RegisterRequest,
}

impl Registration {
    pub async fn register(&self, client: &BeaconClient) -> Result<ServiceInstance, ClientError> {
        client
            .register(&self.service, &self.instance_id, &self.request)
            .await
    }
}

/// Renew often enough that two consecutive misses still fit in the lease the
/// registry granted, which may differ from the one requested.
pub fn heartbeat_interval(granted: &ServiceInstance) -> Duration {
    (Duration::from_secs(granted.lease_seconds) / 3).max(Duration::from_millis(100))
}

/// Send heartbeats every `every` until the handle is aborted. When the
/// registry no longer knows the instance (it was evicted) the full
/// registration is sent again.
pub fn spawn_heartbeat(client: BeaconClient, registration: Registration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick fires immediately; the registration itself counts as one
        interval.tick().await;
        loop {
            interval.tick().await;
            match client
                .heartbeat(&registration.service, &registration.instance_id)
                .await
            {
                Ok(_) => debug!(service = %registration.service, instance_id = %registration.instance_id, "heartbeat sent"),
                Err(e) if e.is_not_found() => {
                    info!(service = %registration.service, instance_id = %registration.instance_id, "registry forgot instance, re-registering");
                    if let Err(e) = registration.register(&client).await {
                        warn!(error = %e, "re-registration failed");
                    }
                }
                Err(e) => warn!(error = %e, "heartbeat failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::InstanceStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn granted(lease_seconds: u64) -> ServiceInstance {
        ServiceInstance {
            service_name: "users".into(),
            instance_id: "u1".into(),
            host: "localhost".into(),
            port: 8080,
            status: InstanceStatus::Up,
            registered_at: Utc::now(),
            last_heartbeat: Utc::now(),
            lease_seconds,
            metadata: BTreeMap::new(),
            lapsed_status: None,
        }
    }

    #[test]
    fn interval_is_a_third_of_the_granted_lease() {
        assert_eq!(heartbeat_interval(&granted(30)), Duration::from_secs(10));
        // e.g. a daemon started with --lease-seconds 9
        assert_eq!(heartbeat_interval(&granted(9)), Duration::from_secs(3));
    }

    #[test]
    fn interval_has_a_floor() {
        assert_eq!(heartbeat_interval(&granted(0)), Duration::from_millis(100));
    }
}
