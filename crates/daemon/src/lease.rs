//! Lease expiry.
//!
//! A periodic sweep marks instances DOWN once their lease lapses and evicts
//! them after a further grace period. Each service is locked only while its
//! own instances are scanned, so discovery reads stay responsive during a
//! sweep. A dead instance can stay discoverable for up to one sweep interval
//! after its lease lapses.

use beacon_common::InstanceStatus;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::registry::RegistryStore;

#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub sweep_interval: Duration,
    /// How long a lapsed instance stays registered (DOWN) before removal.
    pub eviction_grace: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            eviction_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// (service, instance id) pairs whose lease lapsed during this sweep.
    pub marked_down: Vec<(String, String)>,
    pub evicted: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.marked_down.is_empty() && self.evicted.is_empty()
    }
}

pub struct LeaseManager {
    store: Arc<RegistryStore>,
    config: LeaseConfig,
}

impl LeaseManager {
    pub fn new(store: Arc<RegistryStore>, config: LeaseConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// One pass over every instance, judged against `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let grace = chrono::Duration::from_std(self.config.eviction_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let mut report = SweepReport::default();

        for (service, handle) in self.store.snapshot() {
            let mut instances = handle.write().await;
            instances.retain(|id, instance| {
                let expires_at = instance.lease_expires_at();
                let evict_at = expires_at
                    .checked_add_signed(grace)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                if now > evict_at {
                    report.evicted.push((service.clone(), id.clone()));
                    return false;
                }
                if now > expires_at && instance.status != InstanceStatus::Down {
                    instance.lapsed_status = Some(instance.status);
                    instance.status = InstanceStatus::Down;
                    report.marked_down.push((service.clone(), id.clone()));
                }
                true
            });
            let empty = instances.is_empty();
            drop(instances);
            drop(handle);
            if empty {
                self.store.prune_if_empty(&service);
            }
        }

        for (service, id) in &report.marked_down {
            warn!(service = %service, instance_id = %id, "lease lapsed, marked DOWN");
        }
        for (service, id) in &report.evicted {
            info!(service = %service, instance_id = %id, "evicted expired instance");
        }
        report
    }

    /// Run the sweep on a fixed interval until the handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let report = self.sweep(Utc::now()).await;
                if !report.is_empty() {
                    debug!(
                        marked_down = report.marked_down.len(),
                        evicted = report.evicted.len(),
                        "sweep finished"
                    );
                }
            }
        })
    }
}
