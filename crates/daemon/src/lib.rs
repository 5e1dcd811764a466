pub mod args;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod lease;
pub mod logging;
pub mod registry;

use std::sync::Arc;

use config::{ConfigBackend, ConfigService, ConfigServiceConfig};
use discovery::Discovery;
use http::AppState;
use lease::{LeaseConfig, LeaseManager};
use registry::{RegistryConfig, RegistryStore};

/// Every long-lived component, wired together.
pub struct Components {
    pub state: AppState,
    pub lease: Arc<LeaseManager>,
}

pub fn assemble(
    registry: RegistryConfig,
    lease: LeaseConfig,
    backend: Arc<dyn ConfigBackend>,
    config: ConfigServiceConfig,
) -> Components {
    let store = Arc::new(RegistryStore::new(registry));
    let lease = Arc::new(LeaseManager::new(Arc::clone(&store), lease));
    let state = AppState {
        discovery: Discovery::new(Arc::clone(&store)),
        registry: store,
        config: ConfigService::new(backend, config),
    };
    Components { state, lease }
}
