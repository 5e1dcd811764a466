//! Command-line and environment configuration for the daemon.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigServiceConfig;
use crate::lease::LeaseConfig;
use crate::registry::RegistryConfig;

/// Beacon - service registry and configuration server
#[derive(Parser, Debug, Clone)]
#[command(name = "beacon-daemon", version)]
#[command(about = "Service registry, lease sweeper and config distribution server")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "BEACON_LISTEN", default_value = "127.0.0.1:8761")]
    pub listen: SocketAddr,

    /// Lease granted to instances that don't request one, in seconds
    #[arg(long, env = "BEACON_LEASE_SECONDS", default_value_t = 30)]
    pub lease_seconds: u64,

    /// Interval between lease sweeps, in seconds
    #[arg(long, env = "BEACON_SWEEP_INTERVAL_SECONDS", default_value_t = 10)]
    pub sweep_interval_seconds: u64,

    /// How long a lapsed instance stays listed as DOWN before eviction, in seconds
    #[arg(long, env = "BEACON_EVICTION_GRACE_SECONDS", default_value_t = 30)]
    pub eviction_grace_seconds: u64,

    /// SQLite database holding config documents (default: ~/.beacon/config.db)
    #[arg(long, env = "BEACON_CONFIG_DB")]
    pub config_db: Option<PathBuf>,

    /// Directory tree ({label}/{application}/{profile}.toml) imported at startup
    #[arg(long, env = "BEACON_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Label served when a request names none
    #[arg(long, env = "BEACON_DEFAULT_LABEL", default_value = "main")]
    pub default_label: String,

    /// Upper bound for any single HTTP request, in milliseconds
    #[arg(long, env = "BEACON_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "BEACON_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "BEACON_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Args {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            default_lease: Duration::from_secs(self.lease_seconds.max(1)),
        }
    }

    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_seconds.max(1)),
            eviction_grace: Duration::from_secs(self.eviction_grace_seconds),
        }
    }

    pub fn config_service_config(&self) -> ConfigServiceConfig {
        ConfigServiceConfig {
            default_label: self.default_label.clone(),
            // Leave room inside the request timeout for the response itself.
            fetch_timeout: self.request_timeout() / 2,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn config_db_path(&self) -> PathBuf {
        self.config_db
            .clone()
            .unwrap_or_else(crate::config::db::default_db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_component_configs() {
        let args = Args::parse_from(["beacon-daemon"]);
        assert_eq!(args.listen.port(), 8761);
        assert_eq!(args.registry_config().default_lease, Duration::from_secs(30));
        assert_eq!(args.lease_config().sweep_interval, Duration::from_secs(10));
        assert_eq!(args.config_service_config().default_label, "main");
        assert_eq!(args.config_service_config().fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "beacon-daemon",
            "--lease-seconds",
            "90",
            "--sweep-interval-seconds",
            "5",
            "--default-label",
            "release",
        ]);
        assert_eq!(args.registry_config().default_lease, Duration::from_secs(90));
        assert_eq!(args.lease_config().sweep_interval, Duration::from_secs(5));
        assert_eq!(args.config_service_config().default_label, "release");
    }
}
