use serde::{Deserialize, Serialize};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::fmt;

pub mod properties;

pub type Properties = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    Starting,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Up => "UP",
            InstanceStatus::Down => "DOWN",
            InstanceStatus::Starting => "STARTING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub lease_seconds: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Status held before the lease lapsed; restored on renewal.
    #[serde(skip)]
    pub lapsed_status: Option<InstanceStatus>,
}

impl ServiceInstance {
    /// Moment after which the lease is considered lapsed. Saturates at the
    /// latest representable time.
    pub fn lease_expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.lease_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lease| self.last_heartbeat.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub host: String,
    pub port: u16,
    pub status: Option<InstanceStatus>,
    pub lease_seconds: Option<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: InstanceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub service_name: String,
    pub up: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub application: String,
    pub profile: String,
    pub label: String,
    pub version: u64,
    pub properties: Properties,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceVersion {
    pub application: String,
    pub profile: String,
    pub version: u64,
}

/// Merged configuration for one application/profile/label triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub application: String,
    pub profile: String,
    pub label: String,
    pub properties: Properties,
    /// Contributing documents, lowest precedence first.
    pub sources: Vec<SourceVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub application: String,
    pub profile: String,
    pub label: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_upper_case_on_the_wire() {
        let json = serde_json::to_string(&InstanceStatus::Starting).unwrap();
        assert_eq!(json, "\"STARTING\"");
        let parsed: InstanceStatus = serde_json::from_str("\"DOWN\"").unwrap();
        assert_eq!(parsed, InstanceStatus::Down);
    }

    #[test]
    fn register_request_accepts_minimal_body() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"host":"10.0.0.5","port":8081}"#).unwrap();
        assert_eq!(req.host, "10.0.0.5");
        assert!(req.status.is_none());
        assert!(req.metadata.is_empty());
    }

    #[test]
    fn lease_expiry_follows_last_heartbeat() {
        let now = Utc::now();
        let instance = ServiceInstance {
            service_name: "orders".into(),
            instance_id: "orders-1".into(),
            host: "localhost".into(),
            port: 9000,
            status: InstanceStatus::Up,
            registered_at: now,
            last_heartbeat: now,
            lease_seconds: 30,
            metadata: BTreeMap::new(),
            lapsed_status: None,
        };
        assert_eq!(instance.lease_expires_at(), now + chrono::Duration::seconds(30));
        assert_eq!(instance.base_url(), "http://localhost:9000");
    }

    #[test]
    fn oversized_lease_saturates_instead_of_panicking() {
        let now = Utc::now();
        let mut instance = ServiceInstance {
            service_name: "orders".into(),
            instance_id: "orders-1".into(),
            host: "localhost".into(),
            port: 9000,
            status: InstanceStatus::Up,
            registered_at: now,
            last_heartbeat: now,
            lease_seconds: u64::MAX / 2,
            metadata: BTreeMap::new(),
            lapsed_status: None,
        };
        assert_eq!(instance.lease_expires_at(), DateTime::<Utc>::MAX_UTC);

        instance.lease_seconds = u64::MAX;
        assert_eq!(instance.lease_expires_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn lapsed_status_stays_off_the_wire() {
        let now = Utc::now();
        let instance = ServiceInstance {
            service_name: "orders".into(),
            instance_id: "orders-1".into(),
            host: "localhost".into(),
            port: 9000,
            status: InstanceStatus::Down,
            registered_at: now,
            last_heartbeat: now,
            lease_seconds: 30,
            metadata: BTreeMap::new(),
            lapsed_status: Some(InstanceStatus::Starting),
        };
        let json = serde_json::to_value(&instance).unwrap();
        assert!(json.get("lapsed_status").is_none());
    }
}
