//! Configuration distribution.
//!
//! Documents are stored per (application, profile, label) and every publish
//! appends a new version. A fetch merges, lowest precedence first:
//! `application/default`, `application/{profile}`, `{app}/default`,
//! `{app}/{profile}`. `profile` may be a comma-separated list, later entries win.

pub mod db;
pub mod import;

use beacon_common::{ConfigDocument, Properties, ResolvedConfig, SourceVersion};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info};

use crate::error::ConfigError;

pub use db::SqliteConfigStore;

/// Documents shared by every application live under this name.
pub const SHARED_APPLICATION: &str = "application";
pub const DEFAULT_PROFILE: &str = "default";

/// Storage for versioned config documents. Implementations block.
pub trait ConfigBackend: Send + Sync {
    /// Highest version for the triple, if any was ever published.
    fn latest(
        &self,
        application: &str,
        profile: &str,
        label: &str,
    ) -> Result<Option<ConfigDocument>, ConfigError>;

    /// Append a new version atomically and return it.
    fn publish(
        &self,
        application: &str,
        profile: &str,
        label: &str,
        properties: Properties,
    ) -> Result<ConfigDocument, ConfigError>;
}

#[derive(Debug, Clone)]
pub struct ConfigServiceConfig {
    pub default_label: String,
    pub fetch_timeout: Duration,
}

impl Default for ConfigServiceConfig {
    fn default() -> Self {
        Self {
            default_label: "main".to_string(),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct ConfigService {
    backend: Arc<dyn ConfigBackend>,
    config: ConfigServiceConfig,
}

impl ConfigService {
    pub fn new(backend: Arc<dyn ConfigBackend>, config: ConfigServiceConfig) -> Self {
        Self { backend, config }
    }

    pub fn default_label(&self) -> &str {
        &self.config.default_label
    }

    /// Merged configuration for the triple, or `NotFound` when the
    /// application has no document of its own.
    pub async fn fetch(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<ResolvedConfig, ConfigError> {
        let label = label.unwrap_or(&self.config.default_label).to_string();
        validate_segment("application", application)?;
        validate_segment("label", &label)?;
        let profiles = parse_profiles(profile)?;
        let layers = layers(application, &profiles);

        let backend = Arc::clone(&self.backend);
        let lookup_label = label.clone();
        let docs = self
            .run_blocking(move || {
                let mut found = Vec::new();
                for (app, prof) in &layers {
                    if let Some(doc) = backend.latest(app, prof, &lookup_label)? {
                        found.push(doc);
                    }
                }
                Ok(found)
            })
            .await?;

        if !docs.iter().any(|d| d.application == application) {
            return Err(ConfigError::NotFound {
                application: application.to_string(),
                profile: profile.to_string(),
                label,
            });
        }

        debug!(application, profile, %label, sources = docs.len(), "resolved config");
        Ok(ResolvedConfig {
            application: application.to_string(),
            profile: profile.to_string(),
            properties: merge(docs.iter().map(|d| &d.properties)),
            sources: docs
                .iter()
                .map(|d| SourceVersion {
                    application: d.application.clone(),
                    profile: d.profile.clone(),
                    version: d.version,
                })
                .collect(),
            label,
        })
    }

    pub async fn publish(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
        properties: Properties,
    ) -> Result<ConfigDocument, ConfigError> {
        let label = label.unwrap_or(&self.config.default_label).to_string();
        validate_segment("application", application)?;
        validate_segment("profile", profile)?;
        validate_segment("label", &label)?;

        let backend = Arc::clone(&self.backend);
        let (app, prof) = (application.to_string(), profile.to_string());
        let doc = self
            .run_blocking(move || backend.publish(&app, &prof, &label, properties))
            .await?;
        info!(
            application = %doc.application,
            profile = %doc.profile,
            label = %doc.label,
            version = doc.version,
            "published config"
        );
        Ok(doc)
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, ConfigError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ConfigError> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(f);
        match time::timeout(self.config.fetch_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ConfigError::Unavailable(format!(
                "store task failed: {}",
                join_err
            ))),
            Err(_) => Err(ConfigError::Unavailable(format!(
                "store did not answer within {:?}",
                self.config.fetch_timeout
            ))),
        }
    }
}

/// Overlay property maps in order; later maps win on shared keys.
pub fn merge<'a>(layers: impl IntoIterator<Item = &'a Properties>) -> Properties {
    let mut merged = Properties::new();
    for layer in layers {
        for (k, v) in layer {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

fn layers(application: &str, profiles: &[String]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for app in [SHARED_APPLICATION, application] {
        let candidates = std::iter::once(DEFAULT_PROFILE)
            .chain(profiles.iter().map(String::as_str).filter(|p| *p != DEFAULT_PROFILE));
        for profile in candidates {
            let layer = (app.to_string(), profile.to_string());
            if !out.contains(&layer) {
                out.push(layer);
            }
        }
    }
    out
}

fn parse_profiles(profile: &str) -> Result<Vec<String>, ConfigError> {
    let profiles: Vec<String> = profile
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if profiles.is_empty() {
        return Err(ConfigError::Validation("profile must not be empty".into()));
    }
    for p in &profiles {
        validate_segment("profile", p)?;
    }
    Ok(profiles)
}

pub(crate) fn validate_segment(what: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{} must not be empty", what)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ConfigError::Validation(format!(
            "{} {:?} contains invalid characters",
            what, value
        )));
    }
    Ok(())
}
