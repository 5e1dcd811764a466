//! Seed the store from a directory of TOML files.
//!
//! Layout: `{root}/{label}/{application}/{profile}.toml`. A file is published
//! only when its flattened properties differ from the latest stored version,
//! so importing the same tree twice is a no-op.

use beacon_common::properties;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::{validate_segment, ConfigBackend};
use crate::error::ConfigError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub published: usize,
    pub unchanged: usize,
}

pub fn import_dir(backend: &dyn ConfigBackend, root: &Path) -> Result<ImportReport, ConfigError> {
    let mut report = ImportReport::default();

    for label_dir in sorted_dirs(root)? {
        let label = file_name(&label_dir)?;
        for app_dir in sorted_dirs(&label_dir)? {
            let application = file_name(&app_dir)?;
            for file in sorted_entries(&app_dir)? {
                if !file.is_file() || file.extension().and_then(|e| e.to_str()) != Some("toml") {
                    continue;
                }
                let profile = file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| import_err(&file, "file name is not valid UTF-8"))?
                    .to_string();
                for (what, value) in [("label", &label), ("application", &application), ("profile", &profile)] {
                    validate_segment(what, value).map_err(|e| import_err(&file, e))?;
                }

                let text = fs::read_to_string(&file).map_err(|e| import_err(&file, e))?;
                let props = properties::parse_toml(&text).map_err(|e| import_err(&file, e))?;

                let current = backend.latest(&application, &profile, &label)?;
                if current.as_ref().map(|d| &d.properties) == Some(&props) {
                    debug!(path = %file.display(), "config unchanged");
                    report.unchanged += 1;
                    continue;
                }
                let doc = backend.publish(&application, &profile, &label, props)?;
                info!(
                    path = %file.display(),
                    application = %doc.application,
                    profile = %doc.profile,
                    label = %doc.label,
                    version = doc.version,
                    "imported config"
                );
                report.published += 1;
            }
        }
    }
    Ok(report)
}

fn sorted_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>, ConfigError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| import_err(dir, e))? {
        entries.push(entry.map_err(|e| import_err(dir, e))?.path());
    }
    entries.sort();
    Ok(entries)
}

fn sorted_dirs(dir: &Path) -> Result<Vec<std::path::PathBuf>, ConfigError> {
    Ok(sorted_entries(dir)?.into_iter().filter(|p| p.is_dir()).collect())
}

fn file_name(path: &Path) -> Result<String, ConfigError> {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| import_err(path, "name is not valid UTF-8"))
}

fn import_err(path: &Path, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Import {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqliteConfigStore;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn imports_tree_and_skips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main/users/default.toml", "greeting = \"hi\"\n[server]\nport = 8081\n");
        write(dir.path(), "main/users/prod.toml", "[server]\nport = 80\n");
        write(dir.path(), "main/users/README.md", "ignored");

        let store = SqliteConfigStore::open_in_memory().unwrap();
        let first = import_dir(&store, dir.path()).unwrap();
        assert_eq!(first, ImportReport { published: 2, unchanged: 0 });

        let second = import_dir(&store, dir.path()).unwrap();
        assert_eq!(second, ImportReport { published: 0, unchanged: 2 });

        let prod = store.latest("users", "prod", "main").unwrap().unwrap();
        assert_eq!(prod.properties.get("server.port").map(String::as_str), Some("80"));
        assert_eq!(prod.version, 1);
    }

    #[test]
    fn changed_file_gets_new_version() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main/users/default.toml", "a = 1\n");
        let store = SqliteConfigStore::open_in_memory().unwrap();
        import_dir(&store, dir.path()).unwrap();

        write(dir.path(), "main/users/default.toml", "a = 2\n");
        import_dir(&store, dir.path()).unwrap();

        let doc = store.latest("users", "default", "main").unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.properties.get("a").map(String::as_str), Some("2"));
    }

    #[test]
    fn broken_toml_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main/users/default.toml", "a = [");
        let store = SqliteConfigStore::open_in_memory().unwrap();

        let err = import_dir(&store, dir.path()).unwrap_err();
        match err {
            ConfigError::Import { path, .. } => assert!(path.ends_with("default.toml")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
