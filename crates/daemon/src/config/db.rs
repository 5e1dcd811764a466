use beacon_common::{ConfigDocument, Properties};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::ConfigBackend;
use crate::error::ConfigError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    application TEXT NOT NULL,
    profile TEXT NOT NULL,
    label TEXT NOT NULL,
    version INTEGER NOT NULL,
    properties TEXT NOT NULL,
    published_at TEXT NOT NULL,
    PRIMARY KEY (application, profile, label, version)
);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Initialize the database at the given path, creating the directory if needed.
pub fn init_db(path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }

    let conn = Connection::open(path)?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(SCHEMA)
}

/// Get the default database path (~/.beacon/config.db)
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".beacon")
        .join("config.db")
}

/// Load the highest version of a document.
pub fn latest_document(
    conn: &Connection,
    application: &str,
    profile: &str,
    label: &str,
) -> Result<Option<ConfigDocument>, ConfigError> {
    let row = conn
        .query_row(
            "SELECT version, properties, published_at FROM documents
             WHERE application = ?1 AND profile = ?2 AND label = ?3
             ORDER BY version DESC LIMIT 1",
            params![application, profile, label],
            |row| {
                let version: i64 = row.get(0)?;
                let properties: String = row.get(1)?;
                let published_at: String = row.get(2)?;
                Ok((version, properties, published_at))
            },
        )
        .optional()
        .map_err(classify)?;

    let Some((version, properties_json, published_at)) = row else {
        return Ok(None);
    };

    // Stored by us, so a parse failure means the row is corrupt.
    let properties: Properties = serde_json::from_str(&properties_json).map_err(|e| {
        ConfigError::Storage(rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
    })?;
    let published_at = DateTime::parse_from_rfc3339(&published_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ConfigError::Storage(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))
        })?;

    Ok(Some(ConfigDocument {
        application: application.to_string(),
        profile: profile.to_string(),
        label: label.to_string(),
        version: version as u64,
        properties,
        published_at,
    }))
}

/// Append the next version of a document in a single write transaction.
pub fn publish_document(
    conn: &mut Connection,
    application: &str,
    profile: &str,
    label: &str,
    properties: Properties,
    now: DateTime<Utc>,
) -> Result<ConfigDocument, ConfigError> {
    let properties_json = serde_json::to_string(&properties)
        .map_err(|e| ConfigError::Validation(format!("unserializable properties: {}", e)))?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(classify)?;
    let current: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM documents
             WHERE application = ?1 AND profile = ?2 AND label = ?3",
            params![application, profile, label],
            |row| row.get(0),
        )
        .map_err(classify)?;
    let version = current + 1;
    tx.execute(
        "INSERT INTO documents (application, profile, label, version, properties, published_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![application, profile, label, version, properties_json, now.to_rfc3339()],
    )
    .map_err(classify)?;
    tx.commit().map_err(classify)?;

    Ok(ConfigDocument {
        application: application.to_string(),
        profile: profile.to_string(),
        label: label.to_string(),
        version: version as u64,
        properties,
        published_at: now,
    })
}

/// Busy or locked databases are transient; everything else is a storage fault.
fn classify(err: rusqlite::Error) -> ConfigError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) | Some(ErrorCode::CannotOpen) => {
            ConfigError::Unavailable(err.to_string())
        }
        _ => ConfigError::Storage(err),
    }
}

/// SQLite-backed document store.
pub struct SqliteConfigStore {
    conn: Mutex<Connection>,
}

impl SqliteConfigStore {
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        Self::open_with_busy_timeout(path, BUSY_TIMEOUT)
    }

    /// Open with a custom wait for locks held by other connections.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, ConfigError> {
        let conn = init_db(path).map_err(classify)?;
        conn.busy_timeout(busy_timeout).map_err(classify)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, ConfigError> {
        let conn = Connection::open_in_memory()?;
        prepare(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ConfigError> {
        self.conn
            .lock()
            .map_err(|_| ConfigError::Unavailable("config store lock poisoned".into()))
    }
}

impl ConfigBackend for SqliteConfigStore {
    fn latest(
        &self,
        application: &str,
        profile: &str,
        label: &str,
    ) -> Result<Option<ConfigDocument>, ConfigError> {
        let conn = self.lock()?;
        latest_document(&conn, application, profile, label)
    }

    fn publish(
        &self,
        application: &str,
        profile: &str,
        label: &str,
        properties: Properties,
    ) -> Result<ConfigDocument, ConfigError> {
        let mut conn = self.lock()?;
        publish_document(&mut conn, application, profile, label, properties, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn versions_increase_per_triple() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        let a1 = store.publish("users", "dev", "main", props(&[("k", "1")])).unwrap();
        let a2 = store.publish("users", "dev", "main", props(&[("k", "2")])).unwrap();
        let b1 = store.publish("users", "prod", "main", props(&[("k", "3")])).unwrap();

        assert_eq!(a1.version, 1);
        assert_eq!(a2.version, 2);
        assert_eq!(b1.version, 1);

        let latest = store.latest("users", "dev", "main").unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.properties, props(&[("k", "2")]));
    }

    #[test]
    fn missing_document_is_none() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        assert!(store.latest("users", "dev", "main").unwrap().is_none());
    }

    #[test]
    fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.db");

        {
            let store = SqliteConfigStore::open(&path).unwrap();
            store.publish("users", "default", "main", props(&[("a", "1")])).unwrap();
        }

        let store = SqliteConfigStore::open(&path).unwrap();
        let doc = store.latest("users", "default", "main").unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.properties, props(&[("a", "1")]));
    }

    #[test]
    fn locked_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.db");
        let store = SqliteConfigStore::open_with_busy_timeout(&path, Duration::from_millis(50)).unwrap();

        let writer = Connection::open(&path).unwrap();
        writer.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = store
            .publish("users", "default", "main", props(&[("a", "1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Unavailable(_)), "{:?}", err);
        assert!(err.is_retryable());

        writer.execute_batch("ROLLBACK").unwrap();
        let doc = store.publish("users", "default", "main", props(&[("a", "1")])).unwrap();
        assert_eq!(doc.version, 1);
    }
}
