use std::fs;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use crate::errors::{AppError, AppResult};

pub const REMOTE_CONNECTION_LABEL: &str = "SQL Connection";
pub const LOCAL_CONNECTION_LABEL: &str = "Access Connection";

const REDACTED: &str = "<redacted>";
const PASSWORD_KEY: &str = "SQLPass";

pub fn redact(secret: &str) -> &str {
    if secret.is_empty() {
        secret
    } else {
        REDACTED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionMode {
    Remote,
    LocalFile,
}

impl ConnectionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            REMOTE_CONNECTION_LABEL => Some(ConnectionMode::Remote),
            LOCAL_CONNECTION_LABEL => Some(ConnectionMode::LocalFile),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionMode::Remote => REMOTE_CONNECTION_LABEL,
            ConnectionMode::LocalFile => LOCAL_CONNECTION_LABEL,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    #[serde(rename = "connectionType")]
    pub connection_type: String,
    #[serde(rename = "SQLInstance")]
    pub sql_instance: String,
    #[serde(rename = "databaseName")]
    pub database_name: String,
    #[serde(rename = "SQLUser")]
    pub sql_user: String,
    #[serde(rename = "SQLPass")]
    pub sql_pass: String,
    #[serde(rename = "posmExecutablePath")]
    pub posm_executable_path: String,
    #[serde(rename = "selectedLayer")]
    pub selected_layer: String,
    #[serde(rename = "inspectionType")]
    pub inspection_type: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "mapId")]
    pub map_id: String,
    #[serde(rename = "idField")]
    pub id_field: String,
    #[serde(rename = "fieldName")]
    pub field_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            connection_type: LOCAL_CONNECTION_LABEL.to_string(),
            sql_instance: "localhost".to_string(),
            database_name: "POSM".to_string(),
            sql_user: String::new(),
            sql_pass: String::new(),
            posm_executable_path: String::new(),
            selected_layer: String::new(),
            inspection_type: "NASSCO PACP".to_string(),
            api_key: String::new(),
            map_id: String::new(),
            id_field: String::new(),
            field_name: "AssetID".to_string(),
            extra: Map::new(),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("connection_type", &self.connection_type)
            .field("sql_instance", &self.sql_instance)
            .field("database_name", &self.database_name)
            .field("sql_user", &self.sql_user)
            .field("sql_pass", &redact(&self.sql_pass))
            .field("posm_executable_path", &self.posm_executable_path)
            .field("selected_layer", &self.selected_layer)
            .field("inspection_type", &self.inspection_type)
            .field("api_key", &self.api_key)
            .field("map_id", &self.map_id)
            .field("id_field", &self.id_field)
            .field("field_name", &self.field_name)
            .field("extra", &self.extra)
            .finish()
    }
}

impl Configuration {
    pub fn redacted(&self) -> Value {
        let mut document = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(Value::String(password)) = document.get_mut(PASSWORD_KEY) {
            *password = redact(password).to_string();
        }
        document
    }

    pub fn connection_mode(&self) -> Option<ConnectionMode> {
        ConnectionMode::parse(&self.connection_type)
    }

    pub fn selected_layer(&self) -> Option<&str> {
        Some(self.selected_layer.as_str()).filter(|layer| !layer.is_empty())
    }
}

pub fn load(path: &Path) -> Option<Configuration> {
    info!(target: "config_store", path = %path.display(), "loading configuration document");
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            error!(
                target: "config_store",
                path = %path.display(),
                error = %err,
                "failed to read configuration document"
            );
            return None;
        }
    };
    match serde_json::from_str::<Configuration>(&contents) {
        Ok(document) => Some(document),
        Err(err) => {
            error!(
                target: "config_store",
                path = %path.display(),
                error = %err,
                "failed to parse configuration document"
            );
            None
        }
    }
}

pub fn persist(path: &Path, document: &Configuration) -> AppResult<()> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let serialized = serde_json::to_vec_pretty(document)?;
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(&serialized)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|err| AppError::Io(io::Error::from(err)))?;
    Ok(())
}

/// Owner of the in-memory configuration snapshot.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<Configuration>>,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let document = load(&path)
            .ok_or_else(|| AppError::ConfigurationMissing(path.display().to_string()))?;
        Ok(Self::with_document(path, document))
    }

    pub fn with_document(path: impl Into<PathBuf>, document: Configuration) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(document)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<Configuration> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, document: Configuration) -> AppResult<Arc<Configuration>> {
        let guard = self.current.write();
        self.store(guard, document)
    }

    pub fn update<F>(&self, change: F) -> AppResult<Arc<Configuration>>
    where
        F: FnOnce(&mut Configuration),
    {
        let guard = self.current.write();
        let mut next = Configuration::clone(&**guard);
        change(&mut next);
        self.store(guard, next)
    }

    fn store(
        &self,
        mut guard: RwLockWriteGuard<'_, Arc<Configuration>>,
        document: Configuration,
    ) -> AppResult<Arc<Configuration>> {
        if let Err(err) = persist(&self.path, &document) {
            warn!(
                target: "config_store",
                path = %self.path.display(),
                error = %err,
                "failed to write configuration document; keeping previous snapshot"
            );
            return Err(err);
        }
        let next = Arc::new(document);
        *guard = Arc::clone(&next);
        info!(target: "config_store", path = %self.path.display(), "configuration updated");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn missing_document_is_absent() {
        let dir = tempdir().unwrap();
        assert!(load(&dir.path().join("config.json")).is_none());
        let err = ConfigStore::open(dir.path().join("config.json")).err().unwrap();
        assert!(matches!(err, AppError::ConfigurationMissing(_)));
    }

    #[test]
    fn malformed_document_is_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load(&path).is_none());
    }

    #[test]
    fn reads_document_keys_and_keeps_unknown_ones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let raw = json!({
            "connectionType": "SQL Connection",
            "SQLInstance": "db01\\POSM",
            "databaseName": "Inspections",
            "SQLUser": "",
            "SQLPass": "",
            "posmExecutablePath": "C:\\POSM\\POSM.exe",
            "selectedLayer": "Sewer Mains",
            "inspectionType": "NASSCO PACP",
            "apiKey": "key",
            "mapId": "abc123",
            "idField": "FACILITYID",
            "theme": "dark"
        });
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let store = ConfigStore::open(&path).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.connection_mode(), Some(ConnectionMode::Remote));
        assert_eq!(snapshot.database_name, "Inspections");
        assert_eq!(snapshot.field_name, "AssetID");
        assert_eq!(snapshot.extra.get("theme"), Some(&json!("dark")));

        store
            .update(|doc| doc.inspection_type = "POSM".to_string())
            .unwrap();
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["inspectionType"], "POSM");
        assert_eq!(written["theme"], "dark");
        assert_eq!(written["mapId"], "abc123");
    }

    #[test]
    fn replace_swaps_snapshot_after_persisting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = ConfigStore::with_document(&path, Configuration::default());
        let before = store.snapshot();

        let after = store
            .update(|doc| doc.selected_layer = "Laterals".to_string())
            .unwrap();

        assert_eq!(before.selected_layer(), None);
        assert_eq!(after.selected_layer(), Some("Laterals"));
        assert_eq!(store.snapshot().selected_layer(), Some("Laterals"));
        assert_eq!(load(&path).unwrap(), *after);
    }

    #[test]
    fn concurrent_updates_are_all_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::with_document(&path, Configuration::default());

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    store
                        .update(|doc| {
                            doc.extra.insert(format!("worker{worker}"), json!(worker));
                        })
                        .unwrap();
                });
            }
        });

        assert_eq!(store.snapshot().extra.len(), 8);
        assert_eq!(load(&path).unwrap().extra.len(), 8);
    }

    #[test]
    fn password_is_masked_in_debug_and_redacted_forms() {
        let document = Configuration {
            sql_user: "posm".into(),
            sql_pass: "hunter2".into(),
            ..Configuration::default()
        };

        assert!(!format!("{document:?}").contains("hunter2"));
        let redacted = document.redacted();
        assert_eq!(redacted["SQLPass"], REDACTED);
        assert_eq!(redacted["SQLUser"], "posm");
        assert!(!redacted.to_string().contains("hunter2"));
        assert_eq!(Configuration::default().redacted()["SQLPass"], "");
    }

    #[test]
    fn failed_write_keeps_previous_snapshot() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let store = ConfigStore::with_document(blocker.join("config.json"), Configuration::default());

        let result = store.update(|doc| doc.inspection_type = "Custom".to_string());

        assert!(result.is_err());
        assert_eq!(store.snapshot().inspection_type, "NASSCO PACP");
    }
}
