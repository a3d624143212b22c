use std::path::PathBuf;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

use crate::bulk::ReplaceStrategy;

const DEFAULT_API_PORT: u16 = 3000;
const DEFAULT_PORT_ATTEMPTS: u16 = 16;
const DEFAULT_BODY_LIMIT_BYTES: usize = 150 * 1024 * 1024;

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub api_port: u16,
    pub api_port_attempts: u16,
    pub packaged: bool,
    pub resources_dir: PathBuf,
    pub dev_dir: PathBuf,
    pub local_db_extension: String,
    pub gis_file_stem: String,
    pub gis_table: String,
    pub bulk_replace: ReplaceStrategy,
    pub body_limit_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            api_port: parse_u16("POSM_API_PORT", DEFAULT_API_PORT),
            api_port_attempts: parse_u16("POSM_API_PORT_ATTEMPTS", DEFAULT_PORT_ATTEMPTS).max(1),
            packaged: parse_bool("POSM_PACKAGED", !cfg!(debug_assertions)),
            resources_dir: env::var("POSM_RESOURCES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_resources_dir()),
            dev_dir: env::var("POSM_DEV_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR"))),
            local_db_extension: non_empty("POSM_LOCAL_DB_EXTENSION")
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or_else(|| "mdb".to_string()),
            gis_file_stem: non_empty("POSM_GIS_FILE_STEM")
                .unwrap_or_else(|| "POSMGISData".to_string()),
            gis_table: non_empty("POSM_GIS_TABLE").unwrap_or_else(|| "PosmGIS".to_string()),
            bulk_replace: non_empty("POSM_BULK_REPLACE")
                .and_then(|value| ReplaceStrategy::parse(&value))
                .unwrap_or_default(),
            body_limit_bytes: parse_usize("POSM_BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT_BYTES),
        }
    }

    pub fn config_document_path(&self) -> PathBuf {
        if self.packaged {
            self.resources_dir.join("app").join("src").join("config.json")
        } else {
            self.dev_dir.join("config.json")
        }
    }
}

fn default_resources_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("resources")))
        .unwrap_or_else(|| PathBuf::from("resources"))
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config(root: &std::path::Path) -> AppConfig {
    AppConfig {
        api_port: 0,
        api_port_attempts: 4,
        packaged: false,
        resources_dir: root.join("resources"),
        dev_dir: root.to_path_buf(),
        local_db_extension: "mdb".into(),
        gis_file_stem: "POSMGISData".into(),
        gis_table: "PosmGIS".into(),
        bulk_replace: ReplaceStrategy::default(),
        body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_from_env() {
        env::set_var("POSM_API_PORT", "4100");
        env::set_var("POSM_API_PORT_ATTEMPTS", "0");
        env::set_var("POSM_LOCAL_DB_EXTENSION", ".sqlite");

        let config = AppConfig::from_env();

        assert_eq!(config.api_port, 4100);
        assert_eq!(config.api_port_attempts, 1);
        assert_eq!(config.local_db_extension, "sqlite");
        assert_eq!(config.bulk_replace, ReplaceStrategy::Sequential);
        assert_eq!(config.gis_table, "PosmGIS");
        assert_eq!(config.body_limit_bytes, DEFAULT_BODY_LIMIT_BYTES);
    }

    #[test]
    fn picks_document_path_by_layout() {
        let root = std::path::Path::new("/opt/posm");
        let mut config = test_config(root);
        assert_eq!(config.config_document_path(), root.join("config.json"));

        config.packaged = true;
        assert_eq!(
            config.config_document_path(),
            root.join("resources").join("app").join("src").join("config.json")
        );
    }
}
