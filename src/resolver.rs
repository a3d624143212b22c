use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::gateway::QueryGateway;
use crate::queries::Dialect;
use crate::settings::{redact, Configuration, ConnectionMode};

const DEFAULT_REMOTE_HOST: &str = "localhost";
const DEFAULT_DATABASE: &str = "POSM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendKind {
    Remote,
    LocalFile,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Remote => f.write_str("remote SQL"),
            BackendKind::LocalFile => f.write_str("local file"),
        }
    }
}

#[derive(Debug)]
pub enum RemoteAuth {
    Trusted { os_user: Option<String> },
    Credentials { user: String, password: SecretString },
}

#[derive(Debug)]
pub struct RemoteTarget {
    pub host: String,
    pub port: Option<u16>,
    pub instance: Option<String>,
    pub database: String,
    pub auth: RemoteAuth,
}

#[derive(Debug)]
pub enum ConnectionDescriptor {
    Remote(RemoteTarget),
    LocalFile { path: PathBuf },
}

impl ConnectionDescriptor {
    pub fn kind(&self) -> BackendKind {
        match self {
            ConnectionDescriptor::Remote(_) => BackendKind::Remote,
            ConnectionDescriptor::LocalFile { .. } => BackendKind::LocalFile,
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            ConnectionDescriptor::Remote(_) => Dialect::Postgres,
            ConnectionDescriptor::LocalFile { .. } => Dialect::Sqlite,
        }
    }

    pub fn is_trusted(&self) -> bool {
        matches!(
            self,
            ConnectionDescriptor::Remote(RemoteTarget {
                auth: RemoteAuth::Trusted { .. },
                ..
            })
        )
    }
}

/// Driver-string rendering with the password masked.
impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDescriptor::Remote(target) => {
                write!(f, "Driver={{PostgreSQL}};Server={}", target.host)?;
                if let Some(port) = target.port {
                    write!(f, ",{port}")?;
                }
                write!(f, ";Database={};", target.database)?;
                match &target.auth {
                    RemoteAuth::Trusted { .. } => f.write_str("Trusted_Connection=Yes;"),
                    RemoteAuth::Credentials { user, .. } => write!(f, "Uid={user};Pwd=********;"),
                }
            }
            ConnectionDescriptor::LocalFile { path } => {
                write!(f, "Driver={{SQLite}};DBQ={};", path.display())
            }
        }
    }
}

#[derive(Clone, Default, serde::Deserialize)]
pub struct RemoteCredentials {
    #[serde(rename = "SQLInstance", default)]
    pub sql_instance: String,
    #[serde(rename = "databaseName", default)]
    pub database_name: String,
    #[serde(rename = "SQLUser", default)]
    pub sql_user: String,
    #[serde(rename = "SQLPass", default)]
    pub sql_pass: String,
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("sql_instance", &self.sql_instance)
            .field("database_name", &self.database_name)
            .field("sql_user", &self.sql_user)
            .field("sql_pass", &redact(&self.sql_pass))
            .finish()
    }
}

impl From<&Configuration> for RemoteCredentials {
    fn from(config: &Configuration) -> Self {
        Self {
            sql_instance: config.sql_instance.clone(),
            database_name: config.database_name.clone(),
            sql_user: config.sql_user.clone(),
            sql_pass: config.sql_pass.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    local_extension: String,
    gis_file_stem: String,
}

impl ConnectionResolver {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            local_extension: config.local_db_extension.clone(),
            gis_file_stem: config.gis_file_stem.clone(),
        }
    }

    pub fn resolve(&self, config: &Configuration) -> AppResult<ConnectionDescriptor> {
        match config.connection_mode() {
            Some(ConnectionMode::Remote) => self.resolve_remote(&RemoteCredentials::from(config)),
            Some(ConnectionMode::LocalFile) => Ok(ConnectionDescriptor::LocalFile {
                path: self.primary_file(&config.posm_executable_path)?,
            }),
            None => Err(AppError::ConfigurationInvalid(format!(
                "unknown connectionType `{}`",
                config.connection_type
            ))),
        }
    }

    pub fn resolve_remote(&self, credentials: &RemoteCredentials) -> AppResult<ConnectionDescriptor> {
        let user = credentials.sql_user.trim();
        let password = credentials.sql_pass.as_str();
        let auth = match (user.is_empty(), password.is_empty()) {
            (true, true) => RemoteAuth::Trusted {
                os_user: operating_system_user(),
            },
            (false, false) => RemoteAuth::Credentials {
                user: user.to_string(),
                password: SecretString::new(password.to_string().into()),
            },
            _ => {
                return Err(AppError::ConfigurationInvalid(
                    "SQLUser and SQLPass must both be set or both be empty".into(),
                ))
            }
        };

        let instance = Some(credentials.sql_instance.trim())
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_REMOTE_HOST);
        let (host, port, named_instance) = parse_instance(instance)?;
        let database = Some(credentials.database_name.trim())
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_DATABASE)
            .to_string();

        Ok(ConnectionDescriptor::Remote(RemoteTarget {
            host,
            port,
            instance: named_instance,
            database,
            auth,
        }))
    }

    pub fn companion(&self, config: &Configuration) -> AppResult<ConnectionDescriptor> {
        let (directory, _) = split_file_name(executable_path(config)?);
        Ok(ConnectionDescriptor::LocalFile {
            path: PathBuf::from(format!(
                "{directory}{}.{}",
                self.gis_file_stem, self.local_extension
            )),
        })
    }

    pub async fn verify(
        &self,
        gateway: &QueryGateway,
        descriptor: Arc<ConnectionDescriptor>,
    ) -> AppResult<()> {
        let backend = descriptor.kind();
        match gateway.ping(Arc::clone(&descriptor)).await {
            Ok(()) => {
                info!(
                    target: "connection_resolver",
                    %backend,
                    descriptor = %descriptor,
                    "connection verified"
                );
                Ok(())
            }
            Err(source) => {
                warn!(
                    target: "connection_resolver",
                    %backend,
                    descriptor = %descriptor,
                    error = %source,
                    "connection attempt failed"
                );
                Err(AppError::ConnectionUnreachable { backend, source })
            }
        }
    }

    fn primary_file(&self, executable: &str) -> AppResult<PathBuf> {
        let executable = executable.trim();
        if executable.is_empty() {
            return Err(AppError::ConfigurationInvalid(
                "posmExecutablePath is required".into(),
            ));
        }
        let (directory, file) = split_file_name(executable);
        Ok(PathBuf::from(format!(
            "{directory}{}.{}",
            strip_extension(file),
            self.local_extension
        )))
    }
}

fn executable_path(config: &Configuration) -> AppResult<&str> {
    Some(config.posm_executable_path.trim())
        .filter(|path| !path.is_empty())
        .ok_or_else(|| AppError::ConfigurationInvalid("posmExecutablePath is required".into()))
}

fn operating_system_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|user| !user.is_empty())
}

fn split_file_name(path: &str) -> (&str, &str) {
    match path.rfind(['/', '\\']) {
        Some(index) => path.split_at(index + 1),
        None => ("", path),
    }
}

fn strip_extension(file: &str) -> &str {
    match file.rfind('.') {
        Some(index) if index > 0 => &file[..index],
        _ => file,
    }
}

fn parse_instance(value: &str) -> AppResult<(String, Option<u16>, Option<String>)> {
    let (address, instance) = match value.split_once('\\') {
        Some((address, instance)) => (address, Some(instance.to_string())),
        None => (value, None),
    };
    let (host, port) = match address.rsplit_once([',', ':']) {
        Some((host, port)) => {
            let port = port.trim().parse::<u16>().map_err(|_| {
                AppError::ConfigurationInvalid(format!("invalid port in SQLInstance `{value}`"))
            })?;
            (host, Some(port))
        }
        None => (address, None),
    };
    let host = Some(host.trim())
        .filter(|host| !host.is_empty() && *host != ".")
        .unwrap_or(DEFAULT_REMOTE_HOST);
    Ok((host.to_string(), port, instance.filter(|name| !name.is_empty())))
}
