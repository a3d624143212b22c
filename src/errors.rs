use std::io;

use thiserror::Error;

use crate::resolver::BackendKind;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration document unavailable: {0}")]
    ConfigurationMissing(String),
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
    #[error("{backend} connection unreachable: {source}")]
    ConnectionUnreachable {
        backend: BackendKind,
        #[source]
        source: DataSourceError,
    },
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error("no free loopback port in {first}..={last}")]
    PortBindExhausted { first: u16, last: u16 },
    #[error("failed to bind api listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to launch inspection viewer: {0}")]
    ExternalLaunch(#[source] io::Error),
    #[error("bulk replace aborted after {inserted} of {total} records: {source}")]
    PartialBulkFailure {
        inserted: usize,
        total: usize,
        #[source]
        source: DataSourceError,
    },
    #[error("bulk replace could not clear the target table: {0}")]
    BulkDeleteFailed(#[source] DataSourceError),
    #[error("bulk replace rolled back at record {failed_at}: {source}")]
    BulkReplaceRolledBack {
        failed_at: usize,
        #[source]
        source: DataSourceError,
    },
    #[error("column `{0}` is not present in the target table")]
    UnknownColumn(String),
    #[error("column `{0}` appears more than once in one record")]
    DuplicateColumn(String),
    #[error("bridge channel closed: {0}")]
    Bridge(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::UnknownColumn(_) | AppError::DuplicateColumn(_))
    }
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Postgres(#[from] postgres::Error),
    #[error("unsupported value for column `{column}`: {detail}")]
    Conversion { column: String, detail: String },
    #[error("database worker failed: {0}")]
    Worker(String),
}
