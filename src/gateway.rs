use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::DataSourceError;
use crate::resolver::ConnectionDescriptor;
use crate::{local_store, remote_store};

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn literal(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bound(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    #[serde(rename = "COLUMN_NAME")]
    pub name: String,
    #[serde(rename = "TYPE_NAME")]
    pub type_name: String,
    #[serde(rename = "ORDINAL_POSITION")]
    pub ordinal_position: i64,
    #[serde(rename = "NULLABLE")]
    pub nullable: bool,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub source: DataSourceError,
}

pub trait DataConnection {
    fn ping(&mut self) -> Result<(), DataSourceError>;
    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, DataSourceError>;
    fn execute(&mut self, statement: &Statement) -> Result<u64, DataSourceError>;
    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, DataSourceError>;
    fn execute_atomic(&mut self, statements: &[Statement]) -> Result<u64, BatchFailure>;
}

pub trait Connector: Send + Sync {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DataConnection>, DataSourceError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnector;

impl Connector for DriverConnector {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DataConnection>, DataSourceError> {
        match descriptor {
            ConnectionDescriptor::LocalFile { path } => {
                Ok(Box::new(local_store::LocalConnection::open(path)?))
            }
            ConnectionDescriptor::Remote(target) => {
                Ok(Box::new(remote_store::RemoteConnection::open(target)?))
            }
        }
    }
}

/// Every call opens, uses and drops its own connection on the blocking pool.
#[derive(Clone)]
pub struct QueryGateway {
    connector: Arc<dyn Connector>,
}

impl QueryGateway {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub async fn with_connection<T, E, F>(
        &self,
        descriptor: Arc<ConnectionDescriptor>,
        work: F,
    ) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<DataSourceError> + Send + 'static,
        F: FnOnce(&mut dyn DataConnection) -> Result<T, E> + Send + 'static,
    {
        let connector = Arc::clone(&self.connector);
        tokio::task::spawn_blocking(move || {
            let mut connection = connector.open(&descriptor)?;
            let outcome = work(connection.as_mut());
            drop(connection);
            debug!(target: "query_gateway", backend = %descriptor.kind(), "connection released");
            outcome
        })
        .await
        .map_err(|err| E::from(DataSourceError::Worker(err.to_string())))?
    }

    pub async fn ping(&self, descriptor: Arc<ConnectionDescriptor>) -> Result<(), DataSourceError> {
        self.with_connection(descriptor, |connection| connection.ping())
            .await
    }

    pub async fn query(
        &self,
        descriptor: Arc<ConnectionDescriptor>,
        statement: Statement,
    ) -> Result<Vec<Row>, DataSourceError> {
        self.with_connection(descriptor, move |connection| connection.query(&statement))
            .await
    }

    pub async fn columns(
        &self,
        descriptor: Arc<ConnectionDescriptor>,
        table: String,
    ) -> Result<Vec<ColumnInfo>, DataSourceError> {
        self.with_connection(descriptor, move |connection| connection.columns(&table))
            .await
    }
}

impl Default for QueryGateway {
    fn default() -> Self {
        Self::new(Arc::new(DriverConnector))
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
