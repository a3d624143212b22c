use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::gateway::{DataConnection, QueryGateway, Statement};
use crate::queries::{self, Dialect};
use crate::records::BulkRecord;
use crate::resolver::ConnectionDescriptor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Delete commits first; inserts run one by one and stop at the first failure.
    #[default]
    Sequential,
    /// Delete and inserts commit together or not at all.
    Transactional,
}

impl ReplaceStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "transactional" => Some(ReplaceStrategy::Transactional),
            "sequential" => Some(ReplaceStrategy::Sequential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkSyncReport {
    pub deleted: u64,
    pub inserted: usize,
}

#[derive(Debug, Clone)]
pub struct BulkSyncJob {
    table: String,
    strategy: ReplaceStrategy,
}

impl BulkSyncJob {
    pub fn new(table: impl Into<String>, strategy: ReplaceStrategy) -> Self {
        Self {
            table: table.into(),
            strategy,
        }
    }

    pub fn strategy(&self) -> ReplaceStrategy {
        self.strategy
    }

    pub async fn run(
        &self,
        gateway: &QueryGateway,
        descriptor: Arc<ConnectionDescriptor>,
        records: Vec<BulkRecord>,
    ) -> AppResult<BulkSyncReport> {
        let job = self.clone();
        let dialect = descriptor.dialect();
        gateway
            .with_connection(descriptor, move |connection| {
                job.replace(connection, dialect, records)
            })
            .await
    }

    fn replace(
        &self,
        connection: &mut dyn DataConnection,
        dialect: Dialect,
        records: Vec<BulkRecord>,
    ) -> AppResult<BulkSyncReport> {
        // Keyed by lowercase name; record keys match columns regardless of case.
        let allowed = connection
            .columns(&self.table)?
            .into_iter()
            .map(|column| (column.name.to_lowercase(), column.name))
            .collect::<HashMap<_, _>>();
        let inserts = records
            .iter()
            .map(|record| self.insert_for(dialect, record, &allowed))
            .collect::<AppResult<Vec<_>>>()?;
        let total = inserts.len();
        let delete = queries::delete_all(&self.table);

        match self.strategy {
            ReplaceStrategy::Transactional => {
                let mut batch = Vec::with_capacity(total + 1);
                batch.push(delete);
                batch.extend(inserts);
                let affected = connection.execute_atomic(&batch).map_err(|failure| {
                    warn!(
                        target: "bulk_sync",
                        table = %self.table,
                        statement = failure.index,
                        error = %failure.source,
                        "bulk replace rolled back"
                    );
                    // Statement 0 is the delete; record N is statement N + 1.
                    match failure.index.checked_sub(1) {
                        None => AppError::BulkDeleteFailed(failure.source),
                        Some(failed_at) => AppError::BulkReplaceRolledBack {
                            failed_at,
                            source: failure.source,
                        },
                    }
                })?;
                // Each insert touches exactly one row; the remainder came from the delete.
                let deleted = affected.saturating_sub(total as u64);
                info!(target: "bulk_sync", table = %self.table, deleted, inserted = total, "bulk replace committed");
                Ok(BulkSyncReport {
                    deleted,
                    inserted: total,
                })
            }
            ReplaceStrategy::Sequential => {
                let deleted = connection.execute(&delete).map_err(|source| {
                    warn!(target: "bulk_sync", table = %self.table, error = %source, "bulk replace could not clear table");
                    AppError::BulkDeleteFailed(source)
                })?;
                for (index, statement) in inserts.iter().enumerate() {
                    if let Err(source) = connection.execute(statement) {
                        warn!(
                            target: "bulk_sync",
                            table = %self.table,
                            inserted = index,
                            total,
                            error = %source,
                            "bulk replace aborted; previous rows already deleted"
                        );
                        return Err(AppError::PartialBulkFailure {
                            inserted: index,
                            total,
                            source,
                        });
                    }
                }
                info!(target: "bulk_sync", table = %self.table, deleted, inserted = total, "bulk replace finished");
                Ok(BulkSyncReport {
                    deleted,
                    inserted: total,
                })
            }
        }
    }

    fn insert_for(
        &self,
        dialect: Dialect,
        record: &BulkRecord,
        allowed: &HashMap<String, String>,
    ) -> AppResult<Statement> {
        let mut columns: Vec<&str> = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (key, value) in record {
            let column = allowed
                .get(&key.to_lowercase())
                .ok_or_else(|| AppError::UnknownColumn(key.clone()))?;
            if columns.contains(&column.as_str()) {
                return Err(AppError::DuplicateColumn(column.clone()));
            }
            columns.push(column.as_str());
            values.push(value.clone());
        }
        Ok(queries::insert_row(dialect, &self.table, &columns, values))
    }
}
