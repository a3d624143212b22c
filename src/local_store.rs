use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde_json::{Number, Value};

use crate::errors::DataSourceError;
use crate::gateway::{BatchFailure, ColumnInfo, DataConnection, Row, Statement};

pub struct LocalConnection {
    connection: Connection,
}

impl LocalConnection {
    pub fn open(path: &Path) -> Result<Self, DataSourceError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(path, flags)?;
        Ok(Self { connection })
    }
}

impl DataConnection for LocalConnection {
    fn ping(&mut self) -> Result<(), DataSourceError> {
        // Reading the schema version fails fast on a file that is not a database.
        self.connection
            .query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, DataSourceError> {
        let mut stmt = self.connection.prepare(&statement.sql)?;
        let names = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut rows = stmt.query(params_from_iter(statement.params.iter().map(to_sql_value)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (index, name) in names.iter().enumerate() {
                record.insert(name.clone(), from_value_ref(row.get_ref(index)?));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn execute(&mut self, statement: &Statement) -> Result<u64, DataSourceError> {
        let affected = self.connection.execute(
            &statement.sql,
            params_from_iter(statement.params.iter().map(to_sql_value)),
        )?;
        Ok(affected as u64)
    }

    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, DataSourceError> {
        let mut stmt = self.connection.prepare(
            "SELECT name, type, cid, \"notnull\" FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    type_name: row.get(1)?,
                    ordinal_position: row.get::<_, i64>(2)? + 1,
                    nullable: row.get::<_, i64>(3)? == 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn execute_atomic(&mut self, statements: &[Statement]) -> Result<u64, BatchFailure> {
        let tx = self.connection.transaction().map_err(|err| BatchFailure {
            index: 0,
            source: err.into(),
        })?;
        let mut affected = 0_u64;
        for (index, statement) in statements.iter().enumerate() {
            affected += tx
                .execute(
                    &statement.sql,
                    params_from_iter(statement.params.iter().map(to_sql_value)),
                )
                .map_err(|err| BatchFailure {
                    index,
                    source: err.into(),
                })? as u64;
        }
        tx.commit().map_err(|err| BatchFailure {
            index: statements.len(),
            source: err.into(),
        })?;
        Ok(affected)
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => number
                .as_f64()
                .map(SqlValue::Real)
                .unwrap_or(SqlValue::Null),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(integer) => Value::Number(integer.into()),
        ValueRef::Real(real) => Number::from_f64(real)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}
