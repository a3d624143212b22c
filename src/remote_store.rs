use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::types::{ToSql, Type};
use postgres::{Client, Config, NoTls};
use secrecy::ExposeSecret;
use serde_json::{Number, Value};
use tracing::trace;

use crate::errors::DataSourceError;
use crate::gateway::{BatchFailure, ColumnInfo, DataConnection, Row, Statement};
use crate::resolver::{RemoteAuth, RemoteTarget};

pub struct RemoteConnection {
    client: Client,
}

impl RemoteConnection {
    pub fn open(target: &RemoteTarget) -> Result<Self, DataSourceError> {
        let mut config = Config::new();
        config.host(&target.host).dbname(&target.database);
        if let Some(port) = target.port {
            config.port(port);
        }
        if let Some(instance) = &target.instance {
            config.application_name(instance);
        }
        match &target.auth {
            RemoteAuth::Trusted { os_user } => {
                if let Some(user) = os_user {
                    config.user(user);
                }
            }
            RemoteAuth::Credentials { user, password } => {
                config.user(user).password(password.expose_secret());
            }
        }
        let client = config.connect(NoTls)?;
        Ok(Self { client })
    }
}

impl DataConnection for RemoteConnection {
    fn ping(&mut self) -> Result<(), DataSourceError> {
        self.client.batch_execute("SELECT 1")?;
        Ok(())
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, DataSourceError> {
        let params = bind_params(&statement.params);
        let refs = param_refs(&params);
        let rows = self.client.query(statement.sql.as_str(), &refs)?;
        rows.iter().map(decode_row).collect()
    }

    fn execute(&mut self, statement: &Statement) -> Result<u64, DataSourceError> {
        let params = bind_params(&statement.params);
        let refs = param_refs(&params);
        Ok(self.client.execute(statement.sql.as_str(), &refs)?)
    }

    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, DataSourceError> {
        let rows = self.client.query(
            "SELECT column_name::text, data_type::text, ordinal_position::bigint, \
             is_nullable::text FROM information_schema.columns WHERE table_name = $1 \
             ORDER BY ordinal_position",
            &[&table],
        )?;
        rows.iter()
            .map(|row| -> Result<ColumnInfo, DataSourceError> {
                Ok(ColumnInfo {
                    name: row.try_get(0)?,
                    type_name: row.try_get(1)?,
                    ordinal_position: row.try_get(2)?,
                    nullable: row.try_get::<_, String>(3)? == "YES",
                })
            })
            .collect()
    }

    fn execute_atomic(&mut self, statements: &[Statement]) -> Result<u64, BatchFailure> {
        let mut tx = self.client.transaction().map_err(|err| BatchFailure {
            index: 0,
            source: err.into(),
        })?;
        let mut affected = 0_u64;
        for (index, statement) in statements.iter().enumerate() {
            let params = bind_params(&statement.params);
            let refs = param_refs(&params);
            affected += tx
                .execute(statement.sql.as_str(), &refs)
                .map_err(|err| BatchFailure {
                    index,
                    source: err.into(),
                })?;
        }
        tx.commit().map_err(|err| BatchFailure {
            index: statements.len(),
            source: err.into(),
        })?;
        Ok(affected)
    }
}

type BoxedParam = Box<dyn ToSql + Sync>;

fn bind_params(values: &[Value]) -> Vec<BoxedParam> {
    values
        .iter()
        .map(|value| -> BoxedParam {
            match value {
                Value::Null => Box::new(Option::<String>::None),
                Value::Bool(flag) => Box::new(*flag),
                Value::Number(number) => match number.as_i64() {
                    Some(integer) => Box::new(integer),
                    None => Box::new(number.as_f64()),
                },
                Value::String(text) => Box::new(text.clone()),
                other => Box::new(other.clone()),
            }
        })
        .collect()
}

fn param_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|param| param.as_ref()).collect()
}

fn decode_row(row: &postgres::Row) -> Result<Row, DataSourceError> {
    let mut record = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, index, column.type_()).map_err(|err| {
            DataSourceError::Conversion {
                column: column.name().to_string(),
                detail: err.to_string(),
            }
        })?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_value(row: &postgres::Row, index: usize, ty: &Type) -> Result<Value, postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(index)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)?
            .map(|v| Value::Number(i64::from(v).into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)?
            .map(|v| Value::Number(i64::from(v).into())),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(index)?
            .map(|v| Value::Number(v.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)?
            .and_then(|v| Number::from_f64(f64::from(v)))
            .map(Value::Number),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(index)?
            .and_then(Number::from_f64)
            .map(Value::Number),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::CHAR => row
            .try_get::<_, Option<String>>(index)?
            .map(Value::String),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(index)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(index)?
            .map(|v| Value::String(v.to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)?
            .map(|v| Value::String(v.format("%Y-%m-%d %H:%M:%S").to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)?
            .map(|v| Value::String(v.to_rfc3339())),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(index)?,
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(index)?
            .map(|v| Value::String(STANDARD.encode(v))),
        _ => {
            trace!(target: "query_gateway", column_type = %ty, "unsupported column type rendered as null");
            None
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binds_json_scalars_to_native_params() {
        let params = bind_params(&[json!(null), json!(true), json!(7), json!(1.5), json!("MH-1")]);
        assert_eq!(params.len(), 5);
        assert_eq!(param_refs(&params).len(), 5);
    }
}
