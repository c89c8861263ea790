/// PostgreSQL adapter over a deadpool-postgres pool.
///
/// Statements are prepared first; the parameter types PostgreSQL reports
/// decide how each [`Value`] is bound, and the result column types decide
/// how cells are read back.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio::sync::RwLock;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::debug;

use super::adapter::{
    savepoint_name, Adapter, BufferedCursor, Connection, FieldInfo, QueryRequest, Response,
};
use crate::ast::context::QueryParams;
use crate::ast::types::{is_identifier_path, Value};
use crate::config::ConnectionConfig;
use crate::error::{Error, ErrorCategory, Result};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

pub struct PostgresAdapter {
    pool: Pool,
    dialect_version: Option<String>,
    schema: Option<String>,
    timeout: Duration,
}

impl PostgresAdapter {
    /// Build the pool. No connection is opened until the first `connect`.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.database.clone());
        cfg.user = Some(config.username.clone());
        cfg.password = Some(config.password.clone());
        cfg.connect_timeout = Some(timeout);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.pool_size.max(1)));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Config(e.to_string()))?;
        if let Some(schema) = &config.schema {
            if !is_identifier_path(schema) || schema.contains('.') {
                return Err(Error::Config(format!("`{}` is not a valid schema name", schema)));
            }
        }
        Ok(Self {
            pool,
            dialect_version: None,
            schema: config.schema.clone(),
            timeout,
        })
    }

    /// Server major version used for dialect decisions.
    pub fn with_dialect_version(mut self, version: impl Into<String>) -> Self {
        self.dialect_version = Some(version.into());
        self
    }
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn driver(&self) -> &str {
        "postgres"
    }

    fn dialect(&self) -> &str {
        "postgres"
    }

    fn dialect_version(&self) -> Option<&str> {
        self.dialect_version.as_deref()
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let client = tokio::time::timeout(self.timeout, self.pool.get())
            .await
            .map_err(|_| {
                Error::database(
                    ErrorCategory::Connection,
                    format!("connection timed out after {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| Error::database(ErrorCategory::Connection, e.to_string()))?;
        if let Some(schema) = &self.schema {
            client
                .batch_execute(&format!("set search_path to {}", schema))
                .await
                .map_err(|e| from_pg_error(&e, ""))?;
        }
        debug!("acquired pooled connection");
        Ok(Box::new(PostgresConnection {
            client: RwLock::new(Some(client)),
            in_transaction: AtomicBool::new(false),
        }))
    }
}

/// One pooled client. Closing returns it to the pool.
pub struct PostgresConnection {
    client: RwLock<Option<Object>>,
    in_transaction: AtomicBool,
}

fn closed() -> Error {
    Error::database(ErrorCategory::Connection, "connection is closed")
}

impl PostgresConnection {
    async fn batch(&self, sql: &str) -> Result<()> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| from_pg_error(&e, sql))
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&self, request: QueryRequest) -> Result<Response> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        let values = positional_values(&request.params)?;
        let statement = client
            .prepare(&request.sql)
            .await
            .map_err(|e| from_pg_error(&e, &request.sql))?;
        if statement.params().len() != values.len() {
            return Err(Error::invalid_argument(format!(
                "statement expects {} parameters, {} given",
                statement.params().len(),
                values.len()
            )));
        }
        let bound = values
            .iter()
            .zip(statement.params())
            .map(|(value, ty)| bind(value, ty))
            .collect::<Result<Vec<_>>>()?;
        let params: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        if statement.columns().is_empty() {
            let n = client
                .execute(&statement, &params)
                .await
                .map_err(|e| from_pg_error(&e, &request.sql))?;
            return Ok(Response::affected(n));
        }

        let rows = client
            .query(&statement, &params)
            .await
            .map_err(|e| from_pg_error(&e, &request.sql))?;
        let fields: Vec<FieldInfo> = statement
            .columns()
            .iter()
            .map(|c| FieldInfo::new(c.name(), c.type_().name()))
            .collect();
        let rows = parse_rows(&rows);
        let count = rows.len() as u64;
        if request.cursor {
            return Ok(Response {
                fields: fields.clone(),
                rows_affected: Some(count),
                cursor: Some(Box::new(BufferedCursor::new(fields, rows))),
                ..Response::default()
            });
        }
        let mut response = Response::with_rows(fields, rows);
        response.rows_affected = Some(count);
        Ok(response)
    }

    async fn close(&self) -> Result<()> {
        if self.in_transaction() {
            self.rollback().await?;
        }
        self.client.write().await.take();
        Ok(())
    }

    async fn start_transaction(&self) -> Result<()> {
        if self.in_transaction.load(Ordering::SeqCst) {
            return Err(Error::database(
                ErrorCategory::Transaction,
                "a transaction is already open",
            ));
        }
        self.batch("begin").await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.batch("commit").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.batch("rollback").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn savepoint(&self, name: &str) -> Result<()> {
        self.batch(&format!("savepoint {}", savepoint_name(name)?)).await
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        self.batch(&format!("release savepoint {}", savepoint_name(name)?))
            .await
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.batch(&format!("rollback to savepoint {}", savepoint_name(name)?))
            .await
    }
}

fn positional_values(params: &QueryParams) -> Result<Vec<&Value>> {
    match params {
        QueryParams::Positional(values) => Ok(values.iter().collect()),
        QueryParams::Named(map) if map.is_empty() => Ok(Vec::new()),
        QueryParams::Named(_) => Err(Error::invalid_argument(
            "postgres binds positional parameters only; use the dollar param style",
        )),
    }
}

fn mismatch(value: &Value, ty: &Type) -> Error {
    Error::invalid_argument(format!("can not bind {:?} as {}", value, ty.name()))
}

fn as_int(value: &Value, ty: &Type) -> Result<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Int(i) => Ok(Some(*i)),
        Value::Bool(b) => Ok(Some(*b as i64)),
        Value::Text(s) => s.trim().parse().map(Some).map_err(|_| mismatch(value, ty)),
        _ => Err(mismatch(value, ty)),
    }
}

fn as_float(value: &Value, ty: &Type) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Float(f) => Ok(Some(*f)),
        Value::Int(i) => Ok(Some(*i as f64)),
        Value::Text(s) => s.trim().parse().map(Some).map_err(|_| mismatch(value, ty)),
        _ => Err(mismatch(value, ty)),
    }
}

fn as_small<T: TryFrom<i64>>(value: &Value, ty: &Type) -> Result<Option<T>> {
    as_int(value, ty)?
        .map(|i| T::try_from(i).map_err(|_| mismatch(value, ty)))
        .transpose()
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.display()),
    }
}

fn as_timestamp(value: &Value, ty: &Type) -> Result<Option<NaiveDateTime>> {
    match value {
        Value::Null => Ok(None),
        Value::Timestamp(ts) => Ok(Some(*ts)),
        Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0)),
        Value::Text(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
            .map(Some)
            .map_err(|_| mismatch(value, ty)),
        _ => Err(mismatch(value, ty)),
    }
}

fn array_items(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

/// Bind every element of an array value with `f`.
fn bind_array<T, F>(value: &Value, ty: &Type, f: F) -> Result<BoxedParam>
where
    T: ToSql + Sync + Send + 'static,
    F: Fn(&Value) -> Result<Option<T>>,
{
    if value.is_null() {
        return Ok(Box::new(None::<Vec<Option<T>>>));
    }
    let items = array_items(value).ok_or_else(|| mismatch(value, ty))?;
    let items = items.iter().map(f).collect::<Result<Vec<_>>>()?;
    Ok(Box::new(Some(items)))
}

/// Convert a value to the Rust type PostgreSQL expects for `ty`.
fn bind(value: &Value, ty: &Type) -> Result<BoxedParam> {
    let param: BoxedParam = match *ty {
        Type::BOOL => Box::new(match value {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => return Err(mismatch(value, ty)),
        }),
        Type::INT2 => Box::new(as_small::<i16>(value, ty)?),
        Type::INT4 => Box::new(as_small::<i32>(value, ty)?),
        Type::INT8 => Box::new(as_int(value, ty)?),
        Type::FLOAT4 => Box::new(as_float(value, ty)?.map(|f| f as f32)),
        Type::FLOAT8 => Box::new(as_float(value, ty)?),
        Type::BYTEA => Box::new(match value {
            Value::Null => None,
            Value::Bytes(b) => Some(b.clone()),
            _ => return Err(mismatch(value, ty)),
        }),
        Type::DATE => Box::new(match value {
            Value::Null => None,
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            Value::Text(s) => Some(
                NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| mismatch(value, ty))?,
            ),
            _ => return Err(mismatch(value, ty)),
        }),
        Type::TIMESTAMP => Box::new(as_timestamp(value, ty)?),
        Type::TIMESTAMPTZ => Box::new(as_timestamp(value, ty)?.map(|ts| ts.and_utc())),
        Type::JSON | Type::JSONB => Box::new(match value {
            Value::Null => None,
            other => Some(other.to_json()),
        }),
        Type::BOOL_ARRAY => bind_array(value, ty, |v| match v {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            _ => Err(mismatch(v, ty)),
        })?,
        Type::INT2_ARRAY => bind_array(value, ty, |v| as_small::<i16>(v, ty))?,
        Type::INT4_ARRAY => bind_array(value, ty, |v| as_small::<i32>(v, ty))?,
        Type::INT8_ARRAY => bind_array(value, ty, |v| as_int(v, ty))?,
        Type::FLOAT8_ARRAY => bind_array(value, ty, |v| as_float(v, ty))?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            bind_array(value, ty, |v| Ok(as_text(v)))?
        }
        // text and everything PostgreSQL can cast from it
        _ => Box::new(as_text(value)),
    };
    Ok(param)
}

fn parse_rows(rows: &[Row]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| extract_value(row, i, col.type_()))
                .collect()
        })
        .collect()
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn array<'a, T, F>(row: &'a Row, idx: usize, f: F) -> Value
where
    T: tokio_postgres::types::FromSql<'a>,
    F: Fn(T) -> Value,
{
    get::<Vec<Option<T>>>(row, idx)
        .map(|items| {
            Value::Array(
                items
                    .into_iter()
                    .map(|item| item.map(&f).unwrap_or_default())
                    .collect(),
            )
        })
        .unwrap_or_default()
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> Value {
    match *pg_type {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool).unwrap_or_default(),
        Type::INT2 => get::<i16>(row, idx)
            .map(|v| Value::Int(v.into()))
            .unwrap_or_default(),
        Type::INT4 => get::<i32>(row, idx)
            .map(|v| Value::Int(v.into()))
            .unwrap_or_default(),
        Type::INT8 => get::<i64>(row, idx).map(Value::Int).unwrap_or_default(),
        Type::FLOAT4 => get::<f32>(row, idx)
            .map(|v| Value::Float(v.into()))
            .unwrap_or_default(),
        Type::FLOAT8 => get::<f64>(row, idx).map(Value::Float).unwrap_or_default(),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::CHAR | Type::BPCHAR => {
            get::<String>(row, idx).map(Value::Text).unwrap_or_default()
        }
        Type::BYTEA => get::<Vec<u8>>(row, idx).map(Value::Bytes).unwrap_or_default(),
        Type::DATE => get::<NaiveDate>(row, idx).map(Value::Date).unwrap_or_default(),
        Type::TIME => get::<NaiveTime>(row, idx)
            .map(|t| Value::Text(t.to_string()))
            .unwrap_or_default(),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)
            .map(Value::Timestamp)
            .unwrap_or_default(),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)
            .map(|ts| Value::Timestamp(ts.naive_utc()))
            .unwrap_or_default(),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)
            .map(Value::Json)
            .unwrap_or_default(),
        Type::BOOL_ARRAY => array::<bool, _>(row, idx, Value::Bool),
        Type::INT4_ARRAY => array::<i32, _>(row, idx, |v| Value::Int(v.into())),
        Type::INT8_ARRAY => array::<i64, _>(row, idx, Value::Int),
        Type::FLOAT8_ARRAY => array::<f64, _>(row, idx, Value::Float),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => array::<String, _>(row, idx, Value::Text),
        _ => get::<String>(row, idx).map(Value::Text).unwrap_or_default(),
    }
}

/// 1-based line and column of a 1-based byte position in `query`.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (usize, usize) {
    if byte_pos == 0 || query.is_empty() {
        return (1, 1);
    }
    let target = (byte_pos - 1).min(query.len());
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Map a driver error to [`Error::Database`], categorised by SQLSTATE.
fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Error {
    let Some(db_err) = err.as_db_error() else {
        let category = if err.is_closed() {
            ErrorCategory::Connection
        } else {
            ErrorCategory::Unknown
        };
        return Error::database(category, err.to_string());
    };
    let code = db_err.code().code().to_string();
    let mut message = db_err.message().to_string();
    if let Some(tokio_postgres::error::ErrorPosition::Original(pos)) = db_err.position() {
        let (line, col) = byte_offset_to_line_col(query, *pos as usize);
        message.push_str(&format!(" (line {}, column {})", line, col));
    }
    if let Some(detail) = db_err.detail() {
        message.push_str(&format!("\nDETAIL: {}", detail));
    }
    if let Some(hint) = db_err.hint() {
        message.push_str(&format!("\nHINT: {}", hint));
    }
    Error::Database {
        category: ErrorCategory::from_sqlstate(&code),
        message,
        code: Some(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_byte_offset_to_line_col() {
        let query = "select *\nfrom users\nwhere id = 1";
        assert_eq!(byte_offset_to_line_col(query, 1), (1, 1));
        assert_eq!(byte_offset_to_line_col(query, 10), (2, 1));
        assert_eq!(byte_offset_to_line_col(query, 21), (3, 1));
        assert_eq!(byte_offset_to_line_col("", 4), (1, 1));
    }

    #[test]
    fn test_positional_values() {
        let params = QueryParams::Positional(vec![Value::Int(1), Value::Null]);
        assert_eq!(positional_values(&params).unwrap().len(), 2);
        assert!(positional_values(&QueryParams::Named(BTreeMap::new()))
            .unwrap()
            .is_empty());
        let mut named = BTreeMap::new();
        named.insert("id".to_string(), Value::Int(1));
        assert!(positional_values(&QueryParams::Named(named)).is_err());
    }

    #[test]
    fn test_bind_conversions() {
        assert!(bind(&Value::Int(1), &Type::INT4).is_ok());
        assert!(bind(&Value::Null, &Type::INT4).is_ok());
        assert!(bind(&Value::Int(i64::MAX), &Type::INT4).is_err());
        assert!(bind(&Value::from("12"), &Type::INT8).is_ok());
        assert!(bind(&Value::from("x"), &Type::INT8).is_err());
        assert!(bind(&Value::from("2024-02-29"), &Type::DATE).is_ok());
        assert!(bind(&Value::from(vec![1, 2]), &Type::INT4_ARRAY).is_ok());
        assert!(bind(&Value::from(vec!["a", "b"]), &Type::TEXT_ARRAY).is_ok());
        assert!(bind(&Value::Int(1), &Type::TEXT_ARRAY).is_err());
        assert!(bind(&Value::Bytes(vec![1]), &Type::BOOL).is_err());
    }

    #[test]
    fn test_text_conversions() {
        assert_eq!(as_text(&Value::Int(5)), Some("5".to_string()));
        assert_eq!(as_text(&Value::Null), None);
        let ts = as_timestamp(&Value::from("2024-01-02 03:04:05"), &Type::TIMESTAMP).unwrap();
        assert_eq!(ts.map(|t| t.to_string()), Some("2024-01-02 03:04:05".to_string()));
    }

    #[tokio::test]
    async fn test_adapter_rejects_bad_schema() {
        let config = ConnectionConfig {
            schema: Some("public; drop table x".into()),
            ..ConnectionConfig::default()
        };
        assert!(matches!(PostgresAdapter::new(&config), Err(Error::Config(_))));

        let adapter = PostgresAdapter::new(&ConnectionConfig::default())
            .unwrap()
            .with_dialect_version("16");
        assert_eq!(adapter.dialect(), "postgres");
        assert_eq!(adapter.dialect_version(), Some("16"));
    }
}
