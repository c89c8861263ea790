/// Adapter contract between generated statements and a database driver.
///
/// Drivers implement [`Adapter`] and [`Connection`]. The query layer only
/// produces [`QueryRequest`] values and reads [`Response`] values back.
use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use heck::{ToLowerCamelCase, ToUpperCamelCase};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::ast::context::{GenerateResult, QueryParams};
use crate::ast::types::{is_identifier_path, ReturningField, Value};
use crate::error::{Error, Result};

/// How result field names are presented to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldNaming {
    #[default]
    Original,
    Lowercase,
    Uppercase,
    CamelCase,
    PascalCase,
}

impl FieldNaming {
    pub fn apply(&self, name: &str) -> String {
        match self {
            FieldNaming::Original => name.to_string(),
            FieldNaming::Lowercase => name.to_lowercase(),
            FieldNaming::Uppercase => name.to_uppercase(),
            FieldNaming::CamelCase => name.to_lower_camel_case(),
            FieldNaming::PascalCase => name.to_upper_camel_case(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    /// Driver type name, e.g. `int4`.
    pub type_name: String,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A statement plus execution flags.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub params: QueryParams,
    pub returning_fields: Vec<ReturningField>,
    /// Return a [`Cursor`] instead of buffered rows.
    pub cursor: bool,
    /// Present rows as objects keyed by field name.
    pub object_rows: bool,
    /// Batch size for cursor fetches.
    pub fetch_rows: Option<usize>,
    pub naming: FieldNaming,
    /// Drop null properties from object rows.
    pub ignore_nulls: bool,
    /// Commit after execution when no transaction is open.
    pub auto_commit: bool,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: QueryParams::default(),
            returning_fields: Vec::new(),
            cursor: false,
            object_rows: false,
            fetch_rows: None,
            naming: FieldNaming::default(),
            ignore_nulls: false,
            auto_commit: true,
        }
    }

    pub fn params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn cursor(mut self, fetch_rows: Option<usize>) -> Self {
        self.cursor = true;
        self.fetch_rows = fetch_rows;
        self
    }

    pub fn object_rows(mut self, object_rows: bool) -> Self {
        self.object_rows = object_rows;
        self
    }

    pub fn naming(mut self, naming: FieldNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn ignore_nulls(mut self, ignore_nulls: bool) -> Self {
        self.ignore_nulls = ignore_nulls;
        self
    }
}

impl From<GenerateResult> for QueryRequest {
    fn from(result: GenerateResult) -> Self {
        let mut request = QueryRequest::new(result.sql).params(result.params);
        request.returning_fields = result.returning_fields.unwrap_or_default();
        request
    }
}

/// Result rows: positional arrays, or objects when the request asked for them.
#[derive(Debug, Clone, PartialEq)]
pub enum Rows {
    Arrays(Vec<Vec<Value>>),
    Objects(Vec<Json>),
}

impl Default for Rows {
    fn default() -> Self {
        Rows::Arrays(Vec::new())
    }
}

impl Rows {
    pub fn len(&self) -> usize {
        match self {
            Rows::Arrays(rows) => rows.len(),
            Rows::Objects(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct Response {
    pub fields: Vec<FieldInfo>,
    pub rows: Rows,
    pub rows_affected: Option<u64>,
    pub cursor: Option<Box<dyn Cursor>>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("fields", &self.fields)
            .field("rows", &self.rows.len())
            .field("rows_affected", &self.rows_affected)
            .field("cursor", &self.cursor.is_some())
            .finish()
    }
}

impl Response {
    pub fn with_rows(fields: Vec<FieldInfo>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            fields,
            rows: Rows::Arrays(rows),
            rows_affected: None,
            cursor: None,
        }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected: Some(rows_affected),
            ..Self::default()
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Positional rows; fails for object rows.
    pub fn arrays(&self) -> Result<&[Vec<Value>]> {
        match &self.rows {
            Rows::Arrays(rows) => Ok(rows),
            Rows::Objects(_) => Err(Error::invalid_argument("response holds object rows")),
        }
    }

    /// Rename every field with `naming`.
    pub fn rename_fields(&mut self, naming: FieldNaming) {
        if naming == FieldNaming::Original {
            return;
        }
        for field in &mut self.fields {
            field.name = naming.apply(&field.name);
        }
    }

    /// Turn array rows into objects keyed by field name.
    pub fn into_object_rows(mut self, ignore_nulls: bool) -> Self {
        if let Rows::Arrays(rows) = std::mem::take(&mut self.rows) {
            let objects = rows
                .into_iter()
                .map(|row| {
                    let mut object = Map::new();
                    for (field, value) in self.fields.iter().zip(row) {
                        if ignore_nulls && value.is_null() {
                            continue;
                        }
                        object.insert(field.name.clone(), value.to_json());
                    }
                    Json::Object(object)
                })
                .collect();
            self.rows = Rows::Objects(objects);
        }
        self
    }
}

/// Streaming access to a result set.
#[async_trait]
pub trait Cursor: Send {
    fn fields(&self) -> &[FieldInfo];

    /// Next batch of at most `n` rows; `None` once exhausted or closed.
    async fn fetch(&mut self, n: usize) -> Result<Option<Vec<Vec<Value>>>>;

    async fn close(&mut self) -> Result<()>;
}

/// Cursor over rows already held in memory.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    fields: Vec<FieldInfo>,
    rows: VecDeque<Vec<Value>>,
    closed: bool,
}

impl BufferedCursor {
    pub fn new(fields: Vec<FieldInfo>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            fields,
            rows: rows.into(),
            closed: false,
        }
    }
}

#[async_trait]
impl Cursor for BufferedCursor {
    fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    async fn fetch(&mut self, n: usize) -> Result<Option<Vec<Vec<Value>>>> {
        if self.closed || self.rows.is_empty() {
            return Ok(None);
        }
        let take = n.max(1).min(self.rows.len());
        Ok(Some(self.rows.drain(..take).collect()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}

pub(crate) fn savepoint_name(name: &str) -> Result<&str> {
    if !is_identifier_path(name) || name.contains('.') {
        return Err(Error::invalid_argument(format!(
            "`{}` is not a valid savepoint name",
            name
        )));
    }
    Ok(name)
}

/// One physical (or pooled) database session.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn execute(&self, request: QueryRequest) -> Result<Response>;

    async fn close(&self) -> Result<()>;

    async fn start_transaction(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    async fn savepoint(&self, name: &str) -> Result<()> {
        let name = savepoint_name(name)?;
        self.execute(QueryRequest::new(format!("savepoint {}", name))).await?;
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        let name = savepoint_name(name)?;
        self.execute(QueryRequest::new(format!("release savepoint {}", name)))
            .await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        let name = savepoint_name(name)?;
        self.execute(QueryRequest::new(format!("rollback to savepoint {}", name)))
            .await?;
        Ok(())
    }
}

/// A database driver.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Driver name, e.g. `postgres`.
    fn driver(&self) -> &str;

    /// SQL dialect the generated statements target.
    fn dialect(&self) -> &str;

    fn dialect_version(&self) -> Option<&str> {
        None
    }

    async fn connect(&self) -> Result<Box<dyn Connection>>;
}
