//! Leaf AST types for sqlweave.
//!
//! Values, expressions, table references and the column-level items that
//! queries are assembled from. Every serializable node reports a
//! [`NodeKind`] tag so dialect extensions can intercept its rendering.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use super::query::SelectQuery;
use crate::error::{Error, Result};

/// Tag identifying a node kind for serialization dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    SelectQuery,
    InsertQuery,
    UpdateQuery,
    DeleteQuery,
    SelectColumn,
    OrderColumn,
    GroupColumn,
    ReturningBlock,
    TableName,
    Join,
    ConditionsBlock,
    ComparisonExpression,
    LogicalExpression,
    Raw,
    StringValue,
    DateValue,
    ExternalParameter,
    FieldName,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::SelectQuery => "select_query",
            NodeKind::InsertQuery => "insert_query",
            NodeKind::UpdateQuery => "update_query",
            NodeKind::DeleteQuery => "delete_query",
            NodeKind::SelectColumn => "select_column",
            NodeKind::OrderColumn => "order_column",
            NodeKind::GroupColumn => "group_column",
            NodeKind::ReturningBlock => "returning_block",
            NodeKind::TableName => "table_name",
            NodeKind::Join => "join",
            NodeKind::ConditionsBlock => "conditions_block",
            NodeKind::ComparisonExpression => "comparison_expression",
            NodeKind::LogicalExpression => "logical_expression",
            NodeKind::Raw => "raw",
            NodeKind::StringValue => "string_value",
            NodeKind::DateValue => "date_value",
            NodeKind::ExternalParameter => "external_parameter",
            NodeKind::FieldName => "field_name",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal value: used for inline SQL literals, bound parameters and result cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a JSON value for hydrated rows.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Text(s) => J::String(s.clone()),
            Value::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Value::Date(d) => J::String(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(ts) => J::String(ts.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Value::Json(j) => j.clone(),
            Value::Array(items) => J::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Convert from a JSON value (used for model files and key extraction).
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            J::String(s) => Value::Text(s.clone()),
            J::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            J::Object(_) => Value::Json(json.clone()),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => format!("[{} bytes]", b.len()),
            Value::Date(d) => d.to_string(),
            Value::Timestamp(ts) => ts.to_string(),
            Value::Json(j) => j.to_string(),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(Value::display).collect();
                format!("{{{}}}", items.join(", "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! int_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i64)
            }
        })*
    };
}

int_value!(i16, i32, i64, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A named placeholder bound at generation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    /// The bound value is expected to be a list.
    pub is_array: bool,
}

/// `Param(name)` leaf.
pub fn param(name: impl Into<String>) -> Param {
    Param {
        name: name.into(),
        is_array: false,
    }
}

impl Param {
    pub fn array(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            is_array: true,
        }
    }
}

/// Operand of a comparison, a select column, or an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference, possibly qualified (`T.code`) or a dotted entity path.
    Field(String),
    Value(Value),
    /// Raw SQL fragment, emitted as is.
    Raw(String),
    Param(Param),
    SubSelect(Box<SelectQuery>),
    List(Vec<Expression>),
}

/// Column reference expression.
pub fn field(name: impl Into<String>) -> Expression {
    Expression::Field(name.into())
}

/// Raw SQL fragment expression.
pub fn raw(sql: impl Into<String>) -> Expression {
    Expression::Raw(sql.into())
}

impl Expression {
    pub fn is_sub_select(&self) -> bool {
        matches!(self, Expression::SubSelect(_))
    }

    pub fn as_field(&self) -> Option<&str> {
        match self {
            Expression::Field(name) => Some(name),
            _ => None,
        }
    }
}

impl From<Param> for Expression {
    fn from(p: Param) -> Self {
        Expression::Param(p)
    }
}

impl From<SelectQuery> for Expression {
    fn from(q: SelectQuery) -> Self {
        Expression::SubSelect(Box::new(q))
    }
}

impl From<Value> for Expression {
    fn from(v: Value) -> Self {
        Expression::Value(v)
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

/// True for `name`, `T.name` and `schema.table.name` style references.
pub fn is_identifier_path(s: &str) -> bool {
    s.split('.').all(is_identifier)
}

/// Split a trailing `as alias` (or bare alias) from a reference.
fn split_alias(s: &str) -> Result<(&str, Option<&str>)> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    match tokens.as_slice() {
        [name] => Ok((name, None)),
        [name, alias] => Ok((name, Some(alias))),
        [name, kw, alias] if kw.eq_ignore_ascii_case("as") => Ok((name, Some(alias))),
        _ => Err(Error::invalid_argument(format!(
            "`{}` is not a valid reference",
            s
        ))),
    }
}

/// Table reference in a FROM clause, JOIN, or DML target.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// `schema.table alias`
    Table {
        schema: Option<String>,
        name: String,
        alias: Option<String>,
    },
    Raw(String),
    /// Derived table: `(select ...) alias`
    SubSelect {
        query: Box<SelectQuery>,
        alias: Option<String>,
    },
}

impl TableRef {
    /// Parse `"table"`, `"schema.table"`, `"table alias"` or `"table as alias"`.
    pub fn parse(s: &str) -> Result<Self> {
        let (name, alias) = split_alias(s.trim())?;
        if let Some(alias) = alias {
            if !is_identifier(alias) {
                return Err(Error::invalid_argument(format!(
                    "`{}` is not a valid table alias",
                    alias
                )));
            }
        }
        let parts: Vec<&str> = name.split('.').collect();
        let (schema, name) = match parts.as_slice() {
            [name] if is_identifier(name) => (None, *name),
            [schema, name] if is_identifier(schema) && is_identifier(name) => {
                (Some(schema.to_string()), *name)
            }
            _ => {
                return Err(Error::invalid_argument(format!(
                    "`{}` is not a valid table name",
                    name
                )))
            }
        };
        Ok(TableRef::Table {
            schema,
            name: name.to_string(),
            alias: alias.map(str::to_string),
        })
    }

    pub fn table(name: impl Into<String>, alias: Option<&str>) -> Self {
        TableRef::Table {
            schema: None,
            name: name.into(),
            alias: alias.map(str::to_string),
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            TableRef::Table { alias, .. } | TableRef::SubSelect { alias, .. } => alias.as_deref(),
            TableRef::Raw(_) => None,
        }
    }
}

impl TryFrom<&str> for TableRef {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        TableRef::parse(s)
    }
}

impl TryFrom<String> for TableRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        TableRef::parse(&s)
    }
}

impl TryFrom<SelectQuery> for TableRef {
    type Error = Error;

    fn try_from(q: SelectQuery) -> Result<Self> {
        Ok(TableRef::SubSelect {
            query: Box::new(q),
            alias: None,
        })
    }
}

impl TryFrom<Expression> for TableRef {
    type Error = Error;

    fn try_from(expr: Expression) -> Result<Self> {
        match expr {
            Expression::Raw(sql) => Ok(TableRef::Raw(sql)),
            Expression::Field(name) => TableRef::parse(&name),
            Expression::SubSelect(query) => Ok(TableRef::SubSelect { query, alias: None }),
            other => Err(Error::invalid_argument(format!(
                "{:?} cannot be used as a table",
                other
            ))),
        }
    }
}

/// A single item in the select list.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub expr: Expression,
    pub alias: Option<String>,
}

impl SelectColumn {
    /// Parse `"col"`, `"T.col as alias"`, `"*"`; anything else becomes a raw fragment.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some((expr, alias)) = split_as(s) {
            return SelectColumn {
                expr: column_expr(expr),
                alias: Some(alias.to_string()),
            };
        }
        SelectColumn {
            expr: column_expr(s),
            alias: None,
        }
    }
}

fn split_as(s: &str) -> Option<(&str, &str)> {
    let lower = s.to_ascii_lowercase();
    let idx = lower.rfind(" as ")?;
    let alias = s[idx + 4..].trim();
    if is_identifier(alias) {
        Some((s[..idx].trim(), alias))
    } else {
        None
    }
}

fn column_expr(s: &str) -> Expression {
    if s == "*" || s.ends_with(".*") || is_identifier_path(s) {
        Expression::Field(s.to_string())
    } else {
        Expression::Raw(s.to_string())
    }
}

impl From<&str> for SelectColumn {
    fn from(s: &str) -> Self {
        SelectColumn::parse(s)
    }
}

impl From<String> for SelectColumn {
    fn from(s: String) -> Self {
        SelectColumn::parse(&s)
    }
}

impl From<Expression> for SelectColumn {
    fn from(expr: Expression) -> Self {
        SelectColumn { expr, alias: None }
    }
}

impl From<SelectQuery> for SelectColumn {
    fn from(q: SelectQuery) -> Self {
        SelectColumn {
            expr: Expression::SubSelect(Box::new(q)),
            alias: None,
        }
    }
}

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderColumn {
    pub expr: Expression,
    pub descending: bool,
}

impl OrderColumn {
    /// Parse `"col"`, `"+col"`, `"-col"`, `"col desc"` or `"col asc"`.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let (s, mut descending) = match s.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (s.strip_prefix('+').unwrap_or(s), false),
        };
        let mut name = s;
        let lower = s.to_ascii_lowercase();
        if lower.ends_with(" desc") {
            descending = true;
            name = s[..s.len() - 5].trim_end();
        } else if lower.ends_with(" asc") {
            name = s[..s.len() - 4].trim_end();
        }
        OrderColumn {
            expr: column_expr(name),
            descending,
        }
    }
}

impl From<&str> for OrderColumn {
    fn from(s: &str) -> Self {
        OrderColumn::parse(s)
    }
}

impl From<String> for OrderColumn {
    fn from(s: String) -> Self {
        OrderColumn::parse(&s)
    }
}

/// RETURNING item, reported back in `GenerateResult::returning_fields`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReturningField {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ReturningField {
    pub fn parse(s: &str) -> Result<Self> {
        let (field, alias) = split_alias(s.trim())?;
        if !is_identifier_path(field) {
            return Err(Error::invalid_argument(format!(
                "`{}` is not a valid returning field",
                field
            )));
        }
        Ok(ReturningField {
            field: field.to_string(),
            alias: alias.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_tags() {
        assert_eq!(NodeKind::SelectQuery.as_str(), "select_query");
        assert_eq!(NodeKind::ExternalParameter.to_string(), "external_parameter");
    }

    #[test]
    fn test_table_ref_parse() {
        assert_eq!(
            TableRef::parse("public.countries c").unwrap(),
            TableRef::Table {
                schema: Some("public".into()),
                name: "countries".into(),
                alias: Some("c".into()),
            }
        );
        assert_eq!(
            TableRef::parse("countries as T").unwrap().alias(),
            Some("T")
        );
        assert_eq!(TableRef::parse("countries").unwrap().alias(), None);
    }

    #[test]
    fn test_table_ref_rejects_garbage() {
        assert!(matches!(
            TableRef::parse(""),
            Err(Error::InvalidArgument(_))
        ));
        assert!(TableRef::parse("a b c d").is_err());
        assert!(TableRef::parse("a.b.c").is_err());
        assert!(TableRef::parse("tbl 1x").is_err());
    }

    #[test]
    fn test_select_column_parse() {
        let col = SelectColumn::parse("T.code as T_CODE");
        assert_eq!(col.expr, Expression::Field("T.code".into()));
        assert_eq!(col.alias.as_deref(), Some("T_CODE"));

        let col = SelectColumn::parse("count(*)");
        assert_eq!(col.expr, Expression::Raw("count(*)".into()));
        assert!(col.alias.is_none());
    }

    #[test]
    fn test_order_column_parse() {
        assert!(OrderColumn::parse("-name").descending);
        assert!(!OrderColumn::parse("+name").descending);
        let col = OrderColumn::parse("T.name DESC");
        assert!(col.descending);
        assert_eq!(col.expr, Expression::Field("T.name".into()));
    }

    #[test]
    fn test_value_json_conversion() {
        let v = Value::from(vec![1, 2]);
        assert_eq!(v.to_json(), serde_json::json!([1, 2]));
        assert_eq!(Value::from_json(&serde_json::json!("AM")), Value::Text("AM".into()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_returning_field_parse() {
        let f = ReturningField::parse("id as key").unwrap();
        assert_eq!(f.field, "id");
        assert_eq!(f.alias.as_deref(), Some("key"));
        assert!(ReturningField::parse("1+1").is_err());
    }
}
