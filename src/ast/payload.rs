/// Pre-rendered node parts handed to serialization hooks.
///
/// Every node serializes its children first and packs the resulting text
/// into a payload. Dialect extensions may rewrite the payload before
/// calling the default renderer, or replace the rendering entirely.
use chrono::NaiveDateTime;

use super::operators::{LogicalKind, OperatorKind};
use super::query::JoinKind;
use super::types::ReturningField;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Select(SelectParts),
    Insert(InsertParts),
    Update(UpdateParts),
    Delete(DeleteParts),
    Join(JoinParts),
    Comparison(ComparisonParts),
    Logical(LogicalParts),
    Column(ColumnParts),
    Order(OrderParts),
    Table(TableParts),
    Returning(Vec<ReturningField>),
    Param(ParamParts),
    Date(DateParts),
    /// Raw fragments, string values, identifiers and condition blocks.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectParts {
    pub distinct: bool,
    pub columns: Vec<String>,
    pub from: Vec<String>,
    pub joins: Vec<String>,
    /// Rendered conditions block, including its `where` keyword.
    pub filter: String,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertParts {
    pub table: String,
    pub columns: Vec<String>,
    /// `values (...)`, a sub-select, or a raw fragment.
    pub source: String,
    pub returning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateParts {
    pub table: String,
    pub assignments: Vec<(String, String)>,
    pub filter: String,
    pub returning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteParts {
    pub table: String,
    pub filter: String,
    pub returning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinParts {
    pub kind: JoinKind,
    pub table: String,
    pub conditions: String,
}

/// Shape of the right operand, after rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandShape {
    None,
    Value,
    Null,
    List,
    SubSelect,
    Field,
    Raw,
    /// Placeholder for the named parameter.
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonParts {
    pub kind: OperatorKind,
    pub left: String,
    pub symbol: String,
    pub right: String,
    pub shape: OperandShape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalPart {
    pub connective: LogicalKind,
    pub text: String,
    /// Nested group with more than one item; rendered in parentheses.
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalParts {
    pub kind: LogicalKind,
    pub items: Vec<LogicalPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnParts {
    pub expr: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderParts {
    pub expr: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableParts {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamParts {
    pub name: String,
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateParts {
    pub value: NaiveDateTime,
    /// False for plain dates, which render without a time part.
    pub has_time: bool,
}

impl DateParts {
    pub fn to_sql_text(&self) -> String {
        if self.has_time {
            self.value.format("%Y-%m-%d %H:%M:%S").to_string()
        } else {
            self.value.format("%Y-%m-%d").to_string()
        }
    }
}
