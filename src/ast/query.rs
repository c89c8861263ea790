/// Query nodes: SELECT, INSERT, UPDATE, DELETE and joins.
///
/// Builders validate their input as they go, so a malformed table name or
/// join kind fails with `InvalidArgument` before any SQL is generated.
use super::operators::{GroupItem, IntoOperand, LogicalOperator, Operator};
use super::types::{Expression, OrderColumn, ReturningField, SelectColumn, TableRef};
use crate::error::{Error, Result};

/// Conversion into a table reference, validated at construction time.
pub trait IntoTable {
    fn into_table(self) -> Result<TableRef>;
}

impl IntoTable for TableRef {
    fn into_table(self) -> Result<TableRef> {
        Ok(self)
    }
}

impl IntoTable for &str {
    fn into_table(self) -> Result<TableRef> {
        TableRef::parse(self)
    }
}

impl IntoTable for String {
    fn into_table(self) -> Result<TableRef> {
        TableRef::parse(&self)
    }
}

impl IntoTable for &String {
    fn into_table(self) -> Result<TableRef> {
        TableRef::parse(self)
    }
}

impl IntoTable for SelectQuery {
    fn into_table(self) -> Result<TableRef> {
        TableRef::try_from(self)
    }
}

impl IntoTable for Expression {
    fn into_table(self) -> Result<TableRef> {
        TableRef::try_from(self)
    }
}

/// Join kinds, numbered the way callers pass them as codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner = 0,
    Left = 1,
    LeftOuter = 2,
    Right = 3,
    RightOuter = 4,
    Outer = 5,
    FullOuter = 6,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "inner join",
            JoinKind::Left => "left join",
            JoinKind::LeftOuter => "left outer join",
            JoinKind::Right => "right join",
            JoinKind::RightOuter => "right outer join",
            JoinKind::Outer => "outer join",
            JoinKind::FullOuter => "full outer join",
        }
    }
}

impl TryFrom<u8> for JoinKind {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => JoinKind::Inner,
            1 => JoinKind::Left,
            2 => JoinKind::LeftOuter,
            3 => JoinKind::Right,
            4 => JoinKind::RightOuter,
            5 => JoinKind::Outer,
            6 => JoinKind::FullOuter,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid join kind {}",
                    code
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub conditions: LogicalOperator,
}

impl Join {
    pub fn new(kind: JoinKind, table: impl IntoTable) -> Result<Self> {
        Ok(Self {
            kind,
            table: table.into_table()?,
            conditions: LogicalOperator::and(),
        })
    }

    /// Build from a numeric join kind code (0..=6).
    pub fn from_code(code: u8, table: impl IntoTable) -> Result<Self> {
        Join::new(JoinKind::try_from(code)?, table)
    }

    pub fn on(mut self, op: impl Into<Operator>) -> Self {
        self.conditions.push(op);
        self
    }

    pub fn on_items<I, T>(mut self, items: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<GroupItem>,
    {
        self.conditions.add(items)?;
        Ok(self)
    }
}

pub fn inner_join(table: impl IntoTable) -> Result<Join> {
    Join::new(JoinKind::Inner, table)
}

pub fn left_join(table: impl IntoTable) -> Result<Join> {
    Join::new(JoinKind::Left, table)
}

pub fn left_outer_join(table: impl IntoTable) -> Result<Join> {
    Join::new(JoinKind::LeftOuter, table)
}

pub fn right_join(table: impl IntoTable) -> Result<Join> {
    Join::new(JoinKind::Right, table)
}

pub fn right_outer_join(table: impl IntoTable) -> Result<Join> {
    Join::new(JoinKind::RightOuter, table)
}

pub fn outer_join(table: impl IntoTable) -> Result<Join> {
    Join::new(JoinKind::Outer, table)
}

pub fn full_outer_join(table: impl IntoTable) -> Result<Join> {
    Join::new(JoinKind::FullOuter, table)
}

/// A SELECT query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub distinct: bool,
    pub columns: Vec<SelectColumn>,
    pub from: Vec<TableRef>,
    pub joins: Vec<Join>,
    pub filter: LogicalOperator,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderColumn>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// `select <columns>`; an empty list renders `*`.
pub fn select<I, T>(columns: I) -> SelectQuery
where
    I: IntoIterator<Item = T>,
    T: Into<SelectColumn>,
{
    SelectQuery::new().columns(columns)
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, T>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SelectColumn>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn from(mut self, table: impl IntoTable) -> Result<Self> {
        self.from.push(table.into_table()?);
        Ok(self)
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, op: impl Into<Operator>) -> Self {
        self.filter.push(op);
        self
    }

    /// Add conditions through the grouping grammar.
    pub fn filter_items<I, T>(mut self, items: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<GroupItem>,
    {
        self.filter.add(items)?;
        Ok(self)
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn order_by<I, T>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OrderColumn>,
    {
        self.order_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

/// Shared RETURNING capability of the data-modifying queries.
pub trait Returning: Sized {
    fn returning_fields_mut(&mut self) -> &mut Vec<ReturningField>;

    /// Parse `"field"` / `"field as alias"` items into the RETURNING clause.
    fn returning<I, S>(mut self, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for f in fields {
            let parsed = ReturningField::parse(f.as_ref())?;
            self.returning_fields_mut().push(parsed);
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Expression>),
    Select(Box<SelectQuery>),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub returning: Vec<ReturningField>,
}

/// `insert into <table> (<keys>) values (<values>)`.
pub fn insert<I, K, V>(table: impl IntoTable, values: I) -> Result<InsertQuery>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: IntoOperand,
{
    let mut columns = Vec::new();
    let mut row = Vec::new();
    for (k, v) in values {
        columns.push(k.into());
        row.push(v.into_operand());
    }
    if columns.is_empty() {
        return Err(Error::invalid_argument("insert requires at least one value"));
    }
    Ok(InsertQuery {
        table: table.into_table()?,
        columns,
        source: InsertSource::Values(row),
        returning: Vec::new(),
    })
}

impl InsertQuery {
    /// `insert into <table> (<columns>) select ...` or a raw values fragment.
    pub fn with_source<I, S>(table: impl IntoTable, columns: I, source: InsertSource) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(InsertQuery {
            table: table.into_table()?,
            columns: columns.into_iter().map(Into::into).collect(),
            source,
            returning: Vec::new(),
        })
    }
}

impl Returning for InsertQuery {
    fn returning_fields_mut(&mut self) -> &mut Vec<ReturningField> {
        &mut self.returning
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    pub table: TableRef,
    pub assignments: Vec<(String, Expression)>,
    pub filter: LogicalOperator,
    pub returning: Vec<ReturningField>,
}

/// `update <table> set <k = v, ...>`.
pub fn update<I, K, V>(table: impl IntoTable, values: I) -> Result<UpdateQuery>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: IntoOperand,
{
    let assignments: Vec<(String, Expression)> = values
        .into_iter()
        .map(|(k, v)| (k.into(), v.into_operand()))
        .collect();
    if assignments.is_empty() {
        return Err(Error::invalid_argument("update requires at least one value"));
    }
    Ok(UpdateQuery {
        table: table.into_table()?,
        assignments,
        filter: LogicalOperator::and(),
        returning: Vec::new(),
    })
}

impl UpdateQuery {
    pub fn filter(mut self, op: impl Into<Operator>) -> Self {
        self.filter.push(op);
        self
    }
}

impl Returning for UpdateQuery {
    fn returning_fields_mut(&mut self) -> &mut Vec<ReturningField> {
        &mut self.returning
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteQuery {
    pub table: TableRef,
    pub filter: LogicalOperator,
    pub returning: Vec<ReturningField>,
}

pub fn delete(table: impl IntoTable) -> Result<DeleteQuery> {
    Ok(DeleteQuery {
        table: table.into_table()?,
        filter: LogicalOperator::and(),
        returning: Vec::new(),
    })
}

impl DeleteQuery {
    pub fn filter(mut self, op: impl Into<Operator>) -> Self {
        self.filter.push(op);
        self
    }
}

impl Returning for DeleteQuery {
    fn returning_fields_mut(&mut self) -> &mut Vec<ReturningField> {
        &mut self.returning
    }
}

/// Top-level query representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Box<SelectQuery>),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    /// Raw SQL passthrough.
    Raw(String),
}

impl From<SelectQuery> for Query {
    fn from(q: SelectQuery) -> Self {
        Query::Select(Box::new(q))
    }
}

impl From<InsertQuery> for Query {
    fn from(q: InsertQuery) -> Self {
        Query::Insert(q)
    }
}

impl From<UpdateQuery> for Query {
    fn from(q: UpdateQuery) -> Self {
        Query::Update(q)
    }
}

impl From<DeleteQuery> for Query {
    fn from(q: DeleteQuery) -> Self {
        Query::Delete(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::operators::op;

    #[test]
    fn test_default_select_query() {
        let q = SelectQuery::default();
        assert!(!q.distinct);
        assert!(q.columns.is_empty());
        assert!(q.filter.is_empty());
        assert!(q.limit.is_none());
    }

    #[test]
    fn test_join_kind_codes() {
        assert_eq!(JoinKind::try_from(6).unwrap(), JoinKind::FullOuter);
        assert!(matches!(
            Join::from_code(7, "table2"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_join_rejects_invalid_table() {
        assert!(inner_join("not a table name").is_err());
        assert!(inner_join(Expression::Value(1.into())).is_err());
        assert!(inner_join(Expression::Raw("lateral f(x) y".into())).is_ok());
    }

    #[test]
    fn test_select_builder() {
        let q = select(["id", "name"])
            .from("countries c")
            .unwrap()
            .filter(op::eq("id", 1))
            .order_by(["-name"])
            .limit(10);
        assert_eq!(q.columns.len(), 2);
        assert_eq!(q.from[0].alias(), Some("c"));
        assert_eq!(q.filter.len(), 1);
        assert!(q.order_by[0].descending);
        assert_eq!(q.limit, Some(10));
    }

    #[test]
    fn test_insert_requires_values() {
        let empty: Vec<(&str, i32)> = vec![];
        assert!(insert("table1", empty).is_err());
        let q = insert("table1", [("id", 1)]).unwrap();
        assert_eq!(q.columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_returning_capability() {
        let q = delete("table1")
            .unwrap()
            .returning(["id", "name as n"])
            .unwrap();
        assert_eq!(q.returning.len(), 2);
        assert_eq!(q.returning[1].alias.as_deref(), Some("n"));
    }
}
