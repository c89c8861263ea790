/// Comparison and logical operators.
///
/// Operators compose into trees that end up in WHERE clauses and JOIN
/// conditions. `LogicalOperator::add` implements the grouping grammar:
/// leaves, nested groups and `and`/`or` connective tokens that switch the
/// connective for the siblings that follow them.
use chrono::{NaiveDate, NaiveDateTime};

use super::query::SelectQuery;
use super::types::{Expression, Param, Value};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    NotBetween,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Is,
    IsNot,
    Exists,
    NotExists,
}

impl OperatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorKind::Eq => "eq",
            OperatorKind::Ne => "ne",
            OperatorKind::Gt => "gt",
            OperatorKind::Gte => "gte",
            OperatorKind::Lt => "lt",
            OperatorKind::Lte => "lte",
            OperatorKind::Between => "between",
            OperatorKind::NotBetween => "notBetween",
            OperatorKind::In => "in",
            OperatorKind::NotIn => "notIn",
            OperatorKind::Like => "like",
            OperatorKind::NotLike => "notLike",
            OperatorKind::ILike => "iLike",
            OperatorKind::NotILike => "notILike",
            OperatorKind::Is => "is",
            OperatorKind::IsNot => "isNot",
            OperatorKind::Exists => "exists",
            OperatorKind::NotExists => "notExists",
        }
    }

    /// Default SQL symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            OperatorKind::Eq => "=",
            OperatorKind::Ne => "!=",
            OperatorKind::Gt => ">",
            OperatorKind::Gte => ">=",
            OperatorKind::Lt => "<",
            OperatorKind::Lte => "<=",
            OperatorKind::Between => "between",
            OperatorKind::NotBetween => "not between",
            OperatorKind::In => "in",
            OperatorKind::NotIn => "not in",
            OperatorKind::Like => "like",
            OperatorKind::NotLike => "not like",
            OperatorKind::ILike => "ilike",
            OperatorKind::NotILike => "not ilike",
            OperatorKind::Is => "is",
            OperatorKind::IsNot => "is not",
            OperatorKind::Exists => "exists",
            OperatorKind::NotExists => "not exists",
        }
    }

    /// Parse an operator written in a condition key or triple.
    pub fn parse_symbol(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        let kind = match normalized.to_ascii_lowercase().as_str() {
            "" | "=" | "eq" => OperatorKind::Eq,
            "!=" | "<>" | "ne" => OperatorKind::Ne,
            ">" | "gt" => OperatorKind::Gt,
            ">=" | "gte" => OperatorKind::Gte,
            "<" | "lt" => OperatorKind::Lt,
            "<=" | "lte" => OperatorKind::Lte,
            "between" | "btw" => OperatorKind::Between,
            "!between" | "not between" | "nbtw" => OperatorKind::NotBetween,
            "in" => OperatorKind::In,
            "!in" | "not in" | "nin" => OperatorKind::NotIn,
            "like" => OperatorKind::Like,
            "!like" | "not like" | "nlike" => OperatorKind::NotLike,
            "ilike" => OperatorKind::ILike,
            "!ilike" | "not ilike" | "nilike" => OperatorKind::NotILike,
            "is" => OperatorKind::Is,
            "!is" | "is not" => OperatorKind::IsNot,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "unknown comparison operator `{}`",
                    s
                )))
            }
        };
        Ok(kind)
    }
}

/// And/Or connective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalKind {
    And,
    Or,
}

impl LogicalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalKind::And => "and",
            LogicalKind::Or => "or",
        }
    }
}

impl TryFrom<&str> for LogicalKind {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(LogicalKind::And),
            "or" => Ok(LogicalKind::Or),
            _ => Err(Error::invalid_argument(format!(
                "`{}` is not a logical connective",
                s
            ))),
        }
    }
}

/// `left <symbol> right`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOperator {
    pub kind: OperatorKind,
    pub left: Expression,
    /// `None` only for `exists`/`notExists`.
    pub right: Option<Expression>,
}

impl ComparisonOperator {
    /// Build a comparison, validating operand shapes for the operator kind.
    pub fn new(kind: OperatorKind, left: Expression, right: Option<Expression>) -> Result<Self> {
        let comparison = Self { kind, left, right };
        comparison.validate()?;
        Ok(comparison)
    }

    /// Check the operand shapes against the operator kind.
    /// Every comparison is checked again when it is serialized.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind;
        let right = &self.right;
        match &self.left {
            Expression::Field(_) | Expression::Raw(_) | Expression::SubSelect(_) => {}
            other => {
                return Err(Error::invalid_argument(format!(
                    "{:?} cannot be the left operand of `{}`",
                    other,
                    kind.as_str()
                )))
            }
        }
        match kind {
            OperatorKind::Exists | OperatorKind::NotExists => {
                if !self.left.is_sub_select() {
                    return Err(Error::invalid_argument(format!(
                        "`{}` requires a sub-select",
                        kind.as_str()
                    )));
                }
                if right.is_some() {
                    return Err(Error::invalid_argument(format!(
                        "`{}` takes no right operand",
                        kind.as_str()
                    )));
                }
            }
            OperatorKind::Between | OperatorKind::NotBetween => {
                let pair = match right {
                    Some(Expression::List(items)) => items.len() == 2,
                    Some(Expression::Value(Value::Array(items))) => items.len() == 2,
                    _ => false,
                };
                if !pair {
                    return Err(Error::invalid_argument(format!(
                        "`{}` requires exactly two values",
                        kind.as_str()
                    )));
                }
            }
            OperatorKind::In | OperatorKind::NotIn => match right {
                Some(Expression::List(_))
                | Some(Expression::Value(Value::Array(_)))
                | Some(Expression::SubSelect(_))
                | Some(Expression::Param(_))
                | Some(Expression::Raw(_)) => {}
                _ => {
                    return Err(Error::invalid_argument(format!(
                        "`{}` requires a list, sub-select or parameter",
                        kind.as_str()
                    )))
                }
            },
            _ => {
                if right.is_none() {
                    return Err(Error::invalid_argument(format!(
                        "`{}` requires a right operand",
                        kind.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse a `"field op"` key with a value, e.g. `("age >=", 18)`.
    pub fn parse(key: &str, value: Expression) -> Result<Self> {
        let key = key.trim();
        let (field, symbol) = match key.split_once(char::is_whitespace) {
            Some((field, symbol)) => (field, symbol),
            None => (key, ""),
        };
        if field.is_empty() {
            return Err(Error::invalid_argument("condition has no field"));
        }
        let kind = OperatorKind::parse_symbol(symbol)?;
        let value = match (kind, value) {
            // `between` written as a two element array
            (OperatorKind::Between | OperatorKind::NotBetween, Expression::Value(Value::Array(v))) => {
                Expression::List(v.into_iter().map(Expression::Value).collect())
            }
            (_, value) => value,
        };
        ComparisonOperator::new(kind, Expression::Field(field.to_string()), Some(value))
    }

    /// Same operator variant with a different left operand.
    pub fn with_left(&self, left: Expression) -> Self {
        Self {
            kind: self.kind,
            left,
            right: self.right.clone(),
        }
    }
}

/// Any operator that can appear in a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Comparison(ComparisonOperator),
    Logical(LogicalOperator),
    Raw(String),
}

impl From<ComparisonOperator> for Operator {
    fn from(op: ComparisonOperator) -> Self {
        Operator::Comparison(op)
    }
}

impl From<LogicalOperator> for Operator {
    fn from(op: LogicalOperator) -> Self {
        Operator::Logical(op)
    }
}

/// A child of a logical group together with the connective that precedes it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalItem {
    pub connective: LogicalKind,
    pub operator: Operator,
}

/// `a and b or c` style group. Each item carries its own connective; the
/// first item's connective is never rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalOperator {
    pub kind: LogicalKind,
    pub items: Vec<LogicalItem>,
}

impl Default for LogicalOperator {
    fn default() -> Self {
        Self::new(LogicalKind::And)
    }
}

/// Input to the grouping grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupItem {
    /// An already built operator.
    Leaf(Operator),
    /// `(field, symbol, value)` triple.
    Condition {
        field: String,
        symbol: String,
        value: Expression,
    },
    /// Sub-group, rendered in parentheses.
    Group(Vec<GroupItem>),
    /// Switches the connective for following siblings.
    Connective(LogicalKind),
}

/// Condition triple for the grouping grammar.
pub fn cond(field: impl Into<String>, symbol: impl Into<String>, value: impl IntoOperand) -> GroupItem {
    GroupItem::Condition {
        field: field.into(),
        symbol: symbol.into(),
        value: value.into_operand(),
    }
}

impl From<Operator> for GroupItem {
    fn from(op: Operator) -> Self {
        GroupItem::Leaf(op)
    }
}

impl From<ComparisonOperator> for GroupItem {
    fn from(op: ComparisonOperator) -> Self {
        GroupItem::Leaf(op.into())
    }
}

impl From<LogicalOperator> for GroupItem {
    fn from(op: LogicalOperator) -> Self {
        GroupItem::Leaf(op.into())
    }
}

impl From<LogicalKind> for GroupItem {
    fn from(kind: LogicalKind) -> Self {
        GroupItem::Connective(kind)
    }
}

impl From<Vec<GroupItem>> for GroupItem {
    fn from(items: Vec<GroupItem>) -> Self {
        GroupItem::Group(items)
    }
}

impl LogicalOperator {
    pub fn new(kind: LogicalKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    pub fn and() -> Self {
        Self::new(LogicalKind::And)
    }

    pub fn or() -> Self {
        Self::new(LogicalKind::Or)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Append an operator joined by this group's own connective.
    pub fn push(&mut self, op: impl Into<Operator>) -> &mut Self {
        let connective = self.kind;
        self.push_with(connective, op)
    }

    pub fn push_with(&mut self, connective: LogicalKind, op: impl Into<Operator>) -> &mut Self {
        self.items.push(LogicalItem {
            connective,
            operator: op.into(),
        });
        self
    }

    /// Run the grouping grammar over `items`.
    ///
    /// The connective starts as this group's kind for every call and a
    /// `Connective` token changes it for the items after it only.
    pub fn add<I, T>(&mut self, items: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<GroupItem>,
    {
        let mut connective = self.kind;
        for item in items {
            match item.into() {
                GroupItem::Connective(kind) => connective = kind,
                GroupItem::Leaf(op) => {
                    self.push_with(connective, op);
                }
                GroupItem::Condition {
                    field,
                    symbol,
                    value,
                } => {
                    let key = format!("{} {}", field, symbol);
                    let op = ComparisonOperator::parse(&key, value)?;
                    self.push_with(connective, op);
                }
                GroupItem::Group(children) => {
                    if children.is_empty() {
                        continue;
                    }
                    let mut group = LogicalOperator::and();
                    group.add(children)?;
                    self.push_with(connective, group);
                }
            }
        }
        Ok(self)
    }

    /// Builder form of [`LogicalOperator::add`].
    pub fn with<I, T>(mut self, items: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<GroupItem>,
    {
        self.add(items)?;
        Ok(self)
    }

    /// Implicit conjunction of `("field op", value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: IntoOperand,
    {
        let mut group = LogicalOperator::and();
        for (key, value) in pairs {
            group.push(ComparisonOperator::parse(key.as_ref(), value.into_operand())?);
        }
        Ok(group)
    }
}

/// Conversion into a right-hand operand. Strings become text literals here,
/// while on the left side they are column references.
pub trait IntoOperand {
    fn into_operand(self) -> Expression;
}

impl IntoOperand for Expression {
    fn into_operand(self) -> Expression {
        self
    }
}

impl IntoOperand for Param {
    fn into_operand(self) -> Expression {
        Expression::Param(self)
    }
}

impl IntoOperand for SelectQuery {
    fn into_operand(self) -> Expression {
        Expression::SubSelect(Box::new(self))
    }
}

impl IntoOperand for Value {
    fn into_operand(self) -> Expression {
        Expression::Value(self)
    }
}

macro_rules! value_operand {
    ($($t:ty),*) => {
        $(impl IntoOperand for $t {
            fn into_operand(self) -> Expression {
                Expression::Value(Value::from(self))
            }
        })*
    };
}

value_operand!(bool, i16, i32, i64, u16, u32, f32, f64, &str, String, NaiveDate, NaiveDateTime);

impl<T: Into<Value>> IntoOperand for Vec<T> {
    fn into_operand(self) -> Expression {
        Expression::Value(Value::from(self))
    }
}

impl<T: Into<Value>> IntoOperand for Option<T> {
    fn into_operand(self) -> Expression {
        Expression::Value(Value::from(self))
    }
}

impl From<&str> for Expression {
    fn from(s: &str) -> Self {
        Expression::Field(s.to_string())
    }
}

impl From<String> for Expression {
    fn from(s: String) -> Self {
        Expression::Field(s)
    }
}

/// Operator constructors.
pub mod op {
    use super::*;

    fn compare(kind: OperatorKind, left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        Operator::Comparison(ComparisonOperator {
            kind,
            left: left.into(),
            right: Some(right.into_operand()),
        })
    }

    pub fn eq(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::Eq, left, right)
    }

    pub fn ne(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::Ne, left, right)
    }

    pub fn gt(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::Gt, left, right)
    }

    pub fn gte(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::Gte, left, right)
    }

    pub fn lt(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::Lt, left, right)
    }

    pub fn lte(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::Lte, left, right)
    }

    pub fn like(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::Like, left, right)
    }

    pub fn not_like(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::NotLike, left, right)
    }

    pub fn ilike(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::ILike, left, right)
    }

    pub fn not_ilike(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::NotILike, left, right)
    }

    pub fn is(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::Is, left, right)
    }

    pub fn is_not(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::IsNot, left, right)
    }

    pub fn between(left: impl Into<Expression>, low: impl IntoOperand, high: impl IntoOperand) -> Operator {
        Operator::Comparison(ComparisonOperator {
            kind: OperatorKind::Between,
            left: left.into(),
            right: Some(Expression::List(vec![low.into_operand(), high.into_operand()])),
        })
    }

    pub fn not_between(
        left: impl Into<Expression>,
        low: impl IntoOperand,
        high: impl IntoOperand,
    ) -> Operator {
        Operator::Comparison(ComparisonOperator {
            kind: OperatorKind::NotBetween,
            left: left.into(),
            right: Some(Expression::List(vec![low.into_operand(), high.into_operand()])),
        })
    }

    pub fn in_(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::In, left, right)
    }

    pub fn not_in(left: impl Into<Expression>, right: impl IntoOperand) -> Operator {
        compare(OperatorKind::NotIn, left, right)
    }

    pub fn exists(query: SelectQuery) -> Operator {
        Operator::Comparison(ComparisonOperator {
            kind: OperatorKind::Exists,
            left: Expression::SubSelect(Box::new(query)),
            right: None,
        })
    }

    pub fn not_exists(query: SelectQuery) -> Operator {
        Operator::Comparison(ComparisonOperator {
            kind: OperatorKind::NotExists,
            left: Expression::SubSelect(Box::new(query)),
            right: None,
        })
    }

    pub fn raw(sql: impl Into<String>) -> Operator {
        Operator::Raw(sql.into())
    }

    pub fn and<I, T>(items: I) -> Result<Operator>
    where
        I: IntoIterator<Item = T>,
        T: Into<GroupItem>,
    {
        LogicalOperator::and().with(items).map(Operator::Logical)
    }

    pub fn or<I, T>(items: I) -> Result<Operator>
    where
        I: IntoIterator<Item = T>,
        T: Into<GroupItem>,
    {
        LogicalOperator::or().with(items).map(Operator::Logical)
    }
}
