/// AST → SQL serialization.
///
/// Each node serializes its children, packs the text into a [`Payload`] and
/// dispatches through [`SerializeContext::serialize`] with its default
/// renderer. The default renderers below produce lowercase, dialect neutral
/// SQL; clause breaks are emitted as newlines and resolved by the formatter.
use super::context::{generate, payload_mismatch, GenerateOptions, GenerateResult, SerializeContext};
use super::operators::{ComparisonOperator, LogicalOperator, Operator, OperatorKind};
use super::payload::*;
use super::query::*;
use super::types::*;
use crate::error::Result;

/// A serializable AST node.
pub trait SqlNode {
    fn kind(&self) -> NodeKind;

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String>;

    /// Generate SQL text and parameters for this node.
    fn generate(&self, options: &GenerateOptions) -> Result<GenerateResult> {
        generate(self, options)
    }
}

impl SqlNode for Query {
    fn kind(&self) -> NodeKind {
        match self {
            Query::Select(_) => NodeKind::SelectQuery,
            Query::Insert(_) => NodeKind::InsertQuery,
            Query::Update(_) => NodeKind::UpdateQuery,
            Query::Delete(_) => NodeKind::DeleteQuery,
            Query::Raw(_) => NodeKind::Raw,
        }
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        match self {
            Query::Select(s) => s.serialize(ctx),
            Query::Insert(i) => i.serialize(ctx),
            Query::Update(u) => u.serialize(ctx),
            Query::Delete(d) => d.serialize(ctx),
            Query::Raw(sql) => serialize_raw(ctx, sql),
        }
    }
}

impl SqlNode for SelectQuery {
    fn kind(&self) -> NodeKind {
        NodeKind::SelectQuery
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.serialize(ctx))
            .collect::<Result<Vec<_>>>()?;
        let from = self
            .from
            .iter()
            .map(|t| t.serialize(ctx))
            .collect::<Result<Vec<_>>>()?;
        let joins = self
            .joins
            .iter()
            .map(|j| j.serialize(ctx))
            .collect::<Result<Vec<_>>>()?;
        let filter = serialize_conditions(ctx, &self.filter)?;
        let group_by = self
            .group_by
            .iter()
            .map(|g| serialize_group_column(ctx, g))
            .collect::<Result<Vec<_>>>()?;
        let order_by = self
            .order_by
            .iter()
            .map(|o| o.serialize(ctx))
            .collect::<Result<Vec<_>>>()?;
        let payload = Payload::Select(SelectParts {
            distinct: self.distinct,
            columns,
            from,
            joins,
            filter,
            group_by,
            order_by,
            limit: self.limit,
            offset: self.offset,
        });
        ctx.serialize(NodeKind::SelectQuery, payload, &render_select)
    }
}

/// Default select rendering. Paging falls back to `limit`/`offset`.
pub fn render_select(_ctx: &mut SerializeContext, payload: &Payload) -> Result<String> {
    let Payload::Select(p) = payload else {
        return Err(payload_mismatch(NodeKind::SelectQuery));
    };
    let mut out = String::from("select ");
    if p.distinct {
        out.push_str("distinct ");
    }
    if p.columns.is_empty() {
        out.push('*');
    } else {
        out.push_str(&p.columns.join(", "));
    }
    if !p.from.is_empty() {
        out.push_str(" from ");
        out.push_str(&p.from.join(", "));
    }
    for join in &p.joins {
        out.push('\n');
        out.push_str(join);
    }
    if !p.filter.is_empty() {
        out.push('\n');
        out.push_str(&p.filter);
    }
    if !p.group_by.is_empty() {
        out.push_str("\ngroup by ");
        out.push_str(&p.group_by.join(", "));
    }
    if !p.order_by.is_empty() {
        out.push_str("\norder by ");
        out.push_str(&p.order_by.join(", "));
    }
    if let Some(limit) = p.limit {
        out.push_str(&format!("\nlimit {}", limit));
    }
    if let Some(offset) = p.offset.filter(|o| *o > 0) {
        out.push_str(if p.limit.is_some() { " " } else { "\n" });
        out.push_str(&format!("offset {}", offset));
    }
    Ok(out)
}

impl SqlNode for SelectColumn {
    fn kind(&self) -> NodeKind {
        NodeKind::SelectColumn
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let expr = serialize_expression(ctx, &self.expr)?;
        let payload = Payload::Column(ColumnParts {
            expr,
            alias: self.alias.clone(),
        });
        ctx.serialize(NodeKind::SelectColumn, payload, &|_ctx: &mut SerializeContext, payload: &Payload| {
            let Payload::Column(c) = payload else {
                return Err(payload_mismatch(NodeKind::SelectColumn));
            };
            Ok(match &c.alias {
                Some(alias) => format!("{} as {}", c.expr, alias),
                None => c.expr.clone(),
            })
        })
    }
}

impl SqlNode for OrderColumn {
    fn kind(&self) -> NodeKind {
        NodeKind::OrderColumn
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let expr = serialize_expression(ctx, &self.expr)?;
        let payload = Payload::Order(OrderParts {
            expr,
            descending: self.descending,
        });
        ctx.serialize(NodeKind::OrderColumn, payload, &|_ctx: &mut SerializeContext, payload: &Payload| {
            let Payload::Order(o) = payload else {
                return Err(payload_mismatch(NodeKind::OrderColumn));
            };
            Ok(if o.descending {
                format!("{} desc", o.expr)
            } else {
                o.expr.clone()
            })
        })
    }
}

fn serialize_group_column(ctx: &mut SerializeContext, column: &str) -> Result<String> {
    let text = if is_identifier_path(column) {
        ctx.escape_identifier(column)?
    } else {
        column.to_string()
    };
    ctx.serialize(NodeKind::GroupColumn, Payload::Text(text), &render_text)
}

impl SqlNode for TableRef {
    fn kind(&self) -> NodeKind {
        match self {
            TableRef::Table { .. } => NodeKind::TableName,
            TableRef::Raw(_) => NodeKind::Raw,
            TableRef::SubSelect { .. } => NodeKind::SelectQuery,
        }
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        match self {
            TableRef::Table {
                schema,
                name,
                alias,
            } => {
                let payload = Payload::Table(TableParts {
                    schema: schema.clone(),
                    name: name.clone(),
                    alias: alias.clone(),
                });
                ctx.serialize(NodeKind::TableName, payload, &render_table)
            }
            TableRef::Raw(sql) => serialize_raw(ctx, sql),
            TableRef::SubSelect { query, alias } => {
                let inner = query.serialize(ctx)?;
                Ok(match alias {
                    Some(alias) => format!("({}) {}", inner, alias),
                    None => format!("({})", inner),
                })
            }
        }
    }
}

fn render_table(ctx: &mut SerializeContext, payload: &Payload) -> Result<String> {
    let Payload::Table(t) = payload else {
        return Err(payload_mismatch(NodeKind::TableName));
    };
    let mut out = String::new();
    if let Some(schema) = &t.schema {
        out.push_str(&ctx.quote_reserved(schema));
        out.push('.');
    }
    out.push_str(&ctx.quote_reserved(&t.name));
    if let Some(alias) = &t.alias {
        out.push(' ');
        out.push_str(alias);
    }
    Ok(out)
}

impl SqlNode for Join {
    fn kind(&self) -> NodeKind {
        NodeKind::Join
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let table = self.table.serialize(ctx)?;
        let conditions = self.conditions.serialize(ctx)?;
        let payload = Payload::Join(JoinParts {
            kind: self.kind,
            table,
            conditions,
        });
        ctx.serialize(NodeKind::Join, payload, &|_ctx: &mut SerializeContext, payload: &Payload| {
            let Payload::Join(j) = payload else {
                return Err(payload_mismatch(NodeKind::Join));
            };
            let mut out = format!("{} {}", j.kind.keyword(), j.table);
            if !j.conditions.is_empty() {
                out.push_str(" on ");
                out.push_str(&j.conditions);
            }
            Ok(out)
        })
    }
}

/// Render a WHERE block; empty when there are no conditions.
pub fn serialize_conditions(ctx: &mut SerializeContext, filter: &LogicalOperator) -> Result<String> {
    let text = filter.serialize(ctx)?;
    if text.is_empty() {
        return Ok(text);
    }
    ctx.serialize(NodeKind::ConditionsBlock, Payload::Text(text), &|_ctx: &mut SerializeContext, payload: &Payload| {
        let Payload::Text(text) = payload else {
            return Err(payload_mismatch(NodeKind::ConditionsBlock));
        };
        Ok(format!("where {}", text))
    })
}

impl SqlNode for Operator {
    fn kind(&self) -> NodeKind {
        match self {
            Operator::Comparison(_) => NodeKind::ComparisonExpression,
            Operator::Logical(_) => NodeKind::LogicalExpression,
            Operator::Raw(_) => NodeKind::Raw,
        }
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        match self {
            Operator::Comparison(c) => c.serialize(ctx),
            Operator::Logical(l) => l.serialize(ctx),
            Operator::Raw(sql) => serialize_raw(ctx, sql),
        }
    }
}

impl SqlNode for LogicalOperator {
    fn kind(&self) -> NodeKind {
        NodeKind::LogicalExpression
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let mut items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let text = item.operator.serialize(ctx)?;
            if text.is_empty() {
                continue;
            }
            let is_group = matches!(&item.operator, Operator::Logical(g) if g.items.len() > 1);
            items.push(LogicalPart {
                connective: item.connective,
                text,
                is_group,
            });
        }
        if items.is_empty() {
            return Ok(String::new());
        }
        let payload = Payload::Logical(LogicalParts {
            kind: self.kind,
            items,
        });
        ctx.serialize(NodeKind::LogicalExpression, payload, &render_logical)
    }
}

fn render_logical(_ctx: &mut SerializeContext, payload: &Payload) -> Result<String> {
    let Payload::Logical(l) = payload else {
        return Err(payload_mismatch(NodeKind::LogicalExpression));
    };
    let mut out = String::new();
    for (i, part) in l.items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
            out.push_str(part.connective.as_str());
            out.push(' ');
        }
        if part.is_group {
            out.push('(');
            out.push_str(&part.text);
            out.push(')');
        } else {
            out.push_str(&part.text);
        }
    }
    Ok(out)
}

impl SqlNode for ComparisonOperator {
    fn kind(&self) -> NodeKind {
        NodeKind::ComparisonExpression
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        self.validate()?;
        let left = serialize_expression(ctx, &self.left)?;
        let between = matches!(self.kind, OperatorKind::Between | OperatorKind::NotBetween);
        let (right, shape) = match &self.right {
            None => (String::new(), OperandShape::None),
            Some(Expression::Value(Value::Null)) => ("null".to_string(), OperandShape::Null),
            Some(Expression::Value(Value::Array(items))) if between => {
                let low = ctx.value_to_sql(items.first().unwrap_or(&Value::Null))?;
                let high = ctx.value_to_sql(items.get(1).unwrap_or(&Value::Null))?;
                (format!("{} and {}", low, high), OperandShape::List)
            }
            Some(Expression::List(items)) if between => {
                let parts = items
                    .iter()
                    .map(|e| serialize_expression(ctx, e))
                    .collect::<Result<Vec<_>>>()?;
                (parts.join(" and "), OperandShape::List)
            }
            Some(e @ Expression::Value(Value::Array(_))) | Some(e @ Expression::List(_)) => {
                (serialize_expression(ctx, e)?, OperandShape::List)
            }
            Some(Expression::Param(p)) => (p.serialize(ctx)?, OperandShape::Param(p.name.clone())),
            Some(e @ Expression::SubSelect(_)) => (serialize_expression(ctx, e)?, OperandShape::SubSelect),
            Some(e @ Expression::Field(_)) => (serialize_expression(ctx, e)?, OperandShape::Field),
            Some(e @ Expression::Raw(_)) => (serialize_expression(ctx, e)?, OperandShape::Raw),
            Some(e @ Expression::Value(_)) => (serialize_expression(ctx, e)?, OperandShape::Value),
        };
        let symbol = match (self.kind, &shape) {
            (OperatorKind::Eq, OperandShape::List | OperandShape::SubSelect) => "in",
            (OperatorKind::Ne, OperandShape::List | OperandShape::SubSelect) => "not in",
            (OperatorKind::Eq, OperandShape::Null) => "is",
            (OperatorKind::Ne, OperandShape::Null) => "is not",
            (kind, _) => kind.symbol(),
        };
        let payload = Payload::Comparison(ComparisonParts {
            kind: self.kind,
            left,
            symbol: symbol.to_string(),
            right,
            shape,
        });
        ctx.serialize(NodeKind::ComparisonExpression, payload, &render_comparison)
    }
}

pub fn render_comparison(_ctx: &mut SerializeContext, payload: &Payload) -> Result<String> {
    let Payload::Comparison(c) = payload else {
        return Err(payload_mismatch(NodeKind::ComparisonExpression));
    };
    Ok(match c.kind {
        OperatorKind::Exists | OperatorKind::NotExists => format!("{} {}", c.symbol, c.left),
        _ => format!("{} {} {}", c.left, c.symbol, c.right),
    })
}

impl SqlNode for Param {
    fn kind(&self) -> NodeKind {
        NodeKind::ExternalParameter
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let payload = Payload::Param(ParamParts {
            name: self.name.clone(),
            is_array: self.is_array,
        });
        ctx.serialize(NodeKind::ExternalParameter, payload, &render_param)
    }
}

/// Default placeholder rendering: records the bound value and emits the
/// placeholder for the context's style.
pub fn render_param(ctx: &mut SerializeContext, payload: &Payload) -> Result<String> {
    let Payload::Param(p) = payload else {
        return Err(payload_mismatch(NodeKind::ExternalParameter));
    };
    let mut value = ctx.params.get(&p.name).cloned().unwrap_or_default();
    if p.is_array && !matches!(value, Value::Array(_) | Value::Null) {
        value = Value::Array(vec![value]);
    }
    Ok(ctx.bind_param(&p.name, value))
}

impl SqlNode for Expression {
    fn kind(&self) -> NodeKind {
        match self {
            Expression::Field(_) => NodeKind::FieldName,
            Expression::Value(Value::Text(_)) => NodeKind::StringValue,
            Expression::Value(Value::Date(_) | Value::Timestamp(_)) => NodeKind::DateValue,
            Expression::Value(_) | Expression::List(_) | Expression::Raw(_) => NodeKind::Raw,
            Expression::Param(_) => NodeKind::ExternalParameter,
            Expression::SubSelect(_) => NodeKind::SelectQuery,
        }
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        serialize_expression(ctx, self)
    }
}

/// Render an operand; sub-selects are parenthesised.
pub fn serialize_expression(ctx: &mut SerializeContext, expr: &Expression) -> Result<String> {
    match expr {
        Expression::Field(name) => ctx.escape_identifier(name),
        Expression::Value(v) => ctx.value_to_sql(v),
        Expression::Raw(sql) => serialize_raw(ctx, sql),
        Expression::Param(p) => p.serialize(ctx),
        Expression::SubSelect(q) => Ok(format!("({})", q.serialize(ctx)?)),
        Expression::List(items) => {
            let items = items
                .iter()
                .map(|e| serialize_expression(ctx, e))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", items.join(",")))
        }
    }
}

fn render_text(_ctx: &mut SerializeContext, payload: &Payload) -> Result<String> {
    match payload {
        Payload::Text(text) => Ok(text.clone()),
        _ => Err(payload_mismatch(NodeKind::Raw)),
    }
}

pub fn serialize_raw(ctx: &mut SerializeContext, sql: &str) -> Result<String> {
    ctx.serialize(NodeKind::Raw, Payload::Text(sql.to_string()), &render_text)
}

/// Render the RETURNING block and record its fields on the context.
fn serialize_returning(ctx: &mut SerializeContext, fields: &[ReturningField]) -> Result<String> {
    if fields.is_empty() {
        return Ok(String::new());
    }
    for f in fields {
        ctx.add_returning_field(f.clone());
    }
    ctx.serialize(
        NodeKind::ReturningBlock,
        Payload::Returning(fields.to_vec()),
        &|ctx: &mut SerializeContext, payload: &Payload| {
            let Payload::Returning(fields) = payload else {
                return Err(payload_mismatch(NodeKind::ReturningBlock));
            };
            let items: Vec<String> = fields
                .iter()
                .map(|f| {
                    let field = ctx.quote_reserved(&f.field);
                    match &f.alias {
                        Some(alias) => format!("{} as {}", field, alias),
                        None => field,
                    }
                })
                .collect();
            Ok(format!("returning {}", items.join(", ")))
        },
    )
}

impl SqlNode for InsertQuery {
    fn kind(&self) -> NodeKind {
        NodeKind::InsertQuery
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let table = self.table.serialize(ctx)?;
        let columns = self
            .columns
            .iter()
            .map(|c| ctx.escape_identifier(c))
            .collect::<Result<Vec<_>>>()?;
        let source = match &self.source {
            InsertSource::Values(values) => {
                let values = values
                    .iter()
                    .map(|v| serialize_expression(ctx, v))
                    .collect::<Result<Vec<_>>>()?;
                format!("values ({})", values.join(", "))
            }
            InsertSource::Select(q) => format!("\n{}", q.serialize(ctx)?),
            InsertSource::Raw(sql) => serialize_raw(ctx, sql)?,
        };
        let returning = serialize_returning(ctx, &self.returning)?;
        let payload = Payload::Insert(InsertParts {
            table,
            columns,
            source,
            returning,
        });
        ctx.serialize(NodeKind::InsertQuery, payload, &|_ctx: &mut SerializeContext, payload: &Payload| {
            let Payload::Insert(p) = payload else {
                return Err(payload_mismatch(NodeKind::InsertQuery));
            };
            let mut out = format!("insert into {}", p.table);
            if !p.columns.is_empty() {
                out.push_str(&format!(" ({})", p.columns.join(", ")));
            }
            if !p.source.starts_with('\n') {
                out.push(' ');
            }
            out.push_str(&p.source);
            if !p.returning.is_empty() {
                out.push('\n');
                out.push_str(&p.returning);
            }
            Ok(out)
        })
    }
}

impl SqlNode for UpdateQuery {
    fn kind(&self) -> NodeKind {
        NodeKind::UpdateQuery
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let table = self.table.serialize(ctx)?;
        let mut assignments = Vec::with_capacity(self.assignments.len());
        for (column, value) in &self.assignments {
            let column = ctx.escape_identifier(column)?;
            let value = serialize_expression(ctx, value)?;
            assignments.push((column, value));
        }
        let filter = serialize_conditions(ctx, &self.filter)?;
        let returning = serialize_returning(ctx, &self.returning)?;
        let payload = Payload::Update(UpdateParts {
            table,
            assignments,
            filter,
            returning,
        });
        ctx.serialize(NodeKind::UpdateQuery, payload, &|_ctx: &mut SerializeContext, payload: &Payload| {
            let Payload::Update(p) = payload else {
                return Err(payload_mismatch(NodeKind::UpdateQuery));
            };
            let sets: Vec<String> = p
                .assignments
                .iter()
                .map(|(c, v)| format!("{} = {}", c, v))
                .collect();
            let mut out = format!("update {} set {}", p.table, sets.join(", "));
            for block in [&p.filter, &p.returning] {
                if !block.is_empty() {
                    out.push('\n');
                    out.push_str(block);
                }
            }
            Ok(out)
        })
    }
}

impl SqlNode for DeleteQuery {
    fn kind(&self) -> NodeKind {
        NodeKind::DeleteQuery
    }

    fn serialize(&self, ctx: &mut SerializeContext) -> Result<String> {
        let table = self.table.serialize(ctx)?;
        let filter = serialize_conditions(ctx, &self.filter)?;
        let returning = serialize_returning(ctx, &self.returning)?;
        let payload = Payload::Delete(DeleteParts {
            table,
            filter,
            returning,
        });
        ctx.serialize(NodeKind::DeleteQuery, payload, &|_ctx: &mut SerializeContext, payload: &Payload| {
            let Payload::Delete(p) = payload else {
                return Err(payload_mismatch(NodeKind::DeleteQuery));
            };
            let mut out = format!("delete from {}", p.table);
            for block in [&p.filter, &p.returning] {
                if !block.is_empty() {
                    out.push('\n');
                    out.push_str(block);
                }
            }
            Ok(out)
        })
    }
}
