/// PostgreSQL dialect: `$n` placeholders, `LIMIT`/`OFFSET` paging and
/// `= ANY($n)` for list parameters.
use crate::ast::context::{DefaultRender, ParamStyle, SerializeContext};
use crate::ast::extension::SerializerExtension;
use crate::ast::operators::OperatorKind;
use crate::ast::payload::{OperandShape, Payload};
use crate::ast::types::NodeKind;
use crate::error::Result;

use super::{limit_offset, take_paging};

const RESERVED_WORDS: &[&str] = &["comment"];

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresSerializer;

impl SerializerExtension for PostgresSerializer {
    fn dialect(&self) -> &str {
        "postgres"
    }

    fn description(&self) -> &str {
        "PostgreSQL"
    }

    fn param_style(&self) -> Option<ParamStyle> {
        Some(ParamStyle::Dollar)
    }

    fn serialize(
        &self,
        ctx: &mut SerializeContext,
        kind: NodeKind,
        payload: &mut Payload,
        default: &DefaultRender<'_>,
    ) -> Result<Option<String>> {
        match kind {
            NodeKind::SelectQuery => {
                let (limit, offset) = take_paging(payload);
                let sql = default(ctx, payload)?;
                Ok(Some(limit_offset(sql, limit, offset)))
            }
            NodeKind::ComparisonExpression => {
                let Payload::Comparison(c) = &mut *payload else {
                    return Ok(None);
                };
                if !matches!(c.shape, OperandShape::Param(_)) {
                    return Ok(None);
                }
                let symbol = match c.kind {
                    OperatorKind::In => "=",
                    OperatorKind::NotIn => "!=",
                    _ => return Ok(None),
                };
                c.symbol = symbol.to_string();
                c.right = format!("ANY({})", c.right);
                default(ctx, payload).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn is_reserved_word(&self, _ctx: &SerializeContext, word: &str) -> bool {
        RESERVED_WORDS.contains(&word.to_ascii_lowercase().as_str())
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use pretty_assertions::assert_eq;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn pg() -> GenerateOptions {
        GenerateOptions::new().dialect("postgres").pretty_print(false)
    }

    #[test]
    fn test_limit_offset() {
        let q = select(Vec::<&str>::new()).from("table1").unwrap().offset(4).limit(10);
        let sql = q.generate(&pg()).unwrap().sql;
        assert_eq!(sql, "select * from table1 LIMIT 10 OFFSET 4");
        assert!(Parser::parse_sql(&PostgreSqlDialect {}, &sql).is_ok());

        let q = select(Vec::<&str>::new()).from("table1").unwrap().offset(4);
        let pretty = q.generate(&GenerateOptions::new().dialect("postgres")).unwrap();
        assert_eq!(pretty.sql, "select * from table1\nOFFSET 4");
    }

    #[test]
    fn test_positional_params() {
        let q = select(Vec::<&str>::new())
            .from("table1")
            .unwrap()
            .filter(op::eq("id", param("id")))
            .filter(op::gt("age", param("age")));
        let out = q.generate(&pg().param("id", 1).param("age", 18)).unwrap();
        assert_eq!(out.sql, "select * from table1 where id = $1 and age > $2");
        assert_eq!(
            out.params,
            QueryParams::Positional(vec![Value::Int(1), Value::Int(18)])
        );
    }

    #[test]
    fn test_in_param_uses_any() {
        let q = select(Vec::<&str>::new())
            .from("table1")
            .unwrap()
            .filter(op::in_("id", Param::array("ids")))
            .filter(op::not_in("code", Param::array("codes")));
        let out = q
            .generate(&pg().param("ids", vec![1, 2]).param("codes", "x"))
            .unwrap();
        assert_eq!(
            out.sql,
            "select * from table1 where id = ANY($1) and code != ANY($2)"
        );
        assert_eq!(
            out.params,
            QueryParams::Positional(vec![
                Value::from(vec![1, 2]),
                Value::Array(vec![Value::from("x")]),
            ])
        );
    }

    #[test]
    fn test_in_list_is_untouched() {
        let q = select(Vec::<&str>::new())
            .from("table1")
            .unwrap()
            .filter(op::in_("id", vec![1, 2, 3]));
        assert_eq!(
            q.generate(&pg()).unwrap().sql,
            "select * from table1 where id in (1,2,3)"
        );
    }

    #[test]
    fn test_reserved_word_quoting() {
        let q = select(["comment", "name"]).from("notes").unwrap();
        assert_eq!(
            q.generate(&pg()).unwrap().sql,
            "select \"comment\", name from notes"
        );
    }
}
