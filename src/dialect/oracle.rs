/// Oracle dialect.
///
/// Servers before 12c have no OFFSET/FETCH clause; paging there wraps the
/// query in `rownum` filters. Arrays and nulls can not be bound, so those
/// parameters are written inline.
use chrono::NaiveTime;

use crate::ast::context::{quote_string, DefaultRender, ParamStyle, SerializeContext};
use crate::ast::extension::SerializerExtension;
use crate::ast::operators::OperatorKind;
use crate::ast::payload::{OperandShape, Payload};
use crate::ast::types::{NodeKind, Value};
use crate::error::{Error, Result};

use super::take_paging;

/// Major version from which OFFSET/FETCH is available.
const FETCH_SUPPORTED_SINCE: u32 = 12;

#[derive(Debug, Default, Clone, Copy)]
pub struct OracleSerializer;

impl OracleSerializer {
    fn serialize_select(
        &self,
        ctx: &mut SerializeContext,
        payload: &mut Payload,
        default: &DefaultRender<'_>,
    ) -> Result<String> {
        let mut ordered = false;
        if let Payload::Select(parts) = &mut *payload {
            if parts.from.is_empty() {
                parts.from.push("dual".to_string());
            }
            ordered = !parts.order_by.is_empty();
        }
        let (limit, offset) = take_paging(payload);
        let inner = default(ctx, payload)?;
        if limit.is_none() && offset.is_none() {
            return Ok(inner);
        }

        if ctx
            .dialect_major_version()
            .is_some_and(|v| v >= FETCH_SUPPORTED_SINCE)
        {
            let mut sql = inner;
            if let Some(offset) = offset {
                sql.push_str(&format!("\nOFFSET {} ROWS", offset));
            }
            if let Some(limit) = limit {
                if offset.is_some() {
                    sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                } else {
                    sql.push_str(&format!("\nFETCH FIRST {} ROWS ONLY", limit));
                }
            }
            return Ok(sql);
        }

        if let (Some(limit), None, false) = (limit, offset, ordered) {
            return Ok(format!("select * from (\n{}\n) where rownum <= {}", inner, limit));
        }
        let offset = offset.unwrap_or(0);
        let mut sql = format!(
            "select * from (\nselect /*+ first_rows({}) */ t.*, rownum row$number from (\n{}\n) t",
            limit.unwrap_or(100),
            inner
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" where rownum <= {}", offset + limit));
        }
        sql.push_str("\n)");
        if offset > 0 {
            sql.push_str(&format!(" where row$number >= {}", offset + 1));
        }
        Ok(sql)
    }

    fn serialize_comparison(
        &self,
        ctx: &mut SerializeContext,
        payload: &mut Payload,
        default: &DefaultRender<'_>,
    ) -> Result<Option<String>> {
        let Payload::Comparison(c) = &mut *payload else {
            return Ok(None);
        };
        match (c.kind, &c.shape) {
            (OperatorKind::Eq | OperatorKind::Ne, OperandShape::Param(name)) => {
                let bound_null = ctx.params.get(name).map_or(true, Value::is_null);
                let negated = c.kind == OperatorKind::Ne;
                if bound_null {
                    c.symbol = if negated { "is not" } else { "is" }.to_string();
                    c.right = "null".to_string();
                } else if c.right.starts_with('(') {
                    c.symbol = if negated { "not in" } else { "in" }.to_string();
                }
            }
            (OperatorKind::ILike | OperatorKind::NotILike, _) => {
                let like = if c.kind == OperatorKind::ILike {
                    OperatorKind::Like
                } else {
                    OperatorKind::NotLike
                };
                return Ok(Some(format!(
                    "upper({}) {} upper({})",
                    c.left,
                    like.symbol(),
                    c.right
                )));
            }
            _ => return Ok(None),
        }
        default(ctx, payload).map(Some)
    }
}

impl SerializerExtension for OracleSerializer {
    fn dialect(&self) -> &str {
        "oracle"
    }

    fn description(&self) -> &str {
        "Oracle Database"
    }

    fn param_style(&self) -> Option<ParamStyle> {
        Some(ParamStyle::Colon)
    }

    fn serialize(
        &self,
        ctx: &mut SerializeContext,
        kind: NodeKind,
        payload: &mut Payload,
        default: &DefaultRender<'_>,
    ) -> Result<Option<String>> {
        match kind {
            NodeKind::SelectQuery => self.serialize_select(ctx, payload, default).map(Some),
            NodeKind::ComparisonExpression => self.serialize_comparison(ctx, payload, default),
            NodeKind::ExternalParameter => {
                let Payload::Param(p) = &*payload else {
                    return Ok(None);
                };
                match ctx.params.get(&p.name).cloned() {
                    Some(value @ Value::Array(_)) => ctx.value_to_sql(&value).map(Some),
                    None | Some(Value::Null) => Ok(Some("null".to_string())),
                    Some(_) => Ok(None),
                }
            }
            NodeKind::DateValue => {
                let Payload::Date(parts) = &*payload else {
                    return Ok(None);
                };
                let text = quote_string(&parts.to_sql_text());
                if parts.has_time && parts.value.time() != NaiveTime::default() {
                    Ok(Some(format!("to_date({}, 'yyyy-mm-dd hh24:mi:ss')", text)))
                } else {
                    let date = quote_string(&parts.value.format("%Y-%m-%d").to_string());
                    Ok(Some(format!("to_date({}, 'yyyy-mm-dd')", date)))
                }
            }
            NodeKind::ReturningBlock => Err(Error::unsupported(self.dialect(), "RETURNING")),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn oracle() -> GenerateOptions {
        GenerateOptions::new().dialect("oracle").pretty_print(false)
    }

    fn oracle12() -> GenerateOptions {
        oracle().dialect_version("12")
    }

    fn table1() -> SelectQuery {
        select(Vec::<&str>::new()).from("table1").unwrap()
    }

    #[test]
    fn test_dual_when_no_table() {
        let q = select(Vec::<&str>::new());
        assert_eq!(q.generate(&oracle()).unwrap().sql, "select * from dual");
    }

    #[test]
    fn test_null_comparisons() {
        let q = select(Vec::<&str>::new()).filter(op::eq("ID", Value::Null));
        assert_eq!(q.generate(&oracle()).unwrap().sql, "select * from dual where ID is null");

        let q = select(Vec::<&str>::new()).filter(op::eq("ID", param("cid")));
        assert_eq!(q.generate(&oracle()).unwrap().sql, "select * from dual where ID is null");

        let q = select(Vec::<&str>::new()).filter(op::ne("ID", Value::Null));
        assert_eq!(
            q.generate(&oracle()).unwrap().sql,
            "select * from dual where ID is not null"
        );
    }

    #[test]
    fn test_dates_use_to_date() {
        let day = NaiveDate::from_ymd_opt(2017, 1, 1).unwrap();
        let q = table1().filter(op::eq("dt", day.and_hms_opt(10, 30, 15).unwrap()));
        assert_eq!(
            q.generate(&oracle()).unwrap().sql,
            "select * from table1 where dt = to_date('2017-01-01 10:30:15', 'yyyy-mm-dd hh24:mi:ss')"
        );
        let q = table1().filter(op::eq("dt", day));
        assert_eq!(
            q.generate(&oracle()).unwrap().sql,
            "select * from table1 where dt = to_date('2017-01-01', 'yyyy-mm-dd')"
        );
    }

    #[test]
    fn test_params() {
        let q = table1().filter(op::eq("ID", param("ID")));
        let out = q.generate(&oracle().param("ID", 5)).unwrap();
        assert_eq!(out.sql, "select * from table1 where ID = :ID");
        assert!(matches!(out.params, QueryParams::Named(ref m) if m.get("ID") == Some(&Value::Int(5))));

        let out = q.generate(&oracle().param("ID", vec![1, 2, 3])).unwrap();
        assert_eq!(out.sql, "select * from table1 where ID in (1,2,3)");
        assert!(out.params.is_empty());
    }

    #[test]
    fn test_rownum_paging() {
        let q = table1().limit(10);
        assert_eq!(
            q.generate(&oracle()).unwrap().sql,
            "select * from (select * from table1) where rownum <= 10"
        );
        assert_eq!(
            q.generate(&GenerateOptions::new().dialect("oracle")).unwrap().sql,
            "select * from (\n  select * from table1\n) where rownum <= 10"
        );

        let q = table1().offset(4);
        assert_eq!(
            q.generate(&oracle()).unwrap().sql,
            "select * from (select /*+ first_rows(100) */ t.*, rownum row$number from (select * from table1) t) where row$number >= 5"
        );

        let q = table1().order_by(["id"]).offset(21).limit(10);
        assert_eq!(
            q.generate(&GenerateOptions::new().dialect("oracle")).unwrap().sql,
            "select * from (\n  select /*+ first_rows(10) */ t.*, rownum row$number from (\n    select * from table1\n    order by id\n  ) t where rownum <= 31\n) where row$number >= 22"
        );
    }

    #[test]
    fn test_fetch_paging_from_12() {
        assert_eq!(
            table1().limit(10).generate(&oracle12()).unwrap().sql,
            "select * from table1 FETCH FIRST 10 ROWS ONLY"
        );
        assert_eq!(
            table1().offset(4).generate(&oracle12()).unwrap().sql,
            "select * from table1 OFFSET 4 ROWS"
        );
        assert_eq!(
            table1().offset(4).limit(10).generate(&oracle12()).unwrap().sql,
            "select * from table1 OFFSET 4 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_ilike_uses_upper() {
        let q = table1().filter(op::ilike("name", "a%"));
        assert_eq!(
            q.generate(&oracle()).unwrap().sql,
            "select * from table1 where upper(name) like upper('a%')"
        );
    }
}
