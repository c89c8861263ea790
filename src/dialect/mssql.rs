/// Microsoft SQL Server dialect.
///
/// Paging uses `OFFSET .. ROWS FETCH NEXT .. ROWS ONLY`. The server only
/// accepts it after an `ORDER BY`, so unordered selects get `order by (select null)`.
use crate::ast::context::{DefaultRender, ParamStyle, SerializeContext};
use crate::ast::extension::SerializerExtension;
use crate::ast::payload::Payload;
use crate::ast::types::NodeKind;
use crate::error::{Error, Result};

use super::{downgrade_ilike, take_paging};

const RESERVED_WORDS: &[&str] = &["comment", "key", "file", "identity", "top"];

#[derive(Debug, Default, Clone, Copy)]
pub struct MssqlSerializer;

impl SerializerExtension for MssqlSerializer {
    fn dialect(&self) -> &str {
        "mssql"
    }

    fn description(&self) -> &str {
        "Microsoft SQL Server"
    }

    fn param_style(&self) -> Option<ParamStyle> {
        Some(ParamStyle::At)
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
                let ordered = matches!(payload, Payload::Select(p) if !p.order_by.is_empty());
                let (limit, offset) = take_paging(payload);
                let mut sql = default(ctx, payload)?;
                if limit.is_some() || offset.is_some() {
                    if !ordered {
                        sql.push_str("\norder by (select null)");
                    }
                    sql.push_str(&format!("\nOFFSET {} ROWS", offset.unwrap_or(0)));
                }
                if let Some(limit) = limit {
                    sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
                Ok(Some(sql))
            }
            NodeKind::ReturningBlock => Err(Error::unsupported(self.dialect(), "RETURNING")),
            NodeKind::ComparisonExpression => {
                downgrade_ilike(payload);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn is_reserved_word(&self, _ctx: &SerializeContext, word: &str) -> bool {
        RESERVED_WORDS.contains(&word.to_ascii_lowercase().as_str())
    }
}
