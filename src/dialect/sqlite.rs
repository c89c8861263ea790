/// SQLite dialect.
use crate::ast::context::{DefaultRender, ParamStyle, SerializeContext};
use crate::ast::extension::SerializerExtension;
use crate::ast::payload::Payload;
use crate::ast::types::NodeKind;
use crate::error::Result;

use super::{downgrade_ilike, limit_offset, take_paging};

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteSerializer;

impl SerializerExtension for SqliteSerializer {
    fn dialect(&self) -> &str {
        "sqlite"
    }

    fn description(&self) -> &str {
        "SQLite 3"
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
            NodeKind::SelectQuery => {
                let (mut limit, offset) = take_paging(payload);
                // OFFSET is only valid after a LIMIT
                if offset.is_some() && limit.is_none() {
                    limit = Some(i64::MAX as u64);
                }
                let sql = default(ctx, payload)?;
                Ok(Some(limit_offset(sql, limit, offset)))
            }
            NodeKind::ComparisonExpression => {
                downgrade_ilike(payload);
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}
