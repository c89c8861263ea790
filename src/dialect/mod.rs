/// Bundled dialect extensions.
///
/// Each dialect is a [`SerializerExtension`](crate::ast::SerializerExtension)
/// registered in the built-in registry. They only touch the node kinds whose
/// output differs from the default renderers.
mod mssql;
mod oracle;
mod postgres;
mod sqlite;

pub use mssql::MssqlSerializer;
pub use oracle::OracleSerializer;
pub use postgres::PostgresSerializer;
pub use sqlite::SqliteSerializer;

use crate::ast::operators::OperatorKind;
use crate::ast::payload::Payload;

/// Remove paging from a select payload so the default renderer skips it.
/// Returns `(limit, offset)`; a zero offset is dropped.
pub(crate) fn take_paging(payload: &mut Payload) -> (Option<u64>, Option<u64>) {
    match payload {
        Payload::Select(parts) => (
            parts.limit.take(),
            parts.offset.take().filter(|o| *o > 0),
        ),
        _ => (None, None),
    }
}

/// Rewrite `ilike` / `not ilike` to their case-sensitive forms.
pub(crate) fn downgrade_ilike(payload: &mut Payload) {
    if let Payload::Comparison(c) = payload {
        match c.kind {
            OperatorKind::ILike => c.symbol = OperatorKind::Like.symbol().to_string(),
            OperatorKind::NotILike => c.symbol = OperatorKind::NotLike.symbol().to_string(),
            _ => {}
        }
    }
}

/// Append `LIMIT n OFFSET m` in upper case, as the postgres and sqlite
/// servers echo it back.
pub(crate) fn limit_offset(mut sql: String, limit: Option<u64>, offset: Option<u64>) -> String {
    if let Some(limit) = limit {
        sql.push_str(&format!("\nLIMIT {}", limit));
    }
    if let Some(offset) = offset {
        sql.push_str(if limit.is_some() { " " } else { "\n" });
        sql.push_str(&format!("OFFSET {}", offset));
    }
    sql
}
