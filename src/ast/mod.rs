/// SQL AST and dialect-aware serialization.
///
/// ```text
/// Query nodes            (types.rs, operators.rs, query.rs)
///       ↓
/// Node payloads          (payload.rs)
///       ↓
/// Hooks → extensions → default renderer
///                        (context.rs, extension.rs, compiler.rs)
///       ↓
/// Layout post-pass       (formatter.rs)
/// ```
///
/// Dialects plug in through [`SerializerExtension`]; the AST and default
/// renderers never change for a new database.
pub mod compiler;
pub mod context;
pub mod extension;
pub mod formatter;
pub mod operators;
pub mod payload;
pub mod query;
pub mod types;

pub use compiler::SqlNode;
pub use context::{
    generate, GenerateOptions, GenerateResult, ParamStyle, QueryParams, SerializeContext,
    SerializeHook,
};
pub use extension::{ExtensionRegistry, SerializerExtension};
pub use formatter::flatten_sql;
pub use operators::{
    cond, op, ComparisonOperator, GroupItem, IntoOperand, LogicalKind, LogicalOperator, Operator,
    OperatorKind,
};
pub use payload::Payload;
pub use query::*;
pub use types::*;
