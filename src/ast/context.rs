/// Serialization context and the `generate` entry point.
///
/// A `SerializeContext` lives for exactly one `generate` call. Nodes render
/// through [`SerializeContext::serialize`], which offers every payload to the
/// caller's hooks, then to the dialect extensions in registration order, and
/// only then to the node's default renderer.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::compiler::SqlNode;
use super::extension::{ExtensionRegistry, SerializerExtension};
use super::formatter::flatten_sql;
use super::payload::{DateParts, Payload};
use super::types::{NodeKind, ReturningField, Value};
use crate::error::Result;

/// Default renderer of a node, invoked when no hook or extension answers.
pub type DefaultRender<'a> = dyn Fn(&mut SerializeContext, &Payload) -> Result<String> + 'a;

/// Per-call hook consulted before any dialect extension.
pub type SerializeHook = Arc<
    dyn Fn(&mut SerializeContext, NodeKind, &mut Payload, &DefaultRender<'_>) -> Result<Option<String>>
        + Send
        + Sync,
>;

/// Placeholder style for bound parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamStyle {
    /// `:name`, named output params.
    Colon,
    /// `?`, positional output params.
    QuestionMark,
    /// `$1`, positional output params.
    Dollar,
    /// `@name`, named output params.
    At,
}

impl ParamStyle {
    pub fn is_positional(&self) -> bool {
        matches!(self, ParamStyle::QuestionMark | ParamStyle::Dollar)
    }
}

/// Compiled output parameters. The variant is chosen once per generation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParams {
    Positional(Vec<Value>),
    Named(BTreeMap<String, Value>),
}

impl QueryParams {
    fn for_style(style: ParamStyle) -> Self {
        if style.is_positional() {
            QueryParams::Positional(Vec::new())
        } else {
            QueryParams::Named(BTreeMap::new())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryParams::Positional(v) => v.len(),
            QueryParams::Named(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values in placeholder order (named params in key order).
    pub fn values(&self) -> Vec<&Value> {
        match self {
            QueryParams::Positional(v) => v.iter().collect(),
            QueryParams::Named(m) => m.values().collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            QueryParams::Positional(v) => {
                serde_json::Value::Array(v.iter().map(Value::to_json).collect())
            }
            QueryParams::Named(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl Default for QueryParams {
    fn default() -> Self {
        QueryParams::Named(BTreeMap::new())
    }
}

/// Options for a `generate` call. Unset fields fall back to defaults.
#[derive(Clone, Default)]
pub struct GenerateOptions {
    pub dialect: Option<String>,
    pub dialect_version: Option<String>,
    pub pretty_print: Option<bool>,
    pub param_style: Option<ParamStyle>,
    /// Literal values for `Param` placeholders.
    pub params: BTreeMap<String, Value>,
    /// Dialect extensions; the built-in registry when unset.
    pub registry: Option<Arc<ExtensionRegistry>>,
    pub hooks: Vec<SerializeHook>,
}

impl std::fmt::Debug for GenerateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateOptions")
            .field("dialect", &self.dialect)
            .field("dialect_version", &self.dialect_version)
            .field("pretty_print", &self.pretty_print)
            .field("param_style", &self.param_style)
            .field("params", &self.params)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = Some(dialect.into());
        self
    }

    pub fn dialect_version(mut self, version: impl Into<String>) -> Self {
        self.dialect_version = Some(version.into());
        self
    }

    pub fn pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = Some(pretty);
        self
    }

    pub fn param_style(mut self, style: ParamStyle) -> Self {
        self.param_style = Some(style);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn hook(mut self, hook: SerializeHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(&self, overrides: &GenerateOptions) -> GenerateOptions {
        let mut params = self.params.clone();
        params.extend(overrides.params.clone());
        let mut hooks = self.hooks.clone();
        hooks.extend(overrides.hooks.iter().cloned());
        GenerateOptions {
            dialect: overrides.dialect.clone().or_else(|| self.dialect.clone()),
            dialect_version: overrides
                .dialect_version
                .clone()
                .or_else(|| self.dialect_version.clone()),
            pretty_print: overrides.pretty_print.or(self.pretty_print),
            param_style: overrides.param_style.or(self.param_style),
            params,
            registry: overrides.registry.clone().or_else(|| self.registry.clone()),
            hooks,
        }
    }
}

/// Output of `generate`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResult {
    pub sql: String,
    pub params: QueryParams,
    pub returning_fields: Option<Vec<ReturningField>>,
}

const RESERVED_WORDS: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "check", "constraint", "create",
    "default", "delete", "desc", "distinct", "drop", "else", "end", "exists", "from", "full",
    "group", "having", "in", "inner", "insert", "into", "is", "join", "left", "like", "limit",
    "not", "null", "offset", "on", "or", "order", "outer", "primary", "references", "right",
    "select", "set", "table", "then", "union", "unique", "update", "user", "values", "when",
    "where",
];

pub struct SerializeContext {
    pub dialect: Option<String>,
    pub dialect_version: Option<String>,
    pub pretty_print: bool,
    /// Literal values supplied by the caller.
    pub params: BTreeMap<String, Value>,
    param_style: ParamStyle,
    query_params: QueryParams,
    returning_fields: Vec<ReturningField>,
    extensions: Arc<[Arc<dyn SerializerExtension>]>,
    hooks: Arc<[SerializeHook]>,
}

impl SerializeContext {
    pub fn new(options: &GenerateOptions) -> Self {
        let registry = options
            .registry
            .clone()
            .unwrap_or_else(ExtensionRegistry::builtin);
        let extensions: Vec<Arc<dyn SerializerExtension>> = options
            .dialect
            .as_deref()
            .map(|d| registry.for_dialect(d))
            .unwrap_or_default();
        let param_style = options
            .param_style
            .or_else(|| extensions.iter().find_map(|e| e.param_style()))
            .unwrap_or(ParamStyle::Colon);
        Self {
            dialect: options.dialect.clone(),
            dialect_version: options.dialect_version.clone(),
            pretty_print: options.pretty_print.unwrap_or(true),
            params: options.params.clone(),
            param_style,
            query_params: QueryParams::for_style(param_style),
            returning_fields: Vec::new(),
            extensions: extensions.into(),
            hooks: options.hooks.clone().into(),
        }
    }

    pub fn param_style(&self) -> ParamStyle {
        self.param_style
    }

    pub fn query_params(&self) -> &QueryParams {
        &self.query_params
    }

    pub fn returning_fields(&self) -> &[ReturningField] {
        &self.returning_fields
    }

    pub fn add_returning_field(&mut self, field: ReturningField) {
        self.returning_fields.push(field);
    }

    /// Dialect name or `"default"`, for error messages.
    pub fn dialect_name(&self) -> &str {
        self.dialect.as_deref().unwrap_or("default")
    }

    /// Major version number of the dialect, if one was given.
    pub fn dialect_major_version(&self) -> Option<u32> {
        self.dialect_version
            .as_deref()
            .and_then(|v| v.split('.').next())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Render a node: hooks first, then extensions, then the default.
    pub fn serialize(
        &mut self,
        kind: NodeKind,
        mut payload: Payload,
        default: &DefaultRender<'_>,
    ) -> Result<String> {
        let hooks = Arc::clone(&self.hooks);
        for hook in hooks.iter() {
            if let Some(text) = hook(self, kind, &mut payload, default)? {
                return Ok(text);
            }
        }
        let extensions = Arc::clone(&self.extensions);
        for ext in extensions.iter() {
            if let Some(text) = ext.serialize(self, kind, &mut payload, default)? {
                return Ok(text);
            }
        }
        default(self, &payload)
    }

    /// Record a bound value and return its placeholder text.
    pub fn bind_param(&mut self, name: &str, value: Value) -> String {
        match &mut self.query_params {
            QueryParams::Positional(values) => {
                values.push(value);
                match self.param_style {
                    ParamStyle::Dollar => format!("${}", values.len()),
                    _ => "?".to_string(),
                }
            }
            QueryParams::Named(values) => {
                values.insert(name.to_string(), value);
                match self.param_style {
                    ParamStyle::At => format!("@{}", name),
                    _ => format!(":{}", name),
                }
            }
        }
    }

    pub fn is_reserved_word(&self, word: &str) -> bool {
        let lower = word.to_ascii_lowercase();
        RESERVED_WORDS.contains(&lower.as_str())
            || self.extensions.iter().any(|e| e.is_reserved_word(self, word))
    }

    /// Render an identifier path through the `field_name` hook.
    pub fn escape_identifier(&mut self, name: &str) -> Result<String> {
        self.serialize(
            NodeKind::FieldName,
            Payload::Text(name.to_string()),
            &|ctx: &mut SerializeContext, payload: &Payload| {
                let Payload::Text(name) = payload else {
                    return Err(payload_mismatch(NodeKind::FieldName));
                };
                Ok(ctx.quote_reserved(name))
            },
        )
    }

    /// Double-quote reserved parts of a dotted identifier.
    pub fn quote_reserved(&self, name: &str) -> String {
        name.split('.')
            .map(|part| {
                if part == "*" || part.starts_with('"') || !self.is_reserved_word(part) {
                    part.to_string()
                } else {
                    format!("\"{}\"", part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Render a literal value inline.
    pub fn value_to_sql(&mut self, value: &Value) -> Result<String> {
        match value {
            Value::Null => Ok("null".to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Text(s) => self.serialize(
                NodeKind::StringValue,
                Payload::Text(s.clone()),
                &|_ctx: &mut SerializeContext, payload: &Payload| match payload {
                    Payload::Text(s) => Ok(quote_string(s)),
                    _ => Err(payload_mismatch(NodeKind::StringValue)),
                },
            ),
            Value::Json(j) => Ok(quote_string(&j.to_string())),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|x| format!("{:02x}", x)).collect();
                Ok(format!("X'{}'", hex))
            }
            Value::Date(d) => self.date_to_sql(DateParts {
                value: d.and_hms_opt(0, 0, 0).unwrap_or_default(),
                has_time: false,
            }),
            Value::Timestamp(ts) => self.date_to_sql(DateParts {
                value: *ts,
                has_time: true,
            }),
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|v| self.value_to_sql(v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", items.join(",")))
            }
        }
    }

    fn date_to_sql(&mut self, parts: DateParts) -> Result<String> {
        self.serialize(
            NodeKind::DateValue,
            Payload::Date(parts),
            &|_ctx: &mut SerializeContext, payload: &Payload| match payload {
                Payload::Date(parts) => Ok(quote_string(&parts.to_sql_text())),
                _ => Err(payload_mismatch(NodeKind::DateValue)),
            },
        )
    }
}

/// Single-quote a string, doubling embedded quotes.
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Error for a payload whose variant does not match the node kind.
pub fn payload_mismatch(kind: NodeKind) -> crate::error::Error {
    crate::error::Error::invalid_argument(format!("unexpected payload for {}", kind))
}

/// Serialize `node` into SQL text plus compiled parameters.
pub fn generate<N: SqlNode + ?Sized>(node: &N, options: &GenerateOptions) -> Result<GenerateResult> {
    let mut ctx = SerializeContext::new(options);
    let text = node.serialize(&mut ctx)?;
    let sql = flatten_sql(&text, ctx.pretty_print);
    debug!(
        dialect = ctx.dialect_name(),
        kind = %node.kind(),
        params = ctx.query_params.len(),
        "generated statement"
    );
    let returning_fields = if ctx.returning_fields.is_empty() {
        None
    } else {
        Some(std::mem::take(&mut ctx.returning_fields))
    };
    Ok(GenerateResult {
        sql,
        params: ctx.query_params,
        returning_fields,
    })
}
