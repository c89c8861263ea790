/// Dialect extensions.
///
/// An extension gets first refusal on every node rendered for its dialect.
/// Returning `Ok(Some(text))` replaces the node's text and stops the chain;
/// `Ok(None)` passes the node on to the next extension and finally to the
/// default renderer. Adding a dialect means implementing this trait; the
/// AST and the default renderers stay untouched.
use std::sync::{Arc, OnceLock};

use super::context::{DefaultRender, ParamStyle, SerializeContext};
use super::payload::Payload;
use super::types::NodeKind;
use crate::dialect::{MssqlSerializer, OracleSerializer, PostgresSerializer, SqliteSerializer};
use crate::error::Result;

/// Trait implemented by every dialect extension.
///
/// # Example
///
/// ```ignore
/// struct Upper;
///
/// impl SerializerExtension for Upper {
///     fn dialect(&self) -> &str { "shout" }
///     fn serialize(&self, ctx: &mut SerializeContext, kind: NodeKind,
///                  payload: &mut Payload, default: &DefaultRender<'_>) -> Result<Option<String>> {
///         Ok(Some(default(ctx, payload)?.to_uppercase()))
///     }
/// }
/// ```
pub trait SerializerExtension: Send + Sync {
    /// Dialect this extension applies to.
    fn dialect(&self) -> &str;

    /// Optional description.
    fn description(&self) -> &str {
        ""
    }

    /// Placeholder style used when the caller does not choose one.
    fn param_style(&self) -> Option<ParamStyle> {
        None
    }

    fn serialize(
        &self,
        ctx: &mut SerializeContext,
        kind: NodeKind,
        payload: &mut Payload,
        default: &DefaultRender<'_>,
    ) -> Result<Option<String>>;

    fn is_reserved_word(&self, _ctx: &SerializeContext, _word: &str) -> bool {
        false
    }
}

/// Ordered list of extensions. Earlier registrations take priority.
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn SerializerExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled dialects.
    pub fn with_builtin_dialects() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PostgresSerializer));
        registry.register(Arc::new(SqliteSerializer));
        registry.register(Arc::new(MssqlSerializer));
        registry.register(Arc::new(OracleSerializer));
        registry
    }

    /// Shared, immutable instance of [`ExtensionRegistry::with_builtin_dialects`].
    pub fn builtin() -> Arc<ExtensionRegistry> {
        static BUILTIN: OnceLock<Arc<ExtensionRegistry>> = OnceLock::new();
        Arc::clone(BUILTIN.get_or_init(|| Arc::new(Self::with_builtin_dialects())))
    }

    pub fn register(&mut self, extension: Arc<dyn SerializerExtension>) {
        self.extensions.push(extension);
    }

    /// Remove a previously registered extension. Returns false if it was not found.
    pub fn unregister(&mut self, extension: &Arc<dyn SerializerExtension>) -> bool {
        let target = Arc::as_ptr(extension) as *const ();
        let before = self.extensions.len();
        self.extensions
            .retain(|e| Arc::as_ptr(e) as *const () != target);
        self.extensions.len() != before
    }

    /// Extensions for `dialect`, in registration order.
    pub fn for_dialect(&self, dialect: &str) -> Vec<Arc<dyn SerializerExtension>> {
        self.extensions
            .iter()
            .filter(|e| e.dialect().eq_ignore_ascii_case(dialect))
            .cloned()
            .collect()
    }

    pub fn dialects(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for e in &self.extensions {
            if !names.contains(&e.dialect()) {
                names.push(e.dialect());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}
