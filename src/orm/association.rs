/// Associations and lazily resolved entity types.
///
/// A target entity may be named, given directly, or produced by an async
/// resolver (to break declaration cycles). Resolution happens at most once
/// per [`TypeThunk`]; clones share the cached result.
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::OnceCell;

use super::metadata::EntityMetadata;
use super::registry::EntityRegistry;
use crate::ast::operators::LogicalOperator;
use crate::error::{Error, Result};

/// Deferred producer of an entity type.
pub type EntityResolver =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<EntityMetadata>>> + Send + Sync>;

#[derive(Clone)]
enum TypeSource {
    Named(String),
    Entity(Arc<EntityMetadata>),
    Resolver(EntityResolver),
}

/// Reference to an entity type, resolved once on first use.
#[derive(Clone)]
pub struct TypeThunk {
    source: TypeSource,
    resolved: Arc<OnceCell<Arc<EntityMetadata>>>,
}

impl fmt::Debug for TypeThunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            TypeSource::Named(name) => write!(f, "TypeThunk({})", name),
            TypeSource::Entity(entity) => write!(f, "TypeThunk({})", entity.name),
            TypeSource::Resolver(_) => match self.resolved.get() {
                Some(entity) => write!(f, "TypeThunk({})", entity.name),
                None => f.write_str("TypeThunk(<unresolved>)"),
            },
        }
    }
}

impl TypeThunk {
    /// Look the entity up in the registry by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::from_source(TypeSource::Named(name.into()))
    }

    pub fn entity(entity: Arc<EntityMetadata>) -> Self {
        Self::from_source(TypeSource::Entity(entity))
    }

    pub fn resolver<F>(f: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Arc<EntityMetadata>>> + Send + Sync + 'static,
    {
        Self::from_source(TypeSource::Resolver(Arc::new(f)))
    }

    fn from_source(source: TypeSource) -> Self {
        Self {
            source,
            resolved: Arc::new(OnceCell::new()),
        }
    }

    /// Resolve the entity. Concurrent callers wait for the same resolution.
    pub async fn resolve(&self, registry: &EntityRegistry) -> Result<Arc<EntityMetadata>> {
        let entity = self
            .resolved
            .get_or_try_init(|| async {
                match &self.source {
                    TypeSource::Named(name) => registry.require(name),
                    TypeSource::Entity(entity) => Ok(Arc::clone(entity)),
                    TypeSource::Resolver(f) => f().await,
                }
            })
            .await?;
        Ok(Arc::clone(entity))
    }
}

static NEXT_ASSOCIATION_ID: AtomicUsize = AtomicUsize::new(1);

/// One hop of an association chain. `source_key` is a property of the
/// owning entity, `target_key` a property of the target.
#[derive(Clone)]
pub struct AssociationNode {
    id: usize,
    pub target: TypeThunk,
    pub source_key: String,
    pub target_key: String,
    pub has_many: bool,
    /// Extra conditions on the target, written against target properties.
    pub conditions: Option<LogicalOperator>,
    pub next: Option<Arc<AssociationNode>>,
}

impl fmt::Debug for AssociationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationNode")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("source_key", &self.source_key)
            .field("target_key", &self.target_key)
            .field("has_many", &self.has_many)
            .field("next", &self.next)
            .finish()
    }
}

impl AssociationNode {
    fn new(target: TypeThunk, source_key: &str, target_key: &str, has_many: bool) -> Self {
        Self {
            id: NEXT_ASSOCIATION_ID.fetch_add(1, Ordering::Relaxed),
            target,
            source_key: source_key.to_string(),
            target_key: target_key.to_string(),
            has_many,
            conditions: None,
            next: None,
        }
    }

    pub fn to_one(target: TypeThunk, source_key: &str, target_key: &str) -> Self {
        Self::new(target, source_key, target_key, false)
    }

    pub fn to_many(target: TypeThunk, source_key: &str, target_key: &str) -> Self {
        Self::new(target, source_key, target_key, true)
    }

    pub fn with_conditions(mut self, conditions: LogicalOperator) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Append a hop at the end of the chain.
    pub fn then(mut self, next: AssociationNode) -> Self {
        self.next = Some(Arc::new(match self.next.take() {
            Some(existing) => (*existing).clone().then(next),
            None => next,
        }));
        self
    }

    /// Identity used to reuse joins; stable across clones.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn hops(&self) -> Vec<&AssociationNode> {
        let mut hops = vec![self];
        let mut node = self;
        while let Some(next) = node.next.as_deref() {
            hops.push(next);
            node = next;
        }
        hops
    }

    pub fn hop_count(&self) -> usize {
        self.hops().len()
    }

    /// True when any hop fans out.
    pub fn is_to_many(&self) -> bool {
        self.hops().iter().any(|h| h.has_many)
    }

    /// Entity at the end of the chain.
    pub async fn resolve_target(&self, registry: &EntityRegistry) -> Result<Arc<EntityMetadata>> {
        let last = self
            .hops()
            .last()
            .copied()
            .ok_or_else(|| Error::Resolve("empty association chain".into()))?;
        last.target.resolve(registry).await
    }
}
