/// Entity metadata and the compilers that turn entity-level requests into SQL.
///
/// ```text
/// EntityRegistry ── EntityMetadata ── AssociationNode / TypeThunk
///        │
/// QueryPlanner:  compile_filter   (joins, EXISTS sub-selects)
///                compile_sort     (to-one joins)
///                compile_projection → RowTransformModel
///        │
/// Repository:    execute, hydrate, deferred to-many fetches
/// ```
pub mod association;
pub mod filter;
pub mod metadata;
pub mod planner;
pub mod projection;
pub mod registry;
pub mod repository;
pub mod sort;
pub mod transform;

pub use association::{AssociationNode, EntityResolver, TypeThunk};
pub use filter::filter_from_json;
pub use metadata::{
    AssociationField, ColumnField, DataType, EmbeddedField, EntityBuilder, EntityMetadata,
    FieldMetadata, ValueTransform,
};
pub use planner::{QueryPlanner, DEFAULT_MAX_DEPTH};
pub use projection::Projection;
pub use registry::EntityRegistry;
pub use repository::{FindOptions, Repository, RepositoryOptions};
pub use transform::{DeferredFetch, RowNode, RowTransformModel};
