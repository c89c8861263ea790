/// Join planning shared by the filter, sort and projection compilers.
///
/// A [`QueryPlanner`] owns the joins of one root query. Joins are keyed on
/// (association hop, parent alias) so every path that walks the same hop
/// from the same table reuses a single join.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::association::AssociationNode;
use super::metadata::EntityMetadata;
use super::registry::EntityRegistry;
use crate::ast::operators::{op, LogicalOperator, Operator};
use crate::ast::query::{Join, JoinKind, SelectQuery};
use crate::ast::types::{field, Expression, OrderColumn, SelectColumn, TableRef};
use crate::error::{Error, Result};

/// Relation depth used when the caller does not set one.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Hands out table aliases: the table name first, then `name_1`, `name_2`...
#[derive(Debug, Clone, Default)]
pub struct AliasAllocator {
    used: HashSet<String>,
}

impl AliasAllocator {
    pub fn new(root: &str) -> Self {
        let mut used = HashSet::new();
        used.insert(root.to_lowercase());
        Self { used }
    }

    pub fn allocate(&mut self, table: &str) -> String {
        if self.used.insert(table.to_lowercase()) {
            return table.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", table, n);
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Settings and alias state shared across one planning run.
#[derive(Debug, Clone)]
pub struct PlanEnv {
    pub registry: Arc<EntityRegistry>,
    pub aliases: AliasAllocator,
    pub max_depth: usize,
    /// Join kind for to-one hops.
    pub join_kind: JoinKind,
}

/// A join already planned in some scope.
#[derive(Debug, Clone)]
pub struct JoinKey {
    pub association_id: usize,
    pub parent_alias: String,
    pub alias: String,
    pub target: Arc<EntityMetadata>,
}

/// Join list a path walk appends to: the root query or an EXISTS sub-select.
pub struct ScopeMut<'a> {
    pub joins: &'a mut Vec<Join>,
    pub keys: &'a mut Vec<JoinKey>,
}

impl<'a> ScopeMut<'a> {
    pub fn reborrow(&mut self) -> ScopeMut<'_> {
        ScopeMut {
            joins: &mut *self.joins,
            keys: &mut *self.keys,
        }
    }
}

/// Table reference for an entity; the alias is omitted when it equals the table name.
pub fn entity_table(entity: &EntityMetadata, alias: &str) -> TableRef {
    TableRef::Table {
        schema: entity.schema.clone(),
        name: entity.table_name.clone(),
        alias: (alias != entity.table_name).then(|| alias.to_string()),
    }
}

/// `alias.target_key = parent.source_key` for one hop.
pub fn correlation(
    hop: &AssociationNode,
    source: &EntityMetadata,
    parent_alias: &str,
    target: &EntityMetadata,
    alias: &str,
) -> Result<Operator> {
    let source_col = &source.require_column(&hop.source_key)?.column;
    let target_col = &target.require_column(&hop.target_key)?.column;
    Ok(op::eq(
        format!("{}.{}", alias, target_col),
        field(format!("{}.{}", parent_alias, source_col)),
    ))
}

/// Rewrite association conditions written against target properties so
/// they reference `alias.column`.
pub fn qualify_conditions(
    conditions: &LogicalOperator,
    alias: &str,
    entity: &EntityMetadata,
) -> Result<LogicalOperator> {
    let mut out = LogicalOperator::new(conditions.kind);
    for item in &conditions.items {
        let operator = match &item.operator {
            Operator::Comparison(c) => match &c.left {
                Expression::Field(name) if !name.contains('.') => {
                    let column = entity.require_column(name)?;
                    Operator::Comparison(c.with_left(field(format!("{}.{}", alias, column.column))))
                }
                _ => Operator::Comparison(c.clone()),
            },
            Operator::Logical(group) => Operator::Logical(qualify_conditions(group, alias, entity)?),
            Operator::Raw(sql) => Operator::Raw(sql.clone()),
        };
        out.push_with(item.connective, operator);
    }
    Ok(out)
}

/// Walk every hop of `node` with joins of `kind`, reusing joins already in
/// `scope`. Returns the alias and entity of the last hop.
pub async fn join_chain(
    env: &mut PlanEnv,
    scope: ScopeMut<'_>,
    node: &AssociationNode,
    parent_alias: &str,
    source: Arc<EntityMetadata>,
    kind: JoinKind,
) -> Result<(String, Arc<EntityMetadata>)> {
    let mut alias = parent_alias.to_string();
    let mut entity = source;
    for hop in node.hops() {
        if let Some(key) = scope
            .keys
            .iter()
            .find(|k| k.association_id == hop.id() && k.parent_alias == alias)
        {
            alias = key.alias.clone();
            entity = Arc::clone(&key.target);
            continue;
        }

        let target = hop.target.resolve(&env.registry).await?;
        let join_alias = env.aliases.allocate(&target.table_name);
        let mut join = Join::new(kind, entity_table(&target, &join_alias))?
            .on(correlation(hop, &entity, &alias, &target, &join_alias)?);
        if let Some(conditions) = &hop.conditions {
            let qualified = qualify_conditions(conditions, &join_alias, &target)?;
            if !qualified.is_empty() {
                join = join.on(qualified);
            }
        }
        debug!(
            table = %target.table_name,
            alias = %join_alias,
            parent = %alias,
            "planned join"
        );
        scope.joins.push(join);
        scope.keys.push(JoinKey {
            association_id: hop.id(),
            parent_alias: alias,
            alias: join_alias.clone(),
            target: Arc::clone(&target),
        });
        alias = join_alias;
        entity = target;
    }
    Ok((alias, entity))
}

/// Planning state of one root query.
#[derive(Debug)]
pub struct QueryPlanner {
    pub(crate) env: PlanEnv,
    pub(crate) entity: Arc<EntityMetadata>,
    pub(crate) alias: String,
    pub(crate) joins: Vec<Join>,
    pub(crate) keys: Vec<JoinKey>,
    pub(crate) columns: Vec<SelectColumn>,
    pub(crate) column_aliases: HashMap<String, String>,
}

impl QueryPlanner {
    pub fn new(registry: Arc<EntityRegistry>, entity: Arc<EntityMetadata>) -> Self {
        let alias = entity.table_name.clone();
        Self {
            env: PlanEnv {
                registry,
                aliases: AliasAllocator::new(&alias),
                max_depth: DEFAULT_MAX_DEPTH,
                join_kind: JoinKind::LeftOuter,
            },
            entity,
            alias,
            joins: Vec::new(),
            keys: Vec::new(),
            columns: Vec::new(),
            column_aliases: HashMap::new(),
        }
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.env.max_depth = max_depth;
        self
    }

    /// Join kind for to-one hops; `Inner` demands the related row exists.
    pub fn join_kind(mut self, kind: JoinKind) -> Self {
        self.env.join_kind = kind;
        self
    }

    pub fn entity(&self) -> &Arc<EntityMetadata> {
        &self.entity
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Add `expr as alias` to the select list once and return the alias in use.
    /// An alias already taken by another expression gets a numeric suffix.
    pub(crate) fn add_column(&mut self, expr: String, alias: String) -> String {
        let mut candidate = alias.clone();
        let mut n = 0;
        loop {
            match self.column_aliases.get(&candidate.to_lowercase()) {
                Some(existing) if *existing == expr => return candidate,
                Some(_) => {
                    n += 1;
                    candidate = format!("{}_{}", alias, n);
                }
                None => break,
            }
        }
        self.column_aliases.insert(candidate.to_lowercase(), expr.clone());
        self.columns.push(SelectColumn {
            expr: field(expr),
            alias: Some(candidate.clone()),
        });
        candidate
    }

    /// Assemble the root select from everything planned so far.
    pub fn into_select(self, filter: LogicalOperator, order_by: Vec<OrderColumn>) -> SelectQuery {
        SelectQuery {
            columns: self.columns,
            from: vec![entity_table(&self.entity, &self.alias)],
            joins: self.joins,
            filter,
            order_by,
            ..SelectQuery::default()
        }
    }
}

/// Fail when a walk has crossed more than `max` association hops.
pub fn check_depth(path: &str, hops: usize, max: usize) -> Result<()> {
    if hops > max {
        return Err(Error::PathTooDeep {
            path: path.to_string(),
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GenerateOptions, SqlNode};
    use crate::orm::association::TypeThunk;
    use crate::orm::metadata::ColumnField;

    #[test]
    fn test_alias_allocator() {
        let mut aliases = AliasAllocator::new("countries");
        assert_eq!(aliases.allocate("continents"), "continents");
        assert_eq!(aliases.allocate("countries"), "countries_1");
        assert_eq!(aliases.allocate("countries"), "countries_2");
    }

    #[tokio::test]
    async fn test_join_chain_reuses_hops() {
        let mut registry = EntityRegistry::new();
        let continent = Arc::new(
            EntityMetadata::builder("Continent")
                .table("continents")
                .column(ColumnField::new("code").primary_key())
                .column(ColumnField::new("active"))
                .build()
                .unwrap(),
        );
        let country = Arc::new(
            EntityMetadata::builder("Country")
                .table("countries")
                .column(ColumnField::new("code").primary_key())
                .column(ColumnField::new("continentCode"))
                .build()
                .unwrap(),
        );
        registry.register(Arc::clone(&continent)).unwrap();
        let hop = AssociationNode::to_one(TypeThunk::named("Continent"), "continentCode", "code")
            .with_conditions(LogicalOperator::and().with([op::eq("active", true)]).unwrap());

        let mut planner = QueryPlanner::new(Arc::new(registry), country);
        for _ in 0..2 {
            let entity = Arc::clone(&planner.entity);
            let scope = ScopeMut {
                joins: &mut planner.joins,
                keys: &mut planner.keys,
            };
            let (alias, target) = join_chain(
                &mut planner.env,
                scope,
                &hop,
                "countries",
                entity,
                JoinKind::LeftOuter,
            )
            .await
            .unwrap();
            assert_eq!(alias, "continents");
            assert_eq!(target.name, "Continent");
        }
        assert_eq!(planner.joins().len(), 1);
        let sql = planner.joins()[0]
            .generate(&GenerateOptions::new().pretty_print(false))
            .unwrap()
            .sql;
        assert_eq!(
            sql,
            "left outer join continents on continents.code = countries.continent_code and continents.active = true"
        );
    }

    #[test]
    fn test_check_depth() {
        assert!(check_depth("a.b", 2, 5).is_ok());
        assert!(matches!(
            check_depth("a.b.c", 3, 2),
            Err(Error::PathTooDeep { max: 2, .. })
        ));
    }
}
