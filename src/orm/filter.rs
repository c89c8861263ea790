/// Entity filter compiler.
///
/// Rewrites a condition tree written against entity property paths
/// (`continent.code`, `customers.countryCode`) into one that references
/// physical columns only. To-one hops become joins on the root query,
/// to-many hops become correlated `exists` sub-selects. The and/or shape of
/// the input is kept as is.
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::debug;

use super::association::AssociationNode;
use super::metadata::{EntityMetadata, FieldMetadata};
use super::planner::{
    check_depth, correlation, entity_table, join_chain, qualify_conditions, JoinKey, PlanEnv,
    QueryPlanner, ScopeMut,
};
use crate::ast::operators::{op, ComparisonOperator, LogicalKind, LogicalOperator, Operator};
use crate::ast::query::{Join, JoinKind, SelectQuery};
use crate::ast::types::{field, raw, Expression, SelectColumn, TableRef, Value};
use crate::error::{Error, Result};

/// An EXISTS sub-select being assembled inside one logical group.
#[derive(Debug)]
struct ExistsState {
    association_id: usize,
    parent_alias: String,
    /// Position of the placeholder in the owning group.
    item_index: usize,
    table: TableRef,
    /// Alias and entity the remaining path segments are resolved against.
    alias: String,
    entity: Arc<EntityMetadata>,
    joins: Vec<Join>,
    keys: Vec<JoinKey>,
    filter: LogicalOperator,
    inner: GroupState,
}

#[derive(Debug, Default)]
struct GroupState {
    exists: Vec<ExistsState>,
    /// Sub-selects before this index sit behind an `or` and are not shared.
    shared_from: usize,
}

/// Where a compiled leaf goes.
struct Sink<'a> {
    out: &'a mut LogicalOperator,
    state: &'a mut GroupState,
    connective: LogicalKind,
}

/// Entity and alias a path walk starts from.
struct Position {
    entity: Arc<EntityMetadata>,
    alias: String,
    hops: usize,
}

/// Build an implicit conjunction from a JSON object of `"path op": value` pairs.
pub fn filter_from_json(json: &serde_json::Value) -> Result<LogicalOperator> {
    let serde_json::Value::Object(map) = json else {
        return Err(Error::invalid_argument("filter must be a JSON object"));
    };
    LogicalOperator::from_pairs(map.iter().map(|(k, v)| (k.as_str(), Value::from_json(v))))
}

impl QueryPlanner {
    /// Compile a filter against the root entity. Joins land on this planner.
    pub async fn compile_filter(&mut self, filter: &LogicalOperator) -> Result<LogicalOperator> {
        let mut out = LogicalOperator::new(filter.kind);
        let at = Position {
            entity: Arc::clone(&self.entity),
            alias: self.alias.clone(),
            hops: 0,
        };
        let scope = ScopeMut {
            joins: &mut self.joins,
            keys: &mut self.keys,
        };
        compile_group(&mut self.env, scope, at, filter, &mut out).await?;
        Ok(out)
    }
}

fn compile_group<'a>(
    env: &'a mut PlanEnv,
    mut scope: ScopeMut<'a>,
    at: Position,
    input: &'a LogicalOperator,
    out: &'a mut LogicalOperator,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let mut state = GroupState::default();
        for item in &input.items {
            if item.connective == LogicalKind::Or {
                state.shared_from = state.exists.len();
            }
            match &item.operator {
                Operator::Raw(sql) => {
                    out.push_with(item.connective, Operator::Raw(sql.clone()));
                }
                Operator::Logical(group) => {
                    let mut sub = LogicalOperator::new(group.kind);
                    let sub_at = Position {
                        entity: Arc::clone(&at.entity),
                        alias: at.alias.clone(),
                        hops: at.hops,
                    };
                    compile_group(env, scope.reborrow(), sub_at, group, &mut sub).await?;
                    if !sub.is_empty() {
                        out.push_with(item.connective, sub);
                    }
                }
                Operator::Comparison(c) => match &c.left {
                    Expression::Field(path) => {
                        let segments: Vec<&str> = path.split('.').collect();
                        let leaf_at = Position {
                            entity: Arc::clone(&at.entity),
                            alias: at.alias.clone(),
                            hops: at.hops,
                        };
                        let sink = Sink {
                            out: &mut *out,
                            state: &mut state,
                            connective: item.connective,
                        };
                        compile_path(env, scope.reborrow(), leaf_at, path, &segments, c, sink).await?;
                    }
                    _ => {
                        out.push_with(item.connective, c.clone());
                    }
                },
            }
        }
        finalize(out, state);
        Ok(())
    }
    .boxed()
}

/// Replace EXISTS placeholders with the assembled sub-selects.
fn finalize(out: &mut LogicalOperator, state: GroupState) {
    for mut ex in state.exists {
        finalize(&mut ex.filter, std::mem::take(&mut ex.inner));
        let query = SelectQuery {
            columns: vec![SelectColumn::from(raw("1"))],
            from: vec![ex.table],
            joins: ex.joins,
            filter: ex.filter,
            ..SelectQuery::default()
        };
        if let Some(item) = out.items.get_mut(ex.item_index) {
            item.operator = op::exists(query);
        }
    }
}

fn compile_path<'a>(
    env: &'a mut PlanEnv,
    mut scope: ScopeMut<'a>,
    at: Position,
    path: &'a str,
    segments: &'a [&'a str],
    comparison: &'a ComparisonOperator,
    sink: Sink<'a>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let Position {
            mut entity,
            mut alias,
            mut hops,
        } = at;
        let mut prefix = String::new();
        let mut suffix = String::new();

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let element = entity.field(segment).ok_or_else(|| Error::UnknownElement {
                entity: entity.name.clone(),
                element: segment.to_string(),
                path: path.to_string(),
            })?;
            match element {
                FieldMetadata::Column(column) => {
                    if !last {
                        return Err(Error::invalid_path(
                            path,
                            format!("`{}` is a column and has no elements", segment),
                        ));
                    }
                    let left = field(format!("{}.{}{}{}", alias, prefix, column.column, suffix));
                    sink.out.push_with(sink.connective, comparison.with_left(left));
                    return Ok(());
                }
                FieldMetadata::Embedded(embedded) => {
                    if last {
                        return Err(Error::invalid_path(
                            path,
                            format!("`{}` is an embedded object, not a column", segment),
                        ));
                    }
                    let target = embedded.target.resolve(&env.registry).await?;
                    prefix.push_str(embedded.prefix.as_deref().unwrap_or_default());
                    suffix.insert_str(0, embedded.suffix.as_deref().unwrap_or_default());
                    entity = target;
                }
                FieldMetadata::Association(association) => {
                    if last {
                        return Err(Error::invalid_path(
                            path,
                            format!("`{}` is an association; filter on one of its elements", segment),
                        ));
                    }
                    let node = Arc::clone(&association.association);
                    hops += node.hop_count();
                    check_depth(path, hops, env.max_depth)?;
                    if node.is_to_many() {
                        let at = Position {
                            entity: Arc::clone(&entity),
                            alias,
                            hops,
                        };
                        return compile_exists(env, at, &node, path, &segments[i + 1..], comparison, sink)
                            .await;
                    }
                    let kind = env.join_kind;
                    let (next_alias, target) =
                        join_chain(env, scope.reborrow(), &node, &alias, Arc::clone(&entity), kind).await?;
                    alias = next_alias;
                    entity = target;
                    prefix.clear();
                    suffix.clear();
                }
            }
        }
        Err(Error::invalid_path(path, "path is empty"))
    }
    .boxed()
}

/// Route the rest of a path into a correlated EXISTS sub-select.
///
/// Within an `and` group, paths through the same association from the same
/// alias share one sub-select as long as no `or` connective separates the
/// two leaves. Otherwise each leaf gets its own.
async fn compile_exists(
    env: &mut PlanEnv,
    at: Position,
    node: &AssociationNode,
    path: &str,
    rest: &[&str],
    comparison: &ComparisonOperator,
    sink: Sink<'_>,
) -> Result<()> {
    let Sink {
        out,
        state,
        connective,
    } = sink;
    let reusable = out.kind == LogicalKind::And && connective == LogicalKind::And;
    let existing = if reusable {
        let from = state.shared_from;
        state.exists[from..]
            .iter()
            .position(|e| e.association_id == node.id() && e.parent_alias == at.alias)
            .map(|i| i + from)
    } else {
        None
    };

    let index = match existing {
        Some(index) => index,
        None => {
            let target = node.target.resolve(&env.registry).await?;
            let alias = env.aliases.allocate(&target.table_name);
            let mut filter = LogicalOperator::and();
            filter.push(correlation(node, &at.entity, &at.alias, &target, &alias)?);
            if let Some(conditions) = &node.conditions {
                let qualified = qualify_conditions(conditions, &alias, &target)?;
                if !qualified.is_empty() {
                    filter.push(qualified);
                }
            }
            let mut joins = Vec::new();
            let mut keys = Vec::new();
            let (tail_alias, tail_entity) = match &node.next {
                Some(next) => {
                    let scope = ScopeMut {
                        joins: &mut joins,
                        keys: &mut keys,
                    };
                    join_chain(env, scope, next, &alias, Arc::clone(&target), JoinKind::Inner).await?
                }
                None => (alias.clone(), Arc::clone(&target)),
            };
            debug!(
                table = %target.table_name,
                alias = %alias,
                parent = %at.alias,
                "planned exists sub-select"
            );
            out.push_with(connective, Operator::Raw(String::new()));
            state.exists.push(ExistsState {
                association_id: node.id(),
                parent_alias: at.alias.clone(),
                item_index: out.len() - 1,
                table: entity_table(&target, &alias),
                alias: tail_alias,
                entity: tail_entity,
                joins,
                keys,
                filter,
                inner: GroupState::default(),
            });
            state.exists.len() - 1
        }
    };

    let ExistsState {
        alias,
        entity,
        joins,
        keys,
        filter,
        inner,
        ..
    } = &mut state.exists[index];
    let inner_at = Position {
        entity: Arc::clone(entity),
        alias: alias.clone(),
        hops: at.hops,
    };
    let scope = ScopeMut { joins, keys };
    let sink = Sink {
        out: filter,
        state: inner,
        connective: LogicalKind::And,
    };
    compile_path(env, scope, inner_at, path, rest, comparison, sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::operators::GroupItem;
    use crate::ast::{GenerateOptions, SqlNode};
    use crate::orm::testing::{fixture, Fixture};
    use pretty_assertions::assert_eq;

    fn flat() -> GenerateOptions {
        GenerateOptions::new().pretty_print(false)
    }

    async fn compile(fx: &Fixture, entity: &str, filter: LogicalOperator) -> Result<String> {
        let mut planner = QueryPlanner::new(Arc::clone(&fx.registry), fx.entity(entity));
        let filter = planner.compile_filter(&filter).await?;
        let select = planner.into_select(filter, Vec::new());
        Ok(select.generate(&flat())?.sql)
    }

    fn pairs(items: &[(&str, Value)]) -> LogicalOperator {
        LogicalOperator::from_pairs(items.iter().map(|(k, v)| (*k, v.clone()))).unwrap()
    }

    #[tokio::test]
    async fn test_to_one_path_joins() {
        let fx = fixture();
        let sql = compile(&fx, "Country", pairs(&[("continent.code", "AM".into())]))
            .await
            .unwrap();
        assert_eq!(
            sql,
            "select * from countries left outer join continents on continents.code = countries.continent_code where continents.code = 'AM'"
        );
    }

    #[tokio::test]
    async fn test_to_many_path_uses_exists() {
        let fx = fixture();
        let sql = compile(&fx, "Country", pairs(&[("customers.countryCode", "DE".into())]))
            .await
            .unwrap();
        assert_eq!(
            sql,
            "select * from countries where exists (select 1 from customers where customers.country_code = countries.code and customers.country_code = 'DE')"
        );
        assert!(!sql.contains("join"));
    }

    #[tokio::test]
    async fn test_join_reused_across_leaves() {
        let fx = fixture();
        let filter = LogicalOperator::and()
            .with([
                op::eq("continent.code", "AM"),
                op::ne("continent.name", "x"),
                op::eq("name", "Peru"),
            ])
            .unwrap();
        let sql = compile(&fx, "Country", filter).await.unwrap();
        assert_eq!(sql.matches("join").count(), 1);
        assert!(sql.ends_with(
            "where continents.code = 'AM' and continents.name != 'x' and countries.name = 'Peru'"
        ));
    }

    #[tokio::test]
    async fn test_exists_shared_in_and_group() {
        let fx = fixture();
        let filter = LogicalOperator::and()
            .with([
                op::eq("customers.countryCode", "DE"),
                op::like("customers.givenName", "A%"),
            ])
            .unwrap();
        let sql = compile(&fx, "Country", filter).await.unwrap();
        assert_eq!(
            sql,
            "select * from countries where exists (select 1 from customers where customers.country_code = countries.code and customers.country_code = 'DE' and customers.given_name like 'A%')"
        );
    }

    #[tokio::test]
    async fn test_or_shape_preserved() {
        let fx = fixture();
        let filter = LogicalOperator::and()
            .with([
                GroupItem::from(op::eq("code", "DE")),
                GroupItem::Group(vec![
                    op::eq("continent.code", "EU").into(),
                    LogicalKind::Or.into(),
                    op::eq("customers.givenName", "Ann").into(),
                ]),
            ])
            .unwrap();
        let sql = compile(&fx, "Country", filter).await.unwrap();
        assert!(sql.ends_with(
            "where countries.code = 'DE' and (continents.code = 'EU' or exists (select 1 from customers where customers.country_code = countries.code and customers.given_name = 'Ann'))"
        ), "{}", sql);
    }

    #[tokio::test]
    async fn test_exists_not_shared_under_or() {
        let fx = fixture();
        let filter = LogicalOperator::or()
            .with([
                op::eq("customers.givenName", "Ann"),
                op::eq("customers.givenName", "Bob"),
            ])
            .unwrap();
        let sql = compile(&fx, "Country", filter).await.unwrap();
        assert_eq!(sql.matches("exists").count(), 2);
        assert!(sql.contains(
            "exists (select 1 from customers customers_1 where customers_1.country_code = countries.code and customers_1.given_name = 'Bob')"
        ));
    }

    #[tokio::test]
    async fn test_exists_not_shared_across_or_connective() {
        let fx = fixture();
        let filter = LogicalOperator::and()
            .with([
                GroupItem::from(op::eq("customers.givenName", "Ann")),
                LogicalKind::Or.into(),
                op::eq("name", "Peru").into(),
                LogicalKind::And.into(),
                op::eq("customers.countryCode", "DE").into(),
            ])
            .unwrap();
        let sql = compile(&fx, "Country", filter).await.unwrap();
        assert_eq!(
            sql,
            "select * from countries where exists (select 1 from customers where customers.country_code = countries.code and customers.given_name = 'Ann') or countries.name = 'Peru' and exists (select 1 from customers customers_1 where customers_1.country_code = countries.code and customers_1.country_code = 'DE')"
        );
    }

    #[tokio::test]
    async fn test_exists_shared_after_or_within_and_run() {
        let fx = fixture();
        let filter = LogicalOperator::and()
            .with([
                GroupItem::from(op::eq("name", "Peru")),
                LogicalKind::Or.into(),
                op::eq("customers.givenName", "Ann").into(),
                LogicalKind::And.into(),
                op::eq("customers.countryCode", "DE").into(),
            ])
            .unwrap();
        let sql = compile(&fx, "Country", filter).await.unwrap();
        assert_eq!(
            sql,
            "select * from countries where countries.name = 'Peru' or exists (select 1 from customers where customers.country_code = countries.code and customers.given_name = 'Ann' and customers.country_code = 'DE')"
        );
    }

    #[tokio::test]
    async fn test_embedded_prefix() {
        let fx = fixture();
        let sql = compile(&fx, "Customer", pairs(&[("address.city", "Berlin".into())]))
            .await
            .unwrap();
        assert_eq!(sql, "select * from customers where customers.addr_city = 'Berlin'");
    }

    #[tokio::test]
    async fn test_multi_hop_chain() {
        let fx = fixture();
        let sql = compile(&fx, "Customer", pairs(&[("continent.code", "EU".into())]))
            .await
            .unwrap();
        assert_eq!(
            sql,
            "select * from customers left outer join countries on countries.code = customers.country_code left outer join continents on continents.code = countries.continent_code where continents.code = 'EU'"
        );
    }

    #[tokio::test]
    async fn test_path_errors() {
        let fx = fixture();
        let err = compile(&fx, "Country", pairs(&[("planet.code", "x".into())])).await;
        assert!(matches!(err, Err(Error::UnknownElement { ref element, .. }) if element == "planet"));

        let err = compile(&fx, "Country", pairs(&[("name.first", "x".into())])).await;
        assert!(matches!(err, Err(Error::InvalidFilterPath { .. })));

        let err = compile(&fx, "Country", pairs(&[("continent", "x".into())])).await;
        assert!(matches!(err, Err(Error::InvalidFilterPath { .. })));
    }

    #[tokio::test]
    async fn test_path_too_deep() {
        let fx = fixture();
        let mut planner =
            QueryPlanner::new(Arc::clone(&fx.registry), fx.entity("Customer")).max_depth(1);
        let err = planner
            .compile_filter(&pairs(&[("continent.code", "EU".into())]))
            .await;
        assert!(matches!(err, Err(Error::PathTooDeep { max: 1, .. })));
    }

    #[tokio::test]
    async fn test_operator_variant_kept() {
        let fx = fixture();
        let filter = LogicalOperator::and()
            .with([op::in_("continent.code", vec!["EU", "AM"])])
            .unwrap();
        let sql = compile(&fx, "Country", filter).await.unwrap();
        assert!(sql.ends_with("where continents.code in ('EU','AM')"));
    }

    #[test]
    fn test_filter_from_json() {
        let filter = filter_from_json(&serde_json::json!({"continent.code": "AM", "code in": ["DE", "FR"]})).unwrap();
        assert_eq!(filter.len(), 2);
        assert!(filter_from_json(&serde_json::json!([1])).is_err());
    }
}
