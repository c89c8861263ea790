/// Projection planner.
///
/// Turns a requested element list into select items, joins for eager
/// to-one relations, and the [`RowTransformModel`] that hydrates the rows.
/// Without an explicit request every non-hidden, non-exclusive column is
/// selected and relations are left out.
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::metadata::{EntityMetadata, FieldMetadata};
use super::planner::{join_chain, QueryPlanner, ScopeMut};
use super::transform::{DeferredFetch, RowTransformModel};
use crate::error::{Error, Result};

/// Requested elements. `+name` adds to the default columns, `-name` removes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub elements: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Projection {
    pub fn parse<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut projection = Projection::default();
        for item in items {
            let item = item.as_ref().trim();
            if let Some(name) = item.strip_prefix('+') {
                projection.include.push(name.to_string());
            } else if let Some(name) = item.strip_prefix('-') {
                projection.exclude.push(name.to_string());
            } else if !item.is_empty() {
                projection.elements.push(item.to_string());
            }
        }
        projection
    }

    pub fn is_default(&self) -> bool {
        self.elements.is_empty() && self.include.is_empty() && self.exclude.is_empty()
    }
}

/// Elements below `name.`, with the prefix stripped.
fn sub_elements(name: &str, elements: Option<&[String]>) -> Option<Vec<String>> {
    let prefix = format!("{}.", name);
    let out: Vec<String> = elements?
        .iter()
        .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
        .collect();
    (!out.is_empty()).then_some(out)
}

fn lowercase(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

/// Every requested element must start with a field of `entity`.
fn check_elements(entity: &EntityMetadata, owner: &str, items: Option<&[String]>) -> Result<()> {
    for item in items.unwrap_or_default() {
        let head = item.split('.').next().unwrap_or_default();
        if entity.field(head).is_none() {
            let path = if owner.is_empty() {
                item.clone()
            } else {
                format!("{}.{}", owner, item)
            };
            return Err(Error::UnknownElement {
                entity: entity.name.clone(),
                element: head.to_string(),
                path,
            });
        }
    }
    Ok(())
}

/// Column naming inside one table scope.
#[derive(Clone)]
struct Scope {
    alias: String,
    prefix: String,
    suffix: String,
    /// Property path from the root entity.
    path: String,
}

impl Scope {
    fn child(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path, name)
        }
    }
}

impl QueryPlanner {
    /// Add the select items for `projection` and return the hydration model.
    pub async fn compile_projection(&mut self, projection: &Projection) -> Result<RowTransformModel> {
        let mut request = (!projection.elements.is_empty()).then(|| lowercase(&projection.elements));
        if !projection.include.is_empty() {
            let request = request.get_or_insert_with(|| {
                self.entity
                    .columns()
                    .filter(|c| !c.hidden && !c.exclusive)
                    .map(|c| c.name.to_lowercase())
                    .collect()
            });
            for name in lowercase(&projection.include) {
                if !request.contains(&name) {
                    request.push(name);
                }
            }
        }
        if let Some(request) = &request {
            for element in request {
                if element.matches('.').count() > self.env.max_depth {
                    return Err(Error::PathTooDeep {
                        path: element.clone(),
                        max: self.env.max_depth,
                    });
                }
            }
        }
        let exclude = (!projection.exclude.is_empty()).then(|| lowercase(&projection.exclude));
        let scope = Scope {
            alias: self.alias.clone(),
            prefix: String::new(),
            suffix: String::new(),
            path: String::new(),
        };
        let entity = Arc::clone(&self.entity);
        self.add_elements(entity, scope, request, exclude, 0).await
    }

    fn add_elements(
        &mut self,
        entity: Arc<EntityMetadata>,
        scope: Scope,
        request: Option<Vec<String>>,
        exclude: Option<Vec<String>>,
        depth: usize,
    ) -> BoxFuture<'_, Result<RowTransformModel>> {
        async move {
            check_elements(&entity, &scope.path, request.as_deref())?;
            check_elements(&entity, &scope.path, exclude.as_deref())?;
            let mut model = RowTransformModel::new(Arc::clone(&entity));
            for element in &entity.fields {
                let name = element.name().to_lowercase();
                if exclude.as_ref().is_some_and(|e| e.contains(&name)) {
                    continue;
                }
                let dotted = format!("{}.", name);
                match &request {
                    None => {
                        let optional = match element {
                            FieldMetadata::Column(c) => c.exclusive,
                            FieldMetadata::Association(_) => true,
                            FieldMetadata::Embedded(_) => false,
                        };
                        if optional {
                            continue;
                        }
                    }
                    Some(request) => {
                        if !request.iter().any(|r| *r == name || r.starts_with(&dotted)) {
                            continue;
                        }
                    }
                }
                let sub_request = sub_elements(&name, request.as_deref());
                let sub_exclude = sub_elements(&name, exclude.as_deref());

                match element {
                    FieldMetadata::Column(column) => {
                        if sub_request.is_some() || sub_exclude.is_some() {
                            return Err(Error::invalid_path(
                                scope.child(element.name()),
                                "a column has no elements",
                            ));
                        }
                        if column.hidden {
                            continue;
                        }
                        let alias = self.select_column(&scope, &column.column);
                        model.add_leaf(column, alias);
                    }
                    FieldMetadata::Embedded(embedded) => {
                        let target = embedded.target.resolve(&self.env.registry).await?;
                        let mut inner = scope.clone();
                        inner.path = scope.child(element.name());
                        inner.prefix.push_str(embedded.prefix.as_deref().unwrap_or_default());
                        inner.suffix.insert_str(0, embedded.suffix.as_deref().unwrap_or_default());
                        let sub = self.add_elements(target, inner, sub_request, sub_exclude, depth).await?;
                        model.add_object(element.name(), sub);
                    }
                    FieldMetadata::Association(association) => {
                        let node = Arc::clone(&association.association);
                        if association.lazy {
                            // lazy resolution needs the key value on the row
                            let key = entity.require_column(&node.source_key)?;
                            let alias = self.select_column(&scope, &key.column);
                            model.add_leaf(key, alias);
                            continue;
                        }
                        if depth + node.hop_count() > self.env.max_depth {
                            return Err(Error::PathTooDeep {
                                path: element.name().to_string(),
                                max: self.env.max_depth,
                            });
                        }
                        if !node.is_to_many() {
                            let joins = ScopeMut {
                                joins: &mut self.joins,
                                keys: &mut self.keys,
                            };
                            let kind = self.env.join_kind;
                            let (alias, target) = join_chain(
                                &mut self.env,
                                joins,
                                &node,
                                &scope.alias,
                                Arc::clone(&entity),
                                kind,
                            )
                            .await?;
                            let inner = Scope {
                                alias,
                                prefix: String::new(),
                                suffix: String::new(),
                                path: scope.child(element.name()),
                            };
                            let sub = self
                                .add_elements(target, inner, sub_request, sub_exclude, depth + node.hop_count())
                                .await?;
                            model.add_object(element.name(), sub);
                            continue;
                        }
                        if node.next.is_some() {
                            return Err(Error::invalid_path(
                                element.name(),
                                "eager fetch of a multi-hop to-many association is not supported",
                            ));
                        }
                        let key = entity.require_column(&node.source_key)?;
                        let key_alias = self.select_column(&scope, &key.column);
                        model.add_leaf(key, key_alias.clone());
                        let target = node.target.resolve(&self.env.registry).await?;
                        target.require_column(&node.target_key)?;
                        let owner = scope.child(element.name());
                        check_elements(&target, &owner, sub_request.as_deref())?;
                        check_elements(&target, &owner, sub_exclude.as_deref())?;
                        let mut projection = Projection {
                            elements: sub_request.unwrap_or_default(),
                            include: Vec::new(),
                            exclude: sub_exclude.unwrap_or_default(),
                        };
                        if projection.elements.is_empty() {
                            projection.include.push(node.target_key.clone());
                        } else {
                            projection.elements.push(node.target_key.clone());
                        }
                        model.add_deferred(DeferredFetch {
                            property: element.name().to_string(),
                            source_key: key.name.clone(),
                            key_alias,
                            target,
                            target_key: node.target_key.clone(),
                            conditions: node.conditions.clone(),
                            projection,
                        });
                    }
                }
            }
            Ok(model)
        }
        .boxed()
    }

    /// Select `alias.column` under a unique `alias_column` name.
    fn select_column(&mut self, scope: &Scope, column: &str) -> String {
        let physical = format!("{}{}{}", scope.prefix, column, scope.suffix);
        let alias = format!("{}_{}", scope.alias, physical);
        self.add_column(format!("{}.{}", scope.alias, physical), alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::operators::LogicalOperator;
    use crate::ast::{GenerateOptions, SqlNode};
    use crate::orm::testing::fixture;
    use crate::orm::transform::RowNode;
    use pretty_assertions::assert_eq;

    async fn plan(entity: &str, items: &[&str]) -> (String, RowTransformModel) {
        let fx = fixture();
        let mut planner = QueryPlanner::new(Arc::clone(&fx.registry), fx.entity(entity));
        let model = planner.compile_projection(&Projection::parse(items)).await.unwrap();
        let sql = planner
            .into_select(LogicalOperator::and(), Vec::new())
            .generate(&GenerateOptions::new().pretty_print(false))
            .unwrap()
            .sql;
        (sql, model)
    }

    #[test]
    fn test_parse() {
        let p = Projection::parse(["code", "+continent", "-name", " "]);
        assert_eq!(p.elements, vec!["code"]);
        assert_eq!(p.include, vec!["continent"]);
        assert_eq!(p.exclude, vec!["name"]);
        assert!(Projection::parse(Vec::<String>::new()).is_default());
    }

    #[tokio::test]
    async fn test_default_projection() {
        let (sql, model) = plan("Country", &[]).await;
        assert_eq!(
            sql,
            "select countries.code as countries_code, countries.name as countries_name, countries.continent_code as countries_continent_code from countries"
        );
        assert_eq!(model.nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_include_to_one_relation() {
        let (sql, model) = plan("Country", &["+continent", "-name"]).await;
        assert_eq!(
            sql,
            "select countries.code as countries_code, countries.continent_code as countries_continent_code, continents.code as continents_code, continents.name as continents_name from countries left outer join continents on continents.code = countries.continent_code"
        );
        assert!(matches!(&model.nodes[2], RowNode::Object { property, .. } if property == "continent"));
    }

    #[tokio::test]
    async fn test_requested_sub_elements() {
        let (sql, _) = plan("Country", &["code", "continent.name"]).await;
        assert_eq!(
            sql,
            "select countries.code as countries_code, continents.name as continents_name from countries left outer join continents on continents.code = countries.continent_code"
        );
    }

    #[tokio::test]
    async fn test_to_many_is_deferred() {
        let (sql, model) = plan("Country", &["code", "customers.givenName"]).await;
        assert_eq!(sql, "select countries.code as countries_code from countries");
        let deferred = model.deferred();
        assert_eq!(deferred.len(), 1);
        let fetch = deferred[0].1;
        assert_eq!(fetch.key_alias, "countries_code");
        assert_eq!(fetch.target.name, "Customer");
        assert_eq!(fetch.projection.elements, vec!["givenname", "countryCode"]);
    }

    #[tokio::test]
    async fn test_embedded_and_hidden() {
        let (sql, model) = plan("Customer", &[]).await;
        assert!(sql.contains("customers.addr_city as customers_addr_city"));
        assert!(!sql.contains("password"));
        assert!(!sql.contains("notes"));
        assert!(model
            .nodes
            .iter()
            .any(|n| matches!(n, RowNode::Object { property, .. } if property == "address")));
    }

    #[tokio::test]
    async fn test_exclusive_when_requested() {
        let (sql, _) = plan("Customer", &["+notes"]).await;
        assert!(sql.contains("customers.notes as customers_notes"));
    }

    #[tokio::test]
    async fn test_lazy_relation_adds_key() {
        let (sql, model) = plan("Customer", &["id", "country"]).await;
        assert_eq!(
            sql,
            "select customers.id as customers_id, customers.country_code as customers_country_code from customers"
        );
        assert!(model.has_leaf("countryCode"));
    }

    #[tokio::test]
    async fn test_colliding_aliases_get_suffix() {
        use crate::orm::{AssociationNode, ColumnField, EntityRegistry, TypeThunk};

        let order = EntityMetadata::builder("Order")
            .table("orders")
            .column(ColumnField::new("id").primary_key())
            .column(ColumnField::new("itemId").column("item_id"))
            .association(
                "item",
                AssociationNode::to_one(TypeThunk::named("OrderItem"), "itemId", "id"),
            )
            .build()
            .unwrap();
        let item = EntityMetadata::builder("OrderItem")
            .table("orders_item")
            .column(ColumnField::new("id").primary_key())
            .build()
            .unwrap();
        let mut registry = EntityRegistry::new();
        registry.register(Arc::new(order)).unwrap();
        registry.register(Arc::new(item)).unwrap();
        let registry = Arc::new(registry);

        let root = registry.get("Order").unwrap();
        let mut planner = QueryPlanner::new(Arc::clone(&registry), root);
        let model = planner
            .compile_projection(&Projection::parse(["itemId", "item.id"]))
            .await
            .unwrap();
        let sql = planner
            .into_select(LogicalOperator::and(), Vec::new())
            .generate(&GenerateOptions::new().pretty_print(false))
            .unwrap()
            .sql;
        assert_eq!(
            sql,
            "select orders.item_id as orders_item_id, orders_item.id as orders_item_id_1 from orders left outer join orders_item on orders_item.id = orders.item_id"
        );

        let rows = model
            .hydrate(
                &["orders_item_id".to_string(), "orders_item_id_1".to_string()],
                &[vec!["a".into(), "b".into()]],
                false,
            )
            .unwrap();
        assert_eq!(rows[0]["itemId"], serde_json::json!("a"));
        assert_eq!(rows[0]["item"]["id"], serde_json::json!("b"));
    }

    #[tokio::test]
    async fn test_same_column_selected_once() {
        let (sql, _) = plan("Customer", &["countryCode", "country"]).await;
        assert_eq!(
            sql,
            "select customers.country_code as customers_country_code from customers"
        );
    }

    #[tokio::test]
    async fn test_unknown_elements() {
        let fx = fixture();
        for (items, element, path) in [
            (vec!["nmae"], "nmae", "nmae"),
            (vec!["code", "continent.*"], "*", "continent.*"),
            (vec!["-nmae"], "nmae", "nmae"),
            (vec!["code", "customers.age"], "age", "customers.age"),
        ] {
            let mut planner = QueryPlanner::new(Arc::clone(&fx.registry), fx.entity("Country"));
            let err = planner.compile_projection(&Projection::parse(items)).await;
            match err {
                Err(Error::UnknownElement {
                    element: e, path: p, ..
                }) => {
                    assert_eq!(e, element);
                    assert_eq!(p, path);
                }
                other => panic!("expected UnknownElement, got {:?}", other.map(|_| ())),
            }
        }

        let mut planner = QueryPlanner::new(Arc::clone(&fx.registry), fx.entity("Country"));
        let err = planner.compile_projection(&Projection::parse(["code.x"])).await;
        assert!(matches!(err, Err(Error::InvalidFilterPath { .. })));
    }

    #[tokio::test]
    async fn test_request_too_deep() {
        let fx = fixture();
        let mut planner =
            QueryPlanner::new(Arc::clone(&fx.registry), fx.entity("Country")).max_depth(1);
        let err = planner
            .compile_projection(&Projection::parse(["continent.countries.code"]))
            .await;
        assert!(matches!(err, Err(Error::PathTooDeep { .. })));
    }
}
