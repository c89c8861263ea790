/// Sort key resolution.
///
/// `"+name"`, `"-continent.code"`: the path walks embedded objects and
/// to-one associations (joined on the root query, sharing joins with the
/// filter) and must end at a column.
use std::sync::Arc;

use super::metadata::FieldMetadata;
use super::planner::{check_depth, join_chain, QueryPlanner, ScopeMut};
use crate::ast::types::{field, OrderColumn};
use crate::error::{Error, Result};

impl QueryPlanner {
    pub async fn compile_sort<I, S>(&mut self, sort: I) -> Result<Vec<OrderColumn>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut order = Vec::new();
        for item in sort {
            order.push(self.resolve_sort_item(item.as_ref().trim()).await?);
        }
        Ok(order)
    }

    async fn resolve_sort_item(&mut self, item: &str) -> Result<OrderColumn> {
        let (path, descending) = match item.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (item.strip_prefix('+').unwrap_or(item), false),
        };
        if path.is_empty() {
            return Err(Error::invalid_argument(format!(
                "`{}` is not a valid sort expression",
                item
            )));
        }

        let mut entity = Arc::clone(&self.entity);
        let mut alias = self.alias.clone();
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut hops = 0;
        let segments: Vec<&str> = path.split('.').collect();

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let element = entity.field(segment).ok_or_else(|| Error::UnknownElement {
                entity: entity.name.clone(),
                element: segment.to_string(),
                path: path.to_string(),
            })?;
            match element {
                FieldMetadata::Column(column) if last => {
                    return Ok(OrderColumn {
                        expr: field(format!("{}.{}{}{}", alias, prefix, column.column, suffix)),
                        descending,
                    });
                }
                FieldMetadata::Column(_) => {
                    return Err(Error::invalid_path(
                        path,
                        format!("`{}` is a column and has no elements", segment),
                    ));
                }
                _ if last => {
                    return Err(Error::invalid_path(
                        path,
                        format!("can not sort by `{}`, it is not a column", segment),
                    ));
                }
                FieldMetadata::Embedded(embedded) => {
                    let target = embedded.target.resolve(&self.env.registry).await?;
                    prefix.push_str(embedded.prefix.as_deref().unwrap_or_default());
                    suffix.insert_str(0, embedded.suffix.as_deref().unwrap_or_default());
                    entity = target;
                }
                FieldMetadata::Association(association) => {
                    let node = Arc::clone(&association.association);
                    if node.is_to_many() {
                        return Err(Error::invalid_path(
                            path,
                            format!("can not sort through to-many association `{}`", segment),
                        ));
                    }
                    hops += node.hop_count();
                    check_depth(path, hops, self.env.max_depth)?;
                    let scope = ScopeMut {
                        joins: &mut self.joins,
                        keys: &mut self.keys,
                    };
                    let kind = self.env.join_kind;
                    let (next_alias, target) =
                        join_chain(&mut self.env, scope, &node, &alias, Arc::clone(&entity), kind)
                            .await?;
                    alias = next_alias;
                    entity = target;
                    prefix.clear();
                    suffix.clear();
                }
            }
        }
        Err(Error::invalid_path(path, "path is empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::operators::LogicalOperator;
    use crate::ast::{GenerateOptions, SqlNode};
    use crate::orm::testing::fixture;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_sort_columns() {
        let fx = fixture();
        let mut planner = QueryPlanner::new(Arc::clone(&fx.registry), fx.entity("Country"));
        let order = planner.compile_sort(["name", "-code", "+continent.name"]).await.unwrap();
        assert_eq!(order.len(), 3);
        assert!(order[1].descending);
        let select = planner.into_select(LogicalOperator::and(), order);
        let sql = select
            .generate(&GenerateOptions::new().pretty_print(false))
            .unwrap()
            .sql;
        assert_eq!(
            sql,
            "select * from countries left outer join continents on continents.code = countries.continent_code order by countries.name, countries.code desc, continents.name"
        );
    }

    #[tokio::test]
    async fn test_sort_reuses_filter_join() {
        let fx = fixture();
        let mut planner = QueryPlanner::new(Arc::clone(&fx.registry), fx.entity("Country"));
        let filter = LogicalOperator::from_pairs([("continent.code", "EU")]).unwrap();
        planner.compile_filter(&filter).await.unwrap();
        planner.compile_sort(["continent.name"]).await.unwrap();
        assert_eq!(planner.joins().len(), 1);
    }

    #[tokio::test]
    async fn test_sort_embedded() {
        let fx = fixture();
        let mut planner = QueryPlanner::new(Arc::clone(&fx.registry), fx.entity("Customer"));
        let order = planner.compile_sort(["-address.city"]).await.unwrap();
        assert_eq!(order[0].expr, field("customers.addr_city"));
    }

    #[tokio::test]
    async fn test_sort_rejects_to_many_and_non_columns() {
        let fx = fixture();
        let mut planner = QueryPlanner::new(Arc::clone(&fx.registry), fx.entity("Country"));
        assert!(matches!(
            planner.compile_sort(["customers.givenName"]).await,
            Err(Error::InvalidFilterPath { .. })
        ));
        assert!(matches!(
            planner.compile_sort(["continent"]).await,
            Err(Error::InvalidFilterPath { .. })
        ));
        assert!(matches!(
            planner.compile_sort(["population"]).await,
            Err(Error::UnknownElement { .. })
        ));
        assert!(planner.joins().is_empty());
    }
}
