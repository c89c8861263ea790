/// Row transform model: folds flat, aliased result rows into nested objects.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tracing::trace;

use super::metadata::{ColumnField, EntityMetadata};
use super::projection::Projection;
use crate::ast::operators::LogicalOperator;
use crate::ast::types::Value;
use crate::error::{Error, Result};

/// A to-many relation fetched by a second query after the primary rows.
#[derive(Debug, Clone)]
pub struct DeferredFetch {
    pub property: String,
    /// Parent property holding the key.
    pub source_key: String,
    /// Alias of the parent key column in the primary result.
    pub key_alias: String,
    pub target: Arc<EntityMetadata>,
    /// Target property matched against the parent keys.
    pub target_key: String,
    pub conditions: Option<LogicalOperator>,
    pub projection: Projection,
}

#[derive(Debug, Clone)]
pub enum RowNode {
    Leaf {
        property: String,
        column_alias: String,
        column: ColumnField,
    },
    /// Embedded object or eager to-one relation.
    Object {
        property: String,
        model: RowTransformModel,
    },
    Deferred(DeferredFetch),
}

#[derive(Debug, Clone)]
pub struct RowTransformModel {
    pub entity: Arc<EntityMetadata>,
    pub nodes: Vec<RowNode>,
}

impl RowTransformModel {
    pub fn new(entity: Arc<EntityMetadata>) -> Self {
        Self {
            entity,
            nodes: Vec::new(),
        }
    }

    pub fn add_leaf(&mut self, column: &ColumnField, column_alias: String) {
        if self.has_leaf(&column.name) {
            return;
        }
        self.nodes.push(RowNode::Leaf {
            property: column.name.clone(),
            column_alias,
            column: column.clone(),
        });
    }

    pub fn add_object(&mut self, property: &str, model: RowTransformModel) {
        self.nodes.push(RowNode::Object {
            property: property.to_string(),
            model,
        });
    }

    pub fn add_deferred(&mut self, fetch: DeferredFetch) {
        self.nodes.push(RowNode::Deferred(fetch));
    }

    pub fn has_leaf(&self, property: &str) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n, RowNode::Leaf { property: p, .. } if p.eq_ignore_ascii_case(property)))
    }

    /// Every deferred fetch with the property path of the object that owns it.
    pub fn deferred(&self) -> Vec<(Vec<String>, &DeferredFetch)> {
        let mut out = Vec::new();
        self.collect_deferred(&mut Vec::new(), &mut out);
        out
    }

    fn collect_deferred<'a>(&'a self, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, &'a DeferredFetch)>) {
        for node in &self.nodes {
            match node {
                RowNode::Deferred(fetch) => out.push((path.clone(), fetch)),
                RowNode::Object { property, model } => {
                    path.push(property.clone());
                    model.collect_deferred(path, out);
                    path.pop();
                }
                RowNode::Leaf { .. } => {}
            }
        }
    }

    /// Build one JSON object per row. `fields` are the result column names.
    pub fn hydrate(&self, fields: &[String], rows: &[Vec<Value>], ignore_nulls: bool) -> Result<Vec<Json>> {
        let index: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.to_lowercase(), i))
            .collect();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let (object, _) = self.build(&index, row, ignore_nulls)?;
            out.push(Json::Object(object));
        }
        trace!(entity = %self.entity.name, rows = out.len(), "hydrated rows");
        Ok(out)
    }

    /// Returns the object and whether any leaf under it was non-null.
    fn build(
        &self,
        index: &HashMap<String, usize>,
        row: &[Value],
        ignore_nulls: bool,
    ) -> Result<(Map<String, Json>, bool)> {
        let mut object = Map::new();
        let mut any = false;
        for node in &self.nodes {
            match node {
                RowNode::Leaf {
                    property,
                    column_alias,
                    column,
                } => {
                    let i = *index.get(&column_alias.to_lowercase()).ok_or_else(|| {
                        Error::invalid_argument(format!("result has no column {}", column_alias))
                    })?;
                    let value = column.convert(row.get(i).cloned().unwrap_or_default());
                    if value.is_null() {
                        if !ignore_nulls {
                            object.insert(property.clone(), Json::Null);
                        }
                        continue;
                    }
                    any = true;
                    object.insert(property.clone(), value.to_json());
                }
                RowNode::Object { property, model } => {
                    let (child, child_any) = model.build(index, row, ignore_nulls)?;
                    if child_any {
                        any = true;
                        object.insert(property.clone(), Json::Object(child));
                    } else if !ignore_nulls {
                        object.insert(property.clone(), Json::Null);
                    }
                }
                RowNode::Deferred(fetch) => {
                    object.insert(fetch.property.clone(), Json::Array(Vec::new()));
                }
            }
        }
        Ok((object, any))
    }
}
