/// Entity-level commands: find, count, exists, create, update, destroy.
///
/// Reads go through the planner (projection, filter, sort), run on the
/// connection and are hydrated into JSON objects. To-many relations in the
/// projection are fetched afterwards, one query per relation with every
/// parent key batched into a single `in (...)`.
use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{try_join_all, BoxFuture};
use futures_util::FutureExt;
use serde_json::{Map, Value as Json};
use tracing::debug;

use super::metadata::{EntityMetadata, FieldMetadata};
use super::planner::{QueryPlanner, DEFAULT_MAX_DEPTH};
use super::projection::Projection;
use super::registry::EntityRegistry;
use super::transform::{DeferredFetch, RowTransformModel};
use crate::ast::compiler::SqlNode;
use crate::ast::context::GenerateOptions;
use crate::ast::operators::{op, LogicalOperator};
use crate::ast::query::{delete, insert, update, Returning};
use crate::ast::types::{raw, SelectColumn, Value};
use crate::db::adapter::{Connection, QueryRequest, Response};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub generate: GenerateOptions,
    pub max_depth: usize,
    /// Upper bound on rows returned by one deferred to-many fetch.
    pub max_eager_fetch: Option<usize>,
    pub ignore_nulls: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            generate: GenerateOptions::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_eager_fetch: None,
            ignore_nulls: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FindOptions {
    pub filter: LogicalOperator,
    pub sort: Vec<String>,
    pub projection: Projection,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            filter: LogicalOperator::and(),
            sort: Vec::new(),
            projection: Projection::default(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: LogicalOperator) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort<I, S>(mut self, sort: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = sort.into_iter().map(Into::into).collect();
        self
    }

    pub fn project<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.projection = Projection::parse(elements);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

#[derive(Clone, Copy, PartialEq)]
enum WriteMode {
    Insert,
    Update,
}

/// Commands for one entity over one connection.
#[derive(Clone)]
pub struct Repository {
    connection: Arc<dyn Connection>,
    registry: Arc<EntityRegistry>,
    entity: Arc<EntityMetadata>,
    options: RepositoryOptions,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.entity.name)
            .field("options", &self.options)
            .finish()
    }
}

/// The object in `row` at `path`, if every step is an object.
fn owner<'a>(row: &'a Json, path: &[String]) -> Option<&'a Map<String, Json>> {
    let mut current = row.as_object()?;
    for property in path {
        current = current.get(property)?.as_object()?;
    }
    Some(current)
}

fn owner_mut<'a>(row: &'a mut Json, path: &[String]) -> Option<&'a mut Map<String, Json>> {
    let mut current = row.as_object_mut()?;
    for property in path {
        current = current.get_mut(property)?.as_object_mut()?;
    }
    Some(current)
}

impl Repository {
    pub fn new(
        connection: Arc<dyn Connection>,
        registry: Arc<EntityRegistry>,
        entity: Arc<EntityMetadata>,
        options: RepositoryOptions,
    ) -> Self {
        Self {
            connection,
            registry,
            entity,
            options,
        }
    }

    pub fn entity(&self) -> &Arc<EntityMetadata> {
        &self.entity
    }

    /// Same connection and options, another entity.
    pub fn for_entity(&self, entity: Arc<EntityMetadata>) -> Repository {
        Repository {
            entity,
            ..self.clone()
        }
    }

    fn planner(&self) -> QueryPlanner {
        QueryPlanner::new(Arc::clone(&self.registry), Arc::clone(&self.entity))
            .max_depth(self.options.max_depth)
    }

    async fn run<N: SqlNode + Sync + ?Sized>(&self, node: &N) -> Result<Response> {
        let generated = node.generate(&self.options.generate)?;
        debug!(
            entity = %self.entity.name,
            sql = %generated.sql,
            params = generated.params.len(),
            "executing statement"
        );
        self.connection.execute(QueryRequest::from(generated)).await
    }

    pub async fn find_many(&self, options: FindOptions) -> Result<Vec<Json>> {
        self.find_rows(options).await
    }

    fn find_rows(&self, options: FindOptions) -> BoxFuture<'_, Result<Vec<Json>>> {
        async move {
            let mut planner = self.planner();
            let model = planner.compile_projection(&options.projection).await?;
            let filter = planner.compile_filter(&options.filter).await?;
            let order_by = planner.compile_sort(&options.sort).await?;
            let mut select = planner.into_select(filter, order_by);
            select.limit = options.limit;
            select.offset = options.offset;
            select.distinct = options.distinct;

            let response = self.run(&select).await?;
            let fields = response.field_names();
            let mut rows = model.hydrate(&fields, response.arrays()?, self.options.ignore_nulls)?;
            self.fetch_deferred(&model, &mut rows).await?;
            Ok(rows)
        }
        .boxed()
    }

    /// Run every deferred to-many fetch of `model` and attach the results.
    async fn fetch_deferred(&self, model: &RowTransformModel, rows: &mut [Json]) -> Result<()> {
        let deferred = model.deferred();
        if deferred.is_empty() || rows.is_empty() {
            return Ok(());
        }
        let fetches = deferred.iter().map(|(path, fetch)| {
            let mut keys: Vec<Value> = Vec::new();
            for row in rows.iter() {
                let key = owner(row, path)
                    .and_then(|o| o.get(&fetch.source_key))
                    .map(Value::from_json)
                    .unwrap_or_default();
                if !key.is_null() && !keys.contains(&key) {
                    keys.push(key);
                }
            }
            self.fetch_children(fetch, keys)
        });
        let results = try_join_all(fetches).await?;

        for ((path, fetch), children) in deferred.iter().zip(results) {
            let target_key = &fetch.target.require_column(&fetch.target_key)?.name;
            let mut groups: HashMap<String, Vec<Json>> = HashMap::new();
            for child in children {
                let key = child.get(target_key).map(Json::to_string).unwrap_or_default();
                groups.entry(key).or_default().push(child);
            }
            for row in rows.iter_mut() {
                if let Some(object) = owner_mut(row, path) {
                    let key = object
                        .get(&fetch.source_key)
                        .map(Json::to_string)
                        .unwrap_or_default();
                    let children = groups.get(&key).cloned().unwrap_or_default();
                    object.insert(fetch.property.clone(), Json::Array(children));
                }
            }
        }
        Ok(())
    }

    async fn fetch_children(&self, fetch: &DeferredFetch, keys: Vec<Value>) -> Result<Vec<Json>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut filter = LogicalOperator::and();
        filter.push(op::in_(fetch.target_key.as_str(), Value::Array(keys)));
        if let Some(conditions) = &fetch.conditions {
            filter.push(conditions.clone());
        }
        let mut options = FindOptions::new().filter(filter);
        options.projection = fetch.projection.clone();
        if let Some(max) = self.options.max_eager_fetch {
            options.limit = Some(max as u64 + 1);
        }
        let children = self
            .for_entity(Arc::clone(&fetch.target))
            .find_rows(options)
            .await?;
        if let Some(max) = self.options.max_eager_fetch {
            if children.len() > max {
                return Err(Error::invalid_argument(format!(
                    "eager fetch of {} exceeds the limit of {} rows",
                    fetch.property, max
                )));
            }
        }
        Ok(children)
    }

    pub async fn find_one(&self, options: FindOptions) -> Result<Option<Json>> {
        let rows = self.find_rows(options.limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Find by the single-column primary key.
    pub async fn find_by_key(&self, key: impl Into<Value>) -> Result<Option<Json>> {
        let pk = self.single_key()?;
        let filter = LogicalOperator::and().with([op::eq(pk, key.into())])?;
        self.find_one(FindOptions::new().filter(filter)).await
    }

    fn single_key(&self) -> Result<String> {
        match self.entity.primary_key().as_slice() {
            [pk] => Ok(pk.name.clone()),
            _ => Err(Error::invalid_argument(format!(
                "{} needs exactly one primary key column",
                self.entity.name
            ))),
        }
    }

    pub async fn count(&self, filter: &LogicalOperator) -> Result<u64> {
        let mut planner = self.planner();
        let filter = planner.compile_filter(filter).await?;
        let mut select = planner.into_select(filter, Vec::new());
        select.columns = vec![SelectColumn {
            expr: raw("count(*)"),
            alias: Some("count".to_string()),
        }];
        let response = self.run(&select).await?;
        let count = response
            .arrays()?
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or_default();
        match count {
            Value::Int(n) => Ok(n.max(0) as u64),
            Value::Float(n) => Ok(n.max(0.0) as u64),
            Value::Text(s) => s
                .parse()
                .map_err(|_| Error::invalid_argument(format!("count returned `{}`", s))),
            _ => Ok(0),
        }
    }

    pub async fn exists(&self, filter: &LogicalOperator) -> Result<bool> {
        let mut planner = self.planner();
        let filter = planner.compile_filter(filter).await?;
        let mut select = planner.into_select(filter, Vec::new());
        select.columns = vec![SelectColumn {
            expr: raw("1"),
            alias: None,
        }];
        select.limit = Some(1);
        let response = self.run(&select).await?;
        Ok(!response.rows.is_empty())
    }

    /// Insert one row. Returns `values` merged with the columns the
    /// database reports back when the dialect supports RETURNING.
    pub async fn create(&self, values: &Json) -> Result<Json> {
        let object = values
            .as_object()
            .ok_or_else(|| Error::invalid_argument("create expects a JSON object"))?;
        let mut writes = Vec::new();
        self.collect_writes(Arc::clone(&self.entity), object, String::new(), String::new(), WriteMode::Insert, &mut writes)
            .await?;
        let query = insert(self.entity.qualified_table(), writes)?;

        let returned: Vec<(String, String)> = self
            .entity
            .columns()
            .filter(|c| !c.hidden)
            .map(|c| (c.name.clone(), c.column.clone()))
            .collect();
        let with_returning = query.clone().returning(returned.iter().map(|(_, c)| c.as_str()))?;
        let response = match self.run(&with_returning).await {
            Err(Error::UnsupportedDialectFeature { .. }) => {
                self.run(&query).await?;
                return Ok(values.clone());
            }
            other => other?,
        };

        let mut created = object.clone();
        if let Some(row) = response.arrays()?.first() {
            for ((property, _), value) in returned.iter().zip(row) {
                created.insert(property.clone(), value.to_json());
            }
        }
        Ok(Json::Object(created))
    }

    /// Update every row matching `filter`; returns the affected row count.
    pub async fn update_many(&self, values: &Json, filter: &LogicalOperator) -> Result<u64> {
        let object = values
            .as_object()
            .ok_or_else(|| Error::invalid_argument("update expects a JSON object"))?;
        let mut writes = Vec::new();
        self.collect_writes(Arc::clone(&self.entity), object, String::new(), String::new(), WriteMode::Update, &mut writes)
            .await?;
        let mut query = update(self.entity.qualified_table(), writes)?;
        query.filter = self.scoped_filter(filter).await?;
        Ok(self.run(&query).await?.rows_affected.unwrap_or(0))
    }

    /// Delete every row matching `filter`; returns the affected row count.
    pub async fn destroy(&self, filter: &LogicalOperator) -> Result<u64> {
        let mut query = delete(self.entity.qualified_table())?;
        query.filter = self.scoped_filter(filter).await?;
        Ok(self.run(&query).await?.rows_affected.unwrap_or(0))
    }

    /// Filter for a statement on the bare table. Paths that need joins are
    /// moved into `pk in (select pk ...)`.
    async fn scoped_filter(&self, filter: &LogicalOperator) -> Result<LogicalOperator> {
        let mut planner = self.planner();
        let compiled = planner.compile_filter(filter).await?;
        if planner.joins().is_empty() {
            return Ok(compiled);
        }
        let pk = self.single_key()?;
        let column = self.entity.require_column(&pk)?.column.clone();
        let alias = planner.alias().to_string();
        let mut select = planner.into_select(compiled, Vec::new());
        select.columns = vec![SelectColumn::parse(&format!("{}.{}", alias, column))];
        LogicalOperator::and().with([op::in_(column, select)])
    }

    /// Column writes for `object`, walking embedded objects.
    fn collect_writes<'a>(
        &'a self,
        entity: Arc<EntityMetadata>,
        object: &'a Map<String, Json>,
        prefix: String,
        suffix: String,
        mode: WriteMode,
        out: &'a mut Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            for field in &entity.fields {
                let given = object
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(field.name()))
                    .map(|(_, v)| v);
                match field {
                    FieldMetadata::Column(column) => {
                        let allowed = match mode {
                            WriteMode::Insert => column.insert,
                            WriteMode::Update => column.update,
                        };
                        if !allowed {
                            continue;
                        }
                        let value = match (given, mode) {
                            (Some(v), _) => Value::from_json(v),
                            (None, WriteMode::Update) => continue,
                            (None, WriteMode::Insert) => match &column.default_value {
                                Some(default) => default.clone(),
                                // generated keys
                                None if column.primary_key => continue,
                                None => {
                                    column.validate(&entity.name, &Value::Null)?;
                                    continue;
                                }
                            },
                        };
                        column.validate(&entity.name, &value)?;
                        out.push((format!("{}{}{}", prefix, column.column, suffix), value));
                    }
                    FieldMetadata::Embedded(embedded) => {
                        let Some(Json::Object(inner)) = given else {
                            continue;
                        };
                        let target = embedded.target.resolve(&self.registry).await?;
                        let inner_prefix = format!("{}{}", prefix, embedded.prefix.as_deref().unwrap_or_default());
                        let inner_suffix = format!("{}{}", embedded.suffix.as_deref().unwrap_or_default(), suffix);
                        self.collect_writes(target, inner, inner_prefix, inner_suffix, mode, &mut *out)
                            .await?;
                    }
                    FieldMetadata::Association(_) => {}
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Fetch a relation of `row` on demand from the key on the row.
    /// To-one relations yield an object or null, to-many an array.
    pub async fn resolve_lazy(&self, row: &Json, field: &str) -> Result<Json> {
        let Some(FieldMetadata::Association(association)) = self.entity.field(field) else {
            return Err(Error::UnknownElement {
                entity: self.entity.name.clone(),
                element: field.to_string(),
                path: field.to_string(),
            });
        };
        let node = Arc::clone(&association.association);
        if node.next.is_some() {
            return Err(Error::invalid_path(
                field,
                "on-demand resolution supports single-hop associations only",
            ));
        }
        let source_key = &self.entity.require_column(&node.source_key)?.name;
        let key = row
            .get(source_key)
            .map(Value::from_json)
            .unwrap_or_default();
        let empty = if node.has_many {
            Json::Array(Vec::new())
        } else {
            Json::Null
        };
        if key.is_null() {
            return Ok(empty);
        }

        let target = node.resolve_target(&self.registry).await?;
        let mut filter = LogicalOperator::and();
        filter.push(op::eq(node.target_key.as_str(), key));
        if let Some(conditions) = &node.conditions {
            filter.push(conditions.clone());
        }
        let mut options = FindOptions::new().filter(filter);
        if !node.has_many {
            options.limit = Some(1);
        }
        let mut rows = self.for_entity(target).find_rows(options).await?;
        if node.has_many {
            return Ok(Json::Array(rows));
        }
        Ok(if rows.is_empty() { empty } else { rows.swap_remove(0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::adapter::FieldInfo;
    use crate::orm::testing::fixture;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every request and answers with queued responses.
    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<QueryRequest>>,
        responses: Mutex<VecDeque<Response>>,
    }

    impl Recording {
        fn answer(self, response: Response) -> Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }

        fn sql(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.sql.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Connection for Recording {
        async fn execute(&self, request: QueryRequest) -> Result<Response> {
            self.requests.lock().unwrap().push(request);
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        async fn start_transaction(&self) -> Result<()> {
            Ok(())
        }
        async fn commit(&self) -> Result<()> {
            Ok(())
        }
        async fn rollback(&self) -> Result<()> {
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            false
        }
    }

    fn fields(names: &[&str]) -> Vec<FieldInfo> {
        names.iter().map(|n| FieldInfo::new(*n, "text")).collect()
    }

    fn repository(conn: Arc<Recording>, entity: &str, options: RepositoryOptions) -> Repository {
        let fx = fixture();
        let entity = fx.entity(entity);
        Repository::new(conn, fx.registry, entity, options)
    }

    fn flat() -> RepositoryOptions {
        RepositoryOptions {
            generate: GenerateOptions::new().pretty_print(false),
            ..RepositoryOptions::default()
        }
    }

    #[tokio::test]
    async fn test_find_many_with_deferred_relation() {
        let conn = Arc::new(
            Recording::default()
                .answer(Response::with_rows(
                    fields(&["countries_code", "countries_name"]),
                    vec![
                        vec!["DE".into(), "Germany".into()],
                        vec!["FR".into(), "France".into()],
                    ],
                ))
                .answer(Response::with_rows(
                    fields(&["customers_given_name", "customers_country_code"]),
                    vec![vec!["Ann".into(), "DE".into()], vec!["Bob".into(), "DE".into()]],
                )),
        );
        let repo = repository(Arc::clone(&conn), "Country", flat());
        let rows = repo
            .find_many(FindOptions::new().project(["code", "name", "customers.givenName"]))
            .await
            .unwrap();
        assert_eq!(
            conn.sql(),
            vec![
                "select countries.code as countries_code, countries.name as countries_name from countries",
                "select customers.given_name as customers_given_name, customers.country_code as customers_country_code from customers where customers.country_code in ('DE','FR')",
            ]
        );
        assert_eq!(
            rows,
            vec![
                json!({"code": "DE", "name": "Germany", "customers": [
                    {"givenName": "Ann", "countryCode": "DE"},
                    {"givenName": "Bob", "countryCode": "DE"}
                ]}),
                json!({"code": "FR", "name": "France", "customers": []}),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_secondary_query_without_parents() {
        let conn = Arc::new(Recording::default());
        let repo = repository(Arc::clone(&conn), "Country", flat());
        let rows = repo
            .find_many(FindOptions::new().project(["code", "customers"]))
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(conn.sql().len(), 1);
    }

    #[tokio::test]
    async fn test_eager_fetch_limit() {
        let conn = Arc::new(
            Recording::default()
                .answer(Response::with_rows(fields(&["countries_code"]), vec![vec!["DE".into()]]))
                .answer(Response::with_rows(
                    fields(&["customers_given_name", "customers_country_code"]),
                    vec![vec!["Ann".into(), "DE".into()], vec!["Bob".into(), "DE".into()]],
                )),
        );
        let options = RepositoryOptions {
            max_eager_fetch: Some(1),
            ..flat()
        };
        let repo = repository(Arc::clone(&conn), "Country", options);
        let err = repo
            .find_many(FindOptions::new().project(["code", "customers.givenName"]))
            .await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        assert!(conn.sql()[1].ends_with("limit 2"));
    }

    #[tokio::test]
    async fn test_find_with_filter_sort_and_paging() {
        let conn = Arc::new(Recording::default());
        let repo = repository(Arc::clone(&conn), "Country", flat());
        let filter = LogicalOperator::from_pairs([("continent.code", "EU")]).unwrap();
        repo.find_many(
            FindOptions::new()
                .project(["code"])
                .filter(filter)
                .sort(["-continent.name"])
                .limit(10)
                .offset(20),
        )
        .await
        .unwrap();
        assert_eq!(
            conn.sql()[0],
            "select countries.code as countries_code from countries left outer join continents on continents.code = countries.continent_code where continents.code = 'EU' order by continents.name desc limit 10 offset 20"
        );
    }

    #[tokio::test]
    async fn test_find_by_key() {
        let conn = Arc::new(Recording::default().answer(Response::with_rows(
            fields(&["countries_code", "countries_name", "countries_continent_code"]),
            vec![vec!["DE".into(), "Germany".into(), "EU".into()]],
        )));
        let repo = repository(Arc::clone(&conn), "Country", flat());
        let row = repo.find_by_key("DE").await.unwrap();
        assert_eq!(
            row,
            Some(json!({"code": "DE", "name": "Germany", "continentCode": "EU"}))
        );
        assert!(conn.sql()[0].ends_with("where countries.code = 'DE' limit 1"));
    }

    #[tokio::test]
    async fn test_count_and_exists() {
        let conn = Arc::new(
            Recording::default()
                .answer(Response::with_rows(fields(&["count"]), vec![vec![Value::Int(3)]]))
                .answer(Response::with_rows(fields(&["?column?"]), vec![vec![Value::Int(1)]])),
        );
        let repo = repository(Arc::clone(&conn), "Country", flat());
        let filter = LogicalOperator::from_pairs([("customers.givenName", "Ann")]).unwrap();
        assert_eq!(repo.count(&filter).await.unwrap(), 3);
        assert!(repo.exists(&filter).await.unwrap());
        let sql = conn.sql();
        assert!(sql[0].starts_with("select count(*) as count from countries where exists"));
        assert!(sql[1].starts_with("select 1 from countries where exists"));
        assert!(sql[1].ends_with("limit 1"));
    }

    #[tokio::test]
    async fn test_create_validates_and_returns() {
        let conn = Arc::new(Recording::default().answer(Response::with_rows(
            fields(&["id", "given_name", "country_code", "notes"]),
            vec![vec![Value::Int(7), "Ann".into(), "DE".into(), Value::Null]],
        )));
        let repo = repository(Arc::clone(&conn), "Customer", flat());
        let created = repo
            .create(&json!({"givenName": "Ann", "countryCode": "DE", "address": {"city": "Berlin"}}))
            .await
            .unwrap();
        assert_eq!(created["id"], json!(7));
        assert_eq!(created["address"], json!({"city": "Berlin"}));
        assert_eq!(
            conn.sql()[0],
            "insert into customers (given_name, country_code, addr_city) values ('Ann', 'DE', 'Berlin') returning id, given_name, country_code, notes"
        );
        assert!(repo.create(&json!([1])).await.is_err());
    }

    #[tokio::test]
    async fn test_create_without_returning_support() {
        let conn = Arc::new(Recording::default());
        let options = RepositoryOptions {
            generate: GenerateOptions::new().dialect("mssql").pretty_print(false),
            ..RepositoryOptions::default()
        };
        let repo = repository(Arc::clone(&conn), "Country", options);
        let created = repo.create(&json!({"code": "DE"})).await.unwrap();
        assert_eq!(created, json!({"code": "DE"}));
        assert_eq!(conn.sql().len(), 1);
        assert!(!conn.sql()[0].contains("returning"));
    }

    #[tokio::test]
    async fn test_mssql_lookups_page_without_sort() {
        let conn = Arc::new(
            Recording::default()
                .answer(Response::with_rows(
                    fields(&["countries_code", "countries_name", "countries_continent_code"]),
                    vec![vec!["DE".into(), "Germany".into(), "EU".into()]],
                ))
                .answer(Response::with_rows(fields(&[""]), vec![vec![Value::Int(1)]]))
                .answer(Response::with_rows(fields(&["countries_code"]), vec![vec!["DE".into()]]))
                .answer(Response::with_rows(
                    fields(&["customers_given_name", "customers_country_code"]),
                    vec![vec!["Ann".into(), "DE".into()]],
                )),
        );
        let options = RepositoryOptions {
            generate: GenerateOptions::new().dialect("mssql").pretty_print(false),
            max_eager_fetch: Some(5),
            ..RepositoryOptions::default()
        };
        let repo = repository(Arc::clone(&conn), "Country", options);

        let row = repo.find_by_key("DE").await.unwrap();
        assert_eq!(row.unwrap()["name"], json!("Germany"));
        let filter = LogicalOperator::from_pairs([("name", "Germany")]).unwrap();
        assert!(repo.exists(&filter).await.unwrap());
        let rows = repo
            .find_many(FindOptions::new().project(["code", "customers.givenName"]))
            .await
            .unwrap();
        assert_eq!(rows[0]["customers"][0]["givenName"], json!("Ann"));

        let sql = conn.sql();
        assert!(sql[0].ends_with(
            "where countries.code = 'DE' order by (select null) OFFSET 0 ROWS FETCH NEXT 1 ROWS ONLY"
        ));
        assert!(sql[1].ends_with(
            "where countries.name = 'Germany' order by (select null) OFFSET 0 ROWS FETCH NEXT 1 ROWS ONLY"
        ));
        assert!(!sql[2].contains("OFFSET"));
        assert!(sql[3].ends_with("order by (select null) OFFSET 0 ROWS FETCH NEXT 6 ROWS ONLY"));
    }

    #[tokio::test]
    async fn test_update_through_join_uses_key_subselect() {
        let conn = Arc::new(Recording::default().answer(Response::affected(2)));
        let repo = repository(Arc::clone(&conn), "Country", flat());
        let filter = LogicalOperator::from_pairs([("continent.code", "EU")]).unwrap();
        let n = repo.update_many(&json!({"name": "x"}), &filter).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            conn.sql()[0],
            "update countries set name = 'x' where code in (select countries.code from countries left outer join continents on continents.code = countries.continent_code where continents.code = 'EU')"
        );
    }

    #[tokio::test]
    async fn test_update_requires_values() {
        let conn = Arc::new(Recording::default());
        let repo = repository(Arc::clone(&conn), "Country", flat());
        let err = repo.update_many(&json!({"unknown": 1}), &LogicalOperator::and()).await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        assert!(conn.sql().is_empty());
    }

    #[tokio::test]
    async fn test_destroy() {
        let conn = Arc::new(Recording::default().answer(Response::affected(1)));
        let repo = repository(Arc::clone(&conn), "Country", flat());
        let filter = LogicalOperator::from_pairs([("code", "DE")]).unwrap();
        assert_eq!(repo.destroy(&filter).await.unwrap(), 1);
        assert_eq!(conn.sql()[0], "delete from countries where countries.code = 'DE'");
    }

    #[tokio::test]
    async fn test_resolve_lazy() {
        let conn = Arc::new(Recording::default().answer(Response::with_rows(
            fields(&["countries_code", "countries_name", "countries_continent_code"]),
            vec![vec!["DE".into(), "Germany".into(), "EU".into()]],
        )));
        let repo = repository(Arc::clone(&conn), "Customer", flat());
        let country = repo
            .resolve_lazy(&json!({"id": 1, "countryCode": "DE"}), "country")
            .await
            .unwrap();
        assert_eq!(country["name"], json!("Germany"));
        assert!(conn.sql()[0].ends_with("where countries.code = 'DE' limit 1"));

        let none = repo.resolve_lazy(&json!({"id": 2}), "country").await.unwrap();
        assert_eq!(none, Json::Null);
        assert_eq!(conn.sql().len(), 1);

        assert!(matches!(
            repo.resolve_lazy(&json!({}), "continent").await,
            Err(Error::InvalidFilterPath { .. })
        ));
    }
}
