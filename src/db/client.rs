/// Client: generation defaults, connection acquisition and response shaping.
use std::sync::Arc;

use tracing::debug;

use super::adapter::{Adapter, Connection, QueryRequest, Response};
use crate::ast::compiler::SqlNode;
use crate::ast::context::{GenerateOptions, GenerateResult};
use crate::config::ClientDefaults;
use crate::error::Result;
use crate::orm::planner::DEFAULT_MAX_DEPTH;
use crate::orm::registry::EntityRegistry;
use crate::orm::repository::{Repository, RepositoryOptions};

pub struct Client {
    adapter: Arc<dyn Adapter>,
    defaults: ClientDefaults,
    options: GenerateOptions,
    registry: Arc<EntityRegistry>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("driver", &self.adapter.driver())
            .field("dialect", &self.adapter.dialect())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl Client {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        let mut options = GenerateOptions::new().dialect(adapter.dialect());
        if let Some(version) = adapter.dialect_version() {
            options = options.dialect_version(version);
        }
        Self {
            adapter,
            defaults: ClientDefaults::default(),
            options,
            registry: Arc::new(EntityRegistry::new()),
        }
    }

    pub fn with_defaults(mut self, defaults: ClientDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Base generation options; call options are layered on top.
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = self.options.merge(&options);
        self
    }

    pub fn with_registry(mut self, registry: Arc<EntityRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn defaults(&self) -> &ClientDefaults {
        &self.defaults
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Effective generation options: client options, then the call, then defaults for anything unset.
    pub fn generate_options(&self, call: &GenerateOptions) -> GenerateOptions {
        self.defaults.apply(self.options.merge(call))
    }

    pub fn generate<N: SqlNode + ?Sized>(&self, node: &N, call: &GenerateOptions) -> Result<GenerateResult> {
        let generated = node.generate(&self.generate_options(call))?;
        debug!(
            dialect = %self.adapter.dialect(),
            params = generated.params.len(),
            "generated statement"
        );
        Ok(generated)
    }

    /// Request for `generated` with the execution flags of `overrides` over the defaults.
    pub fn request(&self, generated: GenerateResult, overrides: &ClientDefaults) -> QueryRequest {
        let settings = self.defaults.merge(overrides);
        let mut request = QueryRequest::from(generated)
            .object_rows(settings.object_rows.unwrap_or(false))
            .naming(settings.field_naming.unwrap_or_default())
            .ignore_nulls(settings.ignore_nulls.unwrap_or(false));
        request.fetch_rows = settings.fetch_rows;
        request
    }

    pub async fn acquire(&self) -> Result<Arc<dyn Connection>> {
        Ok(Arc::from(self.adapter.connect().await?))
    }

    /// Acquire a connection with an open transaction.
    pub async fn transaction(&self) -> Result<Arc<dyn Connection>> {
        let connection = self.acquire().await?;
        connection.start_transaction().await?;
        Ok(connection)
    }

    /// Generate `node` and run it on a freshly acquired connection.
    pub async fn execute<N: SqlNode + Sync + ?Sized>(
        &self,
        node: &N,
        call: &GenerateOptions,
        overrides: &ClientDefaults,
    ) -> Result<Response> {
        let connection = self.acquire().await?;
        self.execute_on(connection.as_ref(), node, call, overrides).await
    }

    pub async fn execute_on<N: SqlNode + Sync + ?Sized>(
        &self,
        connection: &dyn Connection,
        node: &N,
        call: &GenerateOptions,
        overrides: &ClientDefaults,
    ) -> Result<Response> {
        let generated = self.generate(node, call)?;
        let request = self.request(generated, overrides);
        self.send(connection, request).await
    }

    /// Execute a prepared request and shape the response it returns.
    pub async fn send(&self, connection: &dyn Connection, request: QueryRequest) -> Result<Response> {
        debug!(sql = %request.sql, cursor = request.cursor, "executing statement");
        let naming = request.naming;
        let object_rows = request.object_rows && !request.cursor;
        let ignore_nulls = request.ignore_nulls;
        let mut response = connection.execute(request).await?;
        response.rename_fields(naming);
        if object_rows {
            response = response.into_object_rows(ignore_nulls);
        }
        Ok(response)
    }

    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            generate: self.generate_options(&GenerateOptions::new()),
            max_depth: self.defaults.max_relation_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            max_eager_fetch: self.defaults.max_eager_fetch,
            ignore_nulls: self.defaults.ignore_nulls.unwrap_or(false),
        }
    }

    /// Repository for a registered entity on a newly acquired connection.
    pub async fn repository(&self, entity: &str) -> Result<Repository> {
        let entity = self.registry.require(entity)?;
        let connection = self.acquire().await?;
        Ok(self.repository_on(connection, entity))
    }

    pub fn repository_on(
        &self,
        connection: Arc<dyn Connection>,
        entity: Arc<crate::orm::metadata::EntityMetadata>,
    ) -> Repository {
        Repository::new(
            connection,
            Arc::clone(&self.registry),
            entity,
            self.repository_options(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::context::{ParamStyle, QueryParams};
    use crate::ast::operators::op;
    use crate::ast::query::select;
    use crate::ast::types::{param, Value};
    use crate::db::adapter::{FieldInfo, FieldNaming, Rows};
    use crate::orm::metadata::{ColumnField, EntityMetadata};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Echoes one row with a `given_name` field and remembers the requests.
    #[derive(Default)]
    struct Echo {
        requests: Arc<Mutex<Vec<QueryRequest>>>,
        connects: Arc<Mutex<usize>>,
    }

    struct EchoConnection {
        requests: Arc<Mutex<Vec<QueryRequest>>>,
    }

    #[async_trait]
    impl Connection for EchoConnection {
        async fn execute(&self, request: QueryRequest) -> Result<Response> {
            self.requests.lock().unwrap().push(request);
            Ok(Response::with_rows(
                vec![FieldInfo::new("given_name", "text"), FieldInfo::new("note", "text")],
                vec![vec![Value::from("Ann"), Value::Null]],
            ))
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

    #[async_trait]
    impl Adapter for Echo {
        fn driver(&self) -> &str {
            "echo"
        }
        fn dialect(&self) -> &str {
            "postgres"
        }
        async fn connect(&self) -> Result<Box<dyn Connection>> {
            *self.connects.lock().unwrap() += 1;
            Ok(Box::new(EchoConnection {
                requests: Arc::clone(&self.requests),
            }))
        }
    }

    fn client(defaults: ClientDefaults) -> (Client, Arc<Mutex<Vec<QueryRequest>>>) {
        let echo = Echo::default();
        let requests = Arc::clone(&echo.requests);
        (Client::new(Arc::new(echo)).with_defaults(defaults), requests)
    }

    #[test]
    fn test_call_options_win_over_defaults() {
        let (client, _) = client(ClientDefaults {
            pretty_print: Some(true),
            param_style: Some(ParamStyle::Colon),
            ..ClientDefaults::default()
        });
        let options = client.generate_options(&GenerateOptions::new().pretty_print(false));
        assert_eq!(options.dialect.as_deref(), Some("postgres"));
        assert_eq!(options.pretty_print, Some(false));
        assert_eq!(options.param_style, Some(ParamStyle::Colon));
    }

    #[tokio::test]
    async fn test_execute_shapes_rows() {
        let (client, requests) = client(ClientDefaults {
            object_rows: Some(true),
            field_naming: Some(FieldNaming::CamelCase),
            ..ClientDefaults::default()
        });
        let query = select(["given_name", "note"])
            .from("customers")
            .unwrap()
            .filter(op::eq("id", param("id")));
        let call = GenerateOptions::new().pretty_print(false).param("id", 3);
        let response = client
            .execute(&query, &call, &ClientDefaults {
                ignore_nulls: Some(true),
                ..ClientDefaults::default()
            })
            .await
            .unwrap();
        assert_eq!(
            response.rows,
            Rows::Objects(vec![serde_json::json!({"givenName": "Ann"})])
        );
        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].sql, "select given_name, note from customers where id = $1");
        assert_eq!(requests[0].params, QueryParams::Positional(vec![Value::Int(3)]));
        assert!(requests[0].object_rows);
    }

    #[tokio::test]
    async fn test_repository_uses_registry_and_defaults() {
        let mut registry = EntityRegistry::new();
        registry
            .register(Arc::new(
                EntityMetadata::builder("Customer")
                    .table("customers")
                    .column(ColumnField::new("givenName"))
                    .build()
                    .unwrap(),
            ))
            .unwrap();
        let echo = Echo::default();
        let connects = Arc::clone(&echo.connects);
        let client = Client::new(Arc::new(echo))
            .with_registry(Arc::new(registry))
            .with_defaults(ClientDefaults {
                max_relation_depth: Some(2),
                ..ClientDefaults::default()
            });
        assert_eq!(client.repository_options().max_depth, 2);
        assert!(client.repository("Planet").await.is_err());
        let repo = client.repository("customer").await.unwrap();
        assert_eq!(repo.entity().name, "Customer");
        assert_eq!(*connects.lock().unwrap(), 1);
    }
}
