use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlweave::ast::{LogicalOperator, SqlNode};
use sqlweave::config::{ClientConfig, ModelFile};
use sqlweave::db::{Client, PostgresAdapter};
use sqlweave::orm::{filter_from_json, EntityRegistry, FindOptions, QueryPlanner};

/// Compile entity queries to SQL and optionally run them against PostgreSQL
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Entity model file (TOML)
    #[arg(long, short = 'm')]
    models: PathBuf,

    /// Entity to query
    entity: String,

    /// Filter as JSON, e.g. '{"country.code in": ["DE", "FR"]}'
    #[arg(long, short = 'f')]
    filter: Option<String>,

    /// Sort elements, e.g. `-givenName`; repeatable
    #[arg(long, short = 's')]
    sort: Vec<String>,

    /// Projection elements, e.g. `+notes`, `-notes` or `country.name`; repeatable
    #[arg(long = "select", short = 'p')]
    projection: Vec<String>,

    #[arg(long)]
    limit: Option<u64>,

    #[arg(long)]
    offset: Option<u64>,

    /// Client configuration; defaults to the user config directory
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Dialect override (postgres, sqlite, oracle, mssql)
    #[arg(long, short = 'd')]
    dialect: Option<String>,

    /// Indented multi-line output
    #[arg(long)]
    pretty: bool,

    /// Execute against the configured database and print hydrated rows
    #[arg(long, short = 'x')]
    execute: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ClientConfig::load_default().context("failed to load client config")?,
    };
    if let Some(dialect) = &cli.dialect {
        config.dialect = dialect.clone();
    }

    let registry = ModelFile::load(&cli.models)
        .and_then(ModelFile::into_registry)
        .with_context(|| format!("failed to load models from {}", cli.models.display()))?;
    let registry = Arc::new(registry);

    let filter = match &cli.filter {
        Some(text) => {
            let json: serde_json::Value =
                serde_json::from_str(text).context("filter is not valid JSON")?;
            filter_from_json(&json)?
        }
        None => LogicalOperator::and(),
    };

    let mut find = FindOptions::new()
        .filter(filter)
        .sort(cli.sort.iter())
        .project(cli.projection.iter());
    find.limit = cli.limit;
    find.offset = cli.offset;

    if cli.execute {
        return execute(cli.pretty, config, registry, &cli.entity, find).await;
    }

    let entity = registry.require(&cli.entity)?;
    let mut planner = QueryPlanner::new(Arc::clone(&registry), entity);
    if let Some(depth) = config.defaults.max_relation_depth {
        planner = planner.max_depth(depth);
    }
    let model = planner.compile_projection(&find.projection).await?;
    let filter = planner.compile_filter(&find.filter).await?;
    let order_by = planner.compile_sort(&find.sort).await?;
    let mut select = planner.into_select(filter, order_by);
    select.limit = find.limit;
    select.offset = find.offset;

    let mut options = config.generate_options();
    if cli.pretty {
        options.pretty_print = Some(true);
    }
    let generated = select.generate(&options)?;
    println!("{}", generated.sql);
    if !generated.params.is_empty() {
        println!("-- params: {}", generated.params.to_json());
    }
    for (path, fetch) in model.deferred() {
        let owner = if path.is_empty() {
            String::new()
        } else {
            format!("{}.", path.join("."))
        };
        println!(
            "-- deferred: {}{} from {}",
            owner, fetch.property, fetch.target.name
        );
    }
    Ok(())
}

async fn execute(
    pretty: bool,
    mut config: ClientConfig,
    registry: Arc<EntityRegistry>,
    entity: &str,
    find: FindOptions,
) -> Result<()> {
    if config.dialect != "postgres" {
        anyhow::bail!("only the postgres dialect can be executed, not {}", config.dialect);
    }

    // PGPASSWORD, then an interactive prompt
    if config.connection.password.is_empty() {
        if let Ok(pw) = std::env::var("PGPASSWORD") {
            config.connection.password = pw;
        } else {
            let prompt = format!("Password for {}: ", config.connection.display_string());
            config.connection.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    let mut adapter = PostgresAdapter::new(&config.connection)?;
    if let Some(version) = &config.dialect_version {
        adapter = adapter.with_dialect_version(version.clone());
    }
    let client = Client::new(Arc::new(adapter))
        .with_defaults(config.defaults.clone())
        .with_registry(registry);

    let repository = client
        .repository(entity)
        .await
        .with_context(|| format!("failed to open a connection for {}", entity))?;
    let rows = repository.find_many(find).await?;
    let output = if pretty {
        serde_json::to_string_pretty(&rows)?
    } else {
        serde_json::to_string(&rows)?
    };
    println!("{}", output);
    Ok(())
}
