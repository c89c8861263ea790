/// Client configuration and entity model files.
///
/// Both are TOML. The client configuration lives at
/// `<config dir>/sqlweave/config.toml`; a missing file yields defaults.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::context::{GenerateOptions, ParamStyle};
use crate::ast::types::Value;
use crate::db::adapter::FieldNaming;
use crate::error::{Error, Result};
use crate::orm::association::{AssociationNode, TypeThunk};
use crate::orm::filter::filter_from_json;
use crate::orm::metadata::{ColumnField, DataType, EntityMetadata};
use crate::orm::registry::EntityRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub dialect: String,
    pub dialect_version: Option<String>,
    pub connection: ConnectionConfig,
    pub defaults: ClientDefaults,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dialect: String::from("postgres"),
            dialect_version: None,
            connection: ConnectionConfig::default(),
            defaults: ClientDefaults::default(),
        }
    }
}

impl ClientConfig {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sqlweave")
            .join("config.toml")
    }

    /// Load from the default location, falling back to defaults.
    pub fn load_default() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generation options for this dialect with the configured defaults applied.
    pub fn generate_options(&self) -> GenerateOptions {
        let mut options = GenerateOptions::new().dialect(self.dialect.clone());
        if let Some(version) = &self.dialect_version {
            options = options.dialect_version(version.clone());
        }
        self.defaults.apply(options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Schema put on the search path of every pooled connection.
    pub schema: Option<String>,
    pub pool_size: usize,
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            schema: None,
            pool_size: 8,
            connect_timeout_secs: 15,
        }
    }
}

impl ConnectionConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} connect_timeout={}",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
            self.connect_timeout_secs
        )
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Client-wide defaults. Every field is optional; per-call options win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientDefaults {
    pub pretty_print: Option<bool>,
    pub param_style: Option<ParamStyle>,
    pub fetch_rows: Option<usize>,
    pub object_rows: Option<bool>,
    pub ignore_nulls: Option<bool>,
    pub field_naming: Option<FieldNaming>,
    pub max_relation_depth: Option<usize>,
    pub max_eager_fetch: Option<usize>,
}

impl ClientDefaults {
    /// Layer `overrides` on top of `self`.
    pub fn merge(&self, overrides: &ClientDefaults) -> ClientDefaults {
        ClientDefaults {
            pretty_print: overrides.pretty_print.or(self.pretty_print),
            param_style: overrides.param_style.or(self.param_style),
            fetch_rows: overrides.fetch_rows.or(self.fetch_rows),
            object_rows: overrides.object_rows.or(self.object_rows),
            ignore_nulls: overrides.ignore_nulls.or(self.ignore_nulls),
            field_naming: overrides.field_naming.or(self.field_naming),
            max_relation_depth: overrides.max_relation_depth.or(self.max_relation_depth),
            max_eager_fetch: overrides.max_eager_fetch.or(self.max_eager_fetch),
        }
    }

    /// Fill generation settings that `options` leaves unset.
    pub fn apply(&self, mut options: GenerateOptions) -> GenerateOptions {
        if options.pretty_print.is_none() {
            options.pretty_print = self.pretty_print;
        }
        if options.param_style.is_none() {
            options.param_style = self.param_style;
        }
        options
    }
}

/// Entity model file: `[[entity]]` tables with columns, embedded objects
/// and associations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelFile {
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub table: Option<String>,
    pub schema: Option<String>,
    /// Name of an entity defined earlier in the file.
    pub extends: Option<String>,
    #[serde(default, rename = "column")]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub embedded: Vec<EmbeddedDef>,
    #[serde(default, rename = "association")]
    pub associations: Vec<AssociationDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column: Option<String>,
    #[serde(default, rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default = "yes")]
    pub insert: bool,
    #[serde(default = "yes")]
    pub update: bool,
    #[serde(default)]
    pub array: bool,
    pub default: Option<toml::Value>,
    #[serde(rename = "enum")]
    pub enum_values: Option<Vec<toml::Value>>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedDef {
    pub name: String,
    pub target: String,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HopDef {
    pub target: String,
    pub source_key: String,
    pub target_key: String,
    #[serde(default)]
    pub many: bool,
    /// `"property op" = value` pairs applied to the target.
    pub conditions: Option<toml::Table>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssociationDef {
    pub name: String,
    #[serde(flatten)]
    pub hop: HopDef,
    #[serde(default)]
    pub lazy: bool,
    /// Further hops, walked in order after the first.
    #[serde(default)]
    pub then: Vec<HopDef>,
}

fn toml_to_value(value: &toml::Value) -> Result<Value> {
    let json = serde_json::to_value(value).map_err(|e| Error::Config(e.to_string()))?;
    Ok(Value::from_json(&json))
}

impl HopDef {
    fn to_node(&self) -> Result<AssociationNode> {
        let target = TypeThunk::named(self.target.clone());
        let mut node = if self.many {
            AssociationNode::to_many(target, &self.source_key, &self.target_key)
        } else {
            AssociationNode::to_one(target, &self.source_key, &self.target_key)
        };
        if let Some(conditions) = &self.conditions {
            let json = serde_json::to_value(conditions).map_err(|e| Error::Config(e.to_string()))?;
            node = node.with_conditions(filter_from_json(&json)?);
        }
        Ok(node)
    }
}

impl ColumnDef {
    fn to_field(&self) -> Result<ColumnField> {
        let mut field = ColumnField::new(self.name.clone()).data_type(self.data_type);
        if let Some(column) = &self.column {
            field = field.column(column.clone());
        }
        if self.primary_key {
            field = field.primary_key();
        }
        if self.not_null {
            field = field.not_null();
        }
        if self.hidden {
            field = field.hidden();
        }
        if self.exclusive {
            field = field.exclusive();
        }
        if !self.insert {
            field = field.no_insert();
        }
        if !self.update {
            field = field.no_update();
        }
        if self.array {
            field = field.array();
        }
        if let Some(default) = &self.default {
            field = field.default_value(toml_to_value(default)?);
        }
        if let Some(values) = &self.enum_values {
            let values = values.iter().map(toml_to_value).collect::<Result<Vec<_>>>()?;
            field = field.enum_values(values);
        }
        Ok(field)
    }
}

impl ModelFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Build and register every entity. Association targets are resolved
    /// by name on first use, so definition order only matters for `extends`.
    pub fn into_registry(self) -> Result<EntityRegistry> {
        let mut registry = EntityRegistry::new();
        for def in self.entities {
            let mut builder = EntityMetadata::builder(def.name.clone());
            if let Some(base) = &def.extends {
                let base = registry
                    .get(base)
                    .ok_or_else(|| Error::Config(format!("{} extends unknown entity {}", def.name, base)))?;
                builder = builder.extends(&base);
            }
            if let Some(table) = def.table {
                builder = builder.table(table);
            }
            if let Some(schema) = def.schema {
                builder = builder.schema(schema);
            }
            for column in &def.columns {
                builder = builder.column(column.to_field()?);
            }
            for embedded in def.embedded {
                builder = builder.embedded_with(
                    embedded.name,
                    TypeThunk::named(embedded.target),
                    embedded.prefix.as_deref(),
                    embedded.suffix.as_deref(),
                );
            }
            for association in &def.associations {
                let mut node = association.hop.to_node()?;
                for hop in &association.then {
                    node = node.then(hop.to_node()?);
                }
                builder = if association.lazy {
                    builder.lazy_association(association.name.clone(), node)
                } else {
                    builder.association(association.name.clone(), node)
                };
            }
            registry.register(Arc::new(builder.build()?))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::metadata::FieldMetadata;

    #[test]
    fn test_config_defaults_when_empty() {
        let config = ClientConfig::from_toml("").unwrap();
        assert_eq!(config.dialect, "postgres");
        assert_eq!(config.connection.port, 5432);
        assert_eq!(config.defaults, ClientDefaults::default());
    }

    #[test]
    fn test_config_parse() {
        let config = ClientConfig::from_toml(
            r#"
dialect = "oracle"
dialect_version = "11"

[connection]
host = "db.internal"
database = "sales"
password = "secret"

[defaults]
pretty_print = false
param_style = "colon"
field_naming = "camel_case"
max_eager_fetch = 500
"#,
        )
        .unwrap();
        assert_eq!(config.dialect, "oracle");
        assert_eq!(config.connection.host, "db.internal");
        assert_eq!(config.defaults.field_naming, Some(FieldNaming::CamelCase));
        let options = config.generate_options();
        assert_eq!(options.dialect.as_deref(), Some("oracle"));
        assert_eq!(options.dialect_version.as_deref(), Some("11"));
        assert_eq!(options.pretty_print, Some(false));
        assert_eq!(options.param_style, Some(ParamStyle::Colon));
    }

    #[test]
    fn test_password_not_serialized() {
        let mut config = ClientConfig::default();
        config.connection.password = "secret".into();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_connection_string_quotes() {
        let config = ConnectionConfig {
            password: "it's".into(),
            ..ConnectionConfig::default()
        };
        assert!(config.connection_string().contains("password='it\\'s'"));
        assert_eq!(config.display_string(), "postgres@localhost:5432/postgres");
    }

    #[test]
    fn test_defaults_merge() {
        let base = ClientDefaults {
            pretty_print: Some(true),
            fetch_rows: Some(100),
            ..ClientDefaults::default()
        };
        let call = ClientDefaults {
            pretty_print: Some(false),
            ..ClientDefaults::default()
        };
        let merged = base.merge(&call);
        assert_eq!(merged.pretty_print, Some(false));
        assert_eq!(merged.fetch_rows, Some(100));
    }

    #[test]
    fn test_model_file() {
        let model = ModelFile::from_toml(
            r#"
[[entity]]
name = "Continent"
table = "continents"
  [[entity.column]]
  name = "code"
  primary_key = true

[[entity]]
name = "Country"
table = "countries"
  [[entity.column]]
  name = "code"
  primary_key = true
  [[entity.column]]
  name = "continentCode"
  [[entity.column]]
  name = "status"
  enum = ["open", "closed"]
  default = "open"
  [[entity.embedded]]
  name = "capital"
  target = "City"
  prefix = "capital_"
  [[entity.association]]
  name = "continent"
  target = "Continent"
  source_key = "continentCode"
  target_key = "code"
  conditions = { "code !=" = "AN" }

[[entity]]
name = "City"
  [[entity.column]]
  name = "name"
"#,
        )
        .unwrap();
        let registry = model.into_registry().unwrap();
        assert_eq!(registry.names(), vec!["City", "Continent", "Country"]);
        let country = registry.require("Country").unwrap();
        assert_eq!(country.table_name, "countries");
        let status = country.column("status").unwrap();
        assert_eq!(status.default_value, Some(Value::from("open")));
        assert!(status.validate("Country", &Value::from("gone")).is_err());
        match country.field("continent") {
            Some(FieldMetadata::Association(a)) => {
                assert!(!a.association.is_to_many());
                assert!(a.association.conditions.is_some());
            }
            other => panic!("unexpected field {:?}", other),
        }
    }

    #[test]
    fn test_model_unknown_base() {
        let model = ModelFile::from_toml(
            r#"
[[entity]]
name = "Country"
extends = "Base"
"#,
        )
        .unwrap();
        assert!(matches!(model.into_registry(), Err(Error::Config(_))));
    }
}
