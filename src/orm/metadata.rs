/// Entity metadata model.
///
/// An entity is a table plus an ordered list of fields. Fields are plain
/// columns, embedded objects stored in the same table, or associations to
/// other entities. Metadata is built once through [`EntityBuilder`] and
/// shared behind an `Arc`.
use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;
use serde::Deserialize;

use super::association::{AssociationNode, TypeThunk};
use crate::ast::types::Value;
use crate::error::{Error, Result};

/// Column data type, as far as hydration and validation need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    Json,
    Bytes,
}

/// Per-column value conversion applied while hydrating rows.
pub type ValueTransform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct ColumnField {
    pub name: String,
    /// Physical column name.
    pub column: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub not_null: bool,
    /// Never projected.
    pub hidden: bool,
    /// Projected only when requested by name.
    pub exclusive: bool,
    pub insert: bool,
    pub update: bool,
    pub is_array: bool,
    pub default_value: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    pub transform: Option<ValueTransform>,
}

impl fmt::Debug for ColumnField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnField")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("data_type", &self.data_type)
            .field("primary_key", &self.primary_key)
            .field("hidden", &self.hidden)
            .field("exclusive", &self.exclusive)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl ColumnField {
    /// A text column whose physical name is the snake_case property name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: name.to_snake_case(),
            name,
            data_type: DataType::Text,
            primary_key: false,
            not_null: false,
            hidden: false,
            exclusive: false,
            insert: true,
            update: true,
            is_array: false,
            default_value: None,
            enum_values: None,
            transform: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn no_insert(mut self) -> Self {
        self.insert = false;
        self
    }

    pub fn no_update(mut self) -> Self {
        self.update = false;
        self
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn enum_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn transform(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }

    /// Check a value about to be written to this column.
    pub fn validate(&self, entity: &str, value: &Value) -> Result<()> {
        if value.is_null() {
            if self.not_null && self.default_value.is_none() {
                return Err(Error::invalid_argument(format!(
                    "{}.{} can not be null",
                    entity, self.name
                )));
            }
            return Ok(());
        }
        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                let list: Vec<String> = allowed.iter().map(Value::display).collect();
                return Err(Error::invalid_argument(format!(
                    "{}.{} value must be one of ({})",
                    entity,
                    self.name,
                    list.join(",")
                )));
            }
        }
        Ok(())
    }

    /// Apply the column transform, if any.
    pub fn convert(&self, value: Value) -> Value {
        match &self.transform {
            Some(f) => f(&value),
            None => value,
        }
    }
}

/// Nested object mapped onto columns of the owning table.
#[derive(Debug, Clone)]
pub struct EmbeddedField {
    pub name: String,
    pub target: TypeThunk,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssociationField {
    pub name: String,
    pub association: Arc<AssociationNode>,
    /// Fetched on demand instead of with the owning row.
    pub lazy: bool,
}

#[derive(Debug, Clone)]
pub enum FieldMetadata {
    Column(ColumnField),
    Embedded(EmbeddedField),
    Association(AssociationField),
}

impl FieldMetadata {
    pub fn name(&self) -> &str {
        match self {
            FieldMetadata::Column(c) => &c.name,
            FieldMetadata::Embedded(e) => &e.name,
            FieldMetadata::Association(a) => &a.name,
        }
    }

    pub fn as_column(&self) -> Option<&ColumnField> {
        match self {
            FieldMetadata::Column(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub name: String,
    pub table_name: String,
    pub schema: Option<String>,
    pub fields: Vec<FieldMetadata>,
}

impl EntityMetadata {
    pub fn builder(name: impl Into<String>) -> EntityBuilder {
        EntityBuilder::new(name)
    }

    /// Case-insensitive field lookup.
    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnField> {
        self.field(name).and_then(FieldMetadata::as_column)
    }

    /// Column field or an error naming the entity.
    pub fn require_column(&self, name: &str) -> Result<&ColumnField> {
        self.column(name).ok_or_else(|| Error::UnknownElement {
            entity: self.name.clone(),
            element: name.to_string(),
            path: name.to_string(),
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnField> {
        self.fields.iter().filter_map(FieldMetadata::as_column)
    }

    pub fn primary_key(&self) -> Vec<&ColumnField> {
        self.columns().filter(|c| c.primary_key).collect()
    }

    /// `schema.table` or just the table name.
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table_name),
            None => self.table_name.clone(),
        }
    }
}

/// Builder for [`EntityMetadata`]. Field names are checked for uniqueness
/// (case-insensitive) in [`EntityBuilder::build`].
#[derive(Debug)]
pub struct EntityBuilder {
    name: String,
    table_name: Option<String>,
    schema: Option<String>,
    fields: Vec<FieldMetadata>,
}

impl EntityBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            schema: None,
            fields: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Inherit the fields of `base`; they come before fields declared here.
    pub fn extends(mut self, base: &EntityMetadata) -> Self {
        let mut fields = base.fields.clone();
        fields.append(&mut self.fields);
        self.fields = fields;
        if self.table_name.is_none() {
            self.table_name = Some(base.table_name.clone());
        }
        if self.schema.is_none() {
            self.schema = base.schema.clone();
        }
        self
    }

    pub fn column(mut self, column: ColumnField) -> Self {
        self.fields.push(FieldMetadata::Column(column));
        self
    }

    pub fn embedded(mut self, name: impl Into<String>, target: TypeThunk) -> Self {
        self.fields.push(FieldMetadata::Embedded(EmbeddedField {
            name: name.into(),
            target,
            prefix: None,
            suffix: None,
        }));
        self
    }

    /// Embedded object whose columns carry a prefix and/or suffix.
    pub fn embedded_with(
        mut self,
        name: impl Into<String>,
        target: TypeThunk,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Self {
        self.fields.push(FieldMetadata::Embedded(EmbeddedField {
            name: name.into(),
            target,
            prefix: prefix.map(str::to_string),
            suffix: suffix.map(str::to_string),
        }));
        self
    }

    pub fn association(self, name: impl Into<String>, association: AssociationNode) -> Self {
        self.association_field(name, association, false)
    }

    pub fn lazy_association(self, name: impl Into<String>, association: AssociationNode) -> Self {
        self.association_field(name, association, true)
    }

    fn association_field(mut self, name: impl Into<String>, association: AssociationNode, lazy: bool) -> Self {
        self.fields.push(FieldMetadata::Association(AssociationField {
            name: name.into(),
            association: Arc::new(association),
            lazy,
        }));
        self
    }

    pub fn build(self) -> Result<EntityMetadata> {
        for (i, field) in self.fields.iter().enumerate() {
            let duplicate = self.fields[..i]
                .iter()
                .any(|f| f.name().eq_ignore_ascii_case(field.name()));
            if duplicate {
                return Err(Error::invalid_argument(format!(
                    "{} already has a field named `{}`",
                    self.name,
                    field.name()
                )));
            }
        }
        Ok(EntityMetadata {
            table_name: self
                .table_name
                .unwrap_or_else(|| self.name.to_snake_case()),
            name: self.name,
            schema: self.schema,
            fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> EntityMetadata {
        EntityMetadata::builder("Person")
            .column(ColumnField::new("id").data_type(DataType::Integer).primary_key())
            .column(ColumnField::new("givenName"))
            .column(ColumnField::new("gender").enum_values(["M", "F"]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let p = person();
        assert_eq!(p.table_name, "person");
        assert_eq!(p.column("givenname").unwrap().column, "given_name");
        assert_eq!(p.primary_key().len(), 1);
        assert!(p.column("id").unwrap().not_null);
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let err = EntityMetadata::builder("T")
            .column(ColumnField::new("id"))
            .column(ColumnField::new("ID"))
            .build();
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_extends_puts_base_fields_first() {
        let base = person();
        let employee = EntityMetadata::builder("Employee")
            .column(ColumnField::new("salary").data_type(DataType::Float))
            .extends(&base)
            .build()
            .unwrap();
        let names: Vec<&str> = employee.fields.iter().map(FieldMetadata::name).collect();
        assert_eq!(names, vec!["id", "givenName", "gender", "salary"]);
        assert_eq!(employee.table_name, "person");
    }

    #[test]
    fn test_validate_enum_and_null() {
        let p = person();
        let gender = p.column("gender").unwrap();
        assert!(gender.validate("Person", &Value::from("M")).is_ok());
        assert!(gender.validate("Person", &Value::from("X")).is_err());
        assert!(p.column("id").unwrap().validate("Person", &Value::Null).is_err());
    }

    #[test]
    fn test_transform() {
        let c = ColumnField::new("flag").transform(|v| Value::Bool(v == &Value::Int(1)));
        assert_eq!(c.convert(Value::Int(1)), Value::Bool(true));
        assert_eq!(ColumnField::new("x").convert(Value::Int(1)), Value::Int(1));
    }
}
