//! Table metadata as reported by BigQuery

use crate::types::{SqlType, StructField};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column mode of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    Nullable,
    Required,
    Repeated,
}

/// One field of a table schema
///
/// Serialized with the same keys BigQuery uses in `bq show --schema`, so the
/// YAML rendering shown on hover reads like the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Column name
    pub name: String,

    /// BigQuery type name as reported by the API (`INTEGER`, `RECORD`, ...)
    #[serde(rename = "type")]
    pub field_type: String,

    /// Column mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FieldMode>,

    /// Column description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Nested fields of RECORD/STRUCT columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SchemaField>,
}

impl SchemaField {
    /// Create a new nullable field
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: None,
            description: String::new(),
            fields: Vec::new(),
        }
    }

    /// Set the mode
    pub fn with_mode(mut self, mode: FieldMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set nested fields
    pub fn with_fields(mut self, fields: Vec<SchemaField>) -> Self {
        self.fields = fields;
        self
    }

    /// SQL type of the column, including nested fields and REPEATED mode
    pub fn sql_type(&self) -> SqlType {
        let base = match SqlType::from_bigquery(&self.field_type) {
            SqlType::Struct { .. } => SqlType::Struct {
                fields: self
                    .fields
                    .iter()
                    .map(|f| StructField::new(f.name.clone(), f.sql_type()))
                    .collect(),
            },
            other => other,
        };

        match self.mode {
            Some(FieldMode::Repeated) => SqlType::array_of(base),
            _ => base,
        }
    }
}

/// Metadata of a BigQuery table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Fully qualified id (`project:dataset.table`)
    pub full_id: String,

    /// Table description
    #[serde(default)]
    pub description: String,

    /// When the table was created
    pub creation_time: DateTime<Utc>,

    /// When the table was last modified
    pub last_modified_time: DateTime<Utc>,

    /// Ordered top-level schema fields
    #[serde(default)]
    pub schema: Vec<SchemaField>,
}

impl TableMetadata {
    /// Create metadata with both timestamps set to `created`
    pub fn new(full_id: impl Into<String>, created: DateTime<Utc>, schema: Vec<SchemaField>) -> Self {
        Self {
            full_id: full_id.into(),
            description: String::new(),
            creation_time: created,
            last_modified_time: created,
            schema,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the last modification time
    pub fn with_last_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.last_modified_time = modified;
        self
    }

    /// Find a top-level field by name
    pub fn find_field(&self, name: &str) -> Option<&SchemaField> {
        self.schema.iter().find(|f| f.name == name)
    }

    /// Get field names
    pub fn field_names(&self) -> Vec<&str> {
        self.schema.iter().map(|f| f.name.as_str()).collect()
    }
}
