//! BigQuery type system
//!
//! Types are rendered the way BigQuery prints them in error messages and
//! in the console (`INT64`, `STRUCT<a INT64, b STRING>`, `ARRAY<DATE>`).

use serde::{Deserialize, Serialize};

/// A BigQuery SQL type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SqlType {
    Int64,
    Float64,
    Numeric,
    BigNumeric,
    Bool,
    String,
    Bytes,
    Date,
    Datetime,
    Time,
    Timestamp,
    Interval,
    Json,
    Geography,

    /// Structured type with named fields
    Struct {
        fields: Vec<StructField>,
    },

    /// Array type
    Array {
        element_type: Box<SqlType>,
    },

    /// Unknown type (cannot infer)
    Unknown,
}

/// A named field of a STRUCT type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub field_type: SqlType,
}

impl StructField {
    pub fn new(name: impl Into<String>, field_type: SqlType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

impl SqlType {
    /// Convert a BigQuery type name to a SqlType
    ///
    /// Accepts both the legacy schema names (`INTEGER`, `RECORD`) and the
    /// standard SQL names (`INT64`, `STRUCT`). Parameterized types such as
    /// `NUMERIC(10, 2)` map to their base type.
    pub fn from_bigquery(type_name: &str) -> SqlType {
        let trimmed = type_name.trim();

        // Handle parameterized types like NUMERIC(10,2) or ARRAY<STRING>
        let base_type = trimmed
            .split('(')
            .next()
            .unwrap_or(trimmed)
            .split('<')
            .next()
            .unwrap_or(trimmed)
            .trim()
            .to_uppercase();

        match base_type.as_str() {
            "BOOL" | "BOOLEAN" => SqlType::Bool,
            "INT64" | "INTEGER" | "INT" | "SMALLINT" | "BIGINT" | "TINYINT" | "BYTEINT" => {
                SqlType::Int64
            }
            "FLOAT64" | "FLOAT" => SqlType::Float64,
            "NUMERIC" | "DECIMAL" => SqlType::Numeric,
            "BIGNUMERIC" | "BIGDECIMAL" => SqlType::BigNumeric,
            "STRING" => SqlType::String,
            "BYTES" => SqlType::Bytes,
            "DATE" => SqlType::Date,
            "DATETIME" => SqlType::Datetime,
            "TIME" => SqlType::Time,
            "TIMESTAMP" => SqlType::Timestamp,
            "INTERVAL" => SqlType::Interval,
            "JSON" => SqlType::Json,
            "GEOGRAPHY" => SqlType::Geography,
            "ARRAY" => SqlType::Array {
                element_type: Box::new(Self::extract_array_element_type(trimmed)),
            },
            "STRUCT" | "RECORD" => SqlType::Struct { fields: vec![] },
            _ => SqlType::Unknown,
        }
    }

    /// Extract element type from ARRAY<TYPE>
    fn extract_array_element_type(type_str: &str) -> SqlType {
        if let (Some(start), Some(end)) = (type_str.find('<'), type_str.rfind('>')) {
            if start < end {
                return Self::from_bigquery(&type_str[start + 1..end]);
            }
        }
        SqlType::Unknown
    }

    /// Convenience constructor for arrays
    pub fn array_of(element_type: SqlType) -> SqlType {
        SqlType::Array {
            element_type: Box::new(element_type),
        }
    }

    /// Look up a struct field by name (case-insensitive)
    pub fn field(&self, name: &str) -> Option<&StructField> {
        match self {
            SqlType::Struct { fields } => fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)),
            _ => None,
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, SqlType::Struct { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Int64 | SqlType::Float64 | SqlType::Numeric | SqlType::BigNumeric
        )
    }

    /// Whether a value of this type can be passed where `target` is expected
    ///
    /// Mirrors BigQuery's implicit coercions for the cases that matter when
    /// picking a function overload: integers widen to the other numeric
    /// types, and `UNKNOWN` (untyped NULL, unresolved expressions) fits
    /// anywhere.
    pub fn coerces_to(&self, target: &SqlType) -> bool {
        if self == target || *self == SqlType::Unknown || *target == SqlType::Unknown {
            return true;
        }
        match (self, target) {
            (SqlType::Int64, SqlType::Float64 | SqlType::Numeric | SqlType::BigNumeric) => true,
            (SqlType::Numeric, SqlType::Float64 | SqlType::BigNumeric) => true,
            (SqlType::BigNumeric, SqlType::Float64) => true,
            (SqlType::Struct { .. }, SqlType::Struct { fields }) => fields.is_empty(),
            (SqlType::Array { element_type: a }, SqlType::Array { element_type: b }) => {
                a.coerces_to(b)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int64 => write!(f, "INT64"),
            Self::Float64 => write!(f, "FLOAT64"),
            Self::Numeric => write!(f, "NUMERIC"),
            Self::BigNumeric => write!(f, "BIGNUMERIC"),
            Self::Bool => write!(f, "BOOL"),
            Self::String => write!(f, "STRING"),
            Self::Bytes => write!(f, "BYTES"),
            Self::Date => write!(f, "DATE"),
            Self::Datetime => write!(f, "DATETIME"),
            Self::Time => write!(f, "TIME"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Interval => write!(f, "INTERVAL"),
            Self::Json => write!(f, "JSON"),
            Self::Geography => write!(f, "GEOGRAPHY"),
            Self::Struct { fields } => {
                write!(f, "STRUCT<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", field.name, field.field_type)?;
                }
                write!(f, ">")
            }
            Self::Array { element_type } => write!(f, "ARRAY<{}>", element_type),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping() {
        assert_eq!(SqlType::from_bigquery("INTEGER"), SqlType::Int64);
        assert_eq!(SqlType::from_bigquery("int64"), SqlType::Int64);
        assert_eq!(SqlType::from_bigquery("FLOAT"), SqlType::Float64);
        assert_eq!(SqlType::from_bigquery("BOOLEAN"), SqlType::Bool);
        assert_eq!(SqlType::from_bigquery("NUMERIC(10,2)"), SqlType::Numeric);
        assert_eq!(SqlType::from_bigquery("RECORD"), SqlType::Struct { fields: vec![] });
        assert_eq!(SqlType::from_bigquery("SOMETHING"), SqlType::Unknown);
    }

    #[test]
    fn test_array_type_parsing() {
        assert_eq!(
            SqlType::from_bigquery("ARRAY<STRING>"),
            SqlType::array_of(SqlType::String)
        );
        assert_eq!(
            SqlType::from_bigquery("ARRAY<ARRAY<INT64>>"),
            SqlType::array_of(SqlType::array_of(SqlType::Int64))
        );
    }

    #[test]
    fn test_display() {
        let ty = SqlType::Struct {
            fields: vec![
                StructField::new("a", SqlType::Int64),
                StructField::new("b", SqlType::array_of(SqlType::String)),
            ],
        };
        assert_eq!(ty.to_string(), "STRUCT<a INT64, b ARRAY<STRING>>");
        assert_eq!(SqlType::Timestamp.to_string(), "TIMESTAMP");
    }

    #[test]
    fn test_coercion() {
        assert!(SqlType::Int64.coerces_to(&SqlType::Float64));
        assert!(SqlType::Unknown.coerces_to(&SqlType::String));
        assert!(!SqlType::String.coerces_to(&SqlType::Int64));
        assert!(!SqlType::Float64.coerces_to(&SqlType::Int64));
    }

    #[test]
    fn test_struct_field_lookup() {
        let ty = SqlType::Struct {
            fields: vec![StructField::new("City", SqlType::String)],
        };
        assert_eq!(ty.field("city").map(|f| &f.field_type), Some(&SqlType::String));
        assert!(ty.field("zip").is_none());
        assert!(SqlType::Int64.field("city").is_none());
    }
}
