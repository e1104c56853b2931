//! Schema and metadata types for tables and columns.
//!
//! These types provide an engine-agnostic representation of catalog metadata.
//! Native type strings from either engine are collapsed into [`SemanticType`],
//! which drives value conversion and cross-engine DDL mapping.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value::SqlValue;

/// Engine-independent classification of a column's type.
///
/// Derived from each engine's information-schema metadata. Values whose
/// semantic type implies no transformation pass through the conversion
/// layer unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Decimal,
    Boolean,
    Text,
    Timestamp,
    Uuid,
    Json,
    Binary,
    Enum,
    Array,
}

impl SemanticType {
    /// Derive the semantic type from PostgreSQL information-schema metadata.
    ///
    /// `data_type` distinguishes arrays and user-defined types; `udt_name`
    /// carries the concrete type for everything else. Unknown types map to
    /// `Text`: the reader casts them to text and the conversion layer passes
    /// them through unchanged.
    pub fn from_postgres(data_type: &str, udt_name: &str) -> Self {
        let udt = udt_name.to_lowercase();
        match data_type.to_uppercase().as_str() {
            "ARRAY" => return SemanticType::Array,
            "USER-DEFINED" => return SemanticType::Enum,
            _ => {}
        }
        if udt.starts_with('_') {
            return SemanticType::Array;
        }
        match udt.as_str() {
            "bool" => SemanticType::Boolean,
            "int2" | "int4" | "int8" | "oid" => SemanticType::Integer,
            "numeric" | "float4" | "float8" | "money" => SemanticType::Decimal,
            "text" | "varchar" | "bpchar" | "name" | "citext" => SemanticType::Text,
            "timestamp" | "timestamptz" | "date" | "time" | "timetz" => SemanticType::Timestamp,
            "uuid" => SemanticType::Uuid,
            "json" | "jsonb" => SemanticType::Json,
            "bytea" => SemanticType::Binary,
            _ => SemanticType::Text,
        }
    }

    /// Derive the semantic type from MySQL information-schema metadata.
    ///
    /// `column_type` is needed to spot the `tinyint(1)` boolean convention
    /// and single-bit flags.
    pub fn from_mysql(data_type: &str, column_type: &str) -> Self {
        let dt = data_type.to_lowercase();
        let ct = column_type.to_lowercase();
        match dt.as_str() {
            "tinyint" if ct.starts_with("tinyint(1)") => SemanticType::Boolean,
            "bit" if ct.starts_with("bit(1)") => SemanticType::Boolean,
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
                SemanticType::Integer
            }
            "decimal" | "numeric" | "float" | "double" => SemanticType::Decimal,
            "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "set" => {
                SemanticType::Text
            }
            "enum" => SemanticType::Enum,
            "json" => SemanticType::Json,
            "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "bit" => {
                SemanticType::Binary
            }
            "datetime" | "timestamp" | "date" | "time" => SemanticType::Timestamp,
            // MariaDB 10.7+ native uuid type.
            "uuid" => SemanticType::Uuid,
            _ => SemanticType::Text,
        }
    }

    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "integer",
            SemanticType::Decimal => "decimal",
            SemanticType::Boolean => "boolean",
            SemanticType::Text => "text",
            SemanticType::Timestamp => "timestamp",
            SemanticType::Uuid => "uuid",
            SemanticType::Json => "json",
            SemanticType::Binary => "binary",
            SemanticType::Enum => "enum",
            SemanticType::Array => "array",
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Engine-independent semantic type.
    pub semantic: SemanticType,

    /// Native type string the semantic type was derived from
    /// (e.g. "int4", "varchar", "tinyint(1)").
    pub native_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Whether the column participates in the primary key.
    pub primary_key: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, semantic: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic,
            native_type: semantic.as_str().to_string(),
            nullable: true,
            primary_key: false,
        }
    }

    pub fn with_native_type(mut self, native: impl Into<String>) -> Self {
        self.native_type = native.into();
        self
    }

    pub fn as_primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// Table metadata with source-side columns and presence flags for each side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,

    /// Ordered column list (source side, ordinal order).
    pub columns: Vec<ColumnDescriptor>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Whether the table exists on the source.
    pub on_source: bool,

    /// Whether the table exists on the target.
    pub on_target: bool,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            on_source: false,
            on_target: false,
        }
    }

    /// Look up a column descriptor by exact name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check if the table has a single-column primary key.
    pub fn has_single_pk(&self) -> bool {
        self.primary_key.len() == 1
    }

    /// The column usable for keyset pagination: a single-column primary key
    /// whose values sort stably as literals (integers, uuids, text).
    pub fn keyset_column(&self) -> Option<&ColumnDescriptor> {
        if !self.has_single_pk() {
            return None;
        }
        let col = self.column(&self.primary_key[0])?;
        match col.semantic {
            SemanticType::Integer | SemanticType::Uuid | SemanticType::Text => Some(col),
            _ => None,
        }
    }
}

/// Foreign key reference, used only by the plan ordering sanity pass and
/// declared-constraint reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Constraint name.
    pub name: String,

    /// Referencing column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub referenced_table: String,

    /// Referenced column names.
    pub referenced_columns: Vec<String>,
}

/// A declared index to ensure on the target during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,

    /// Indexed column names, in order.
    pub columns: Vec<String>,

    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

/// A primary key value of one of the supported key shapes.
///
/// Used for keyset pagination bounds and for naming failed rows in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PkValue {
    /// Integer primary key (covers int, bigint, smallint).
    Int(i64),
    /// UUID primary key.
    Uuid(Uuid),
    /// String primary key (char, varchar, text).
    Text(String),
}

impl PkValue {
    /// Convert to a SQL literal string for use in keyset WHERE clauses.
    ///
    /// Single quotes are doubled, which is sufficient for key values
    /// (integers, uuids, short identifiers). Data values always go through
    /// parameterized statements; this is only for key bounds.
    pub fn to_sql_literal(&self) -> String {
        match self {
            PkValue::Int(v) => v.to_string(),
            PkValue::Uuid(v) => format!("'{}'", v),
            PkValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }

    /// Extract a key value from a row cell, if the cell holds a usable key.
    pub fn from_sql_value(value: &SqlValue<'_>) -> Option<PkValue> {
        match value {
            SqlValue::I16(v) => Some(PkValue::Int(*v as i64)),
            SqlValue::I32(v) => Some(PkValue::Int(*v as i64)),
            SqlValue::I64(v) => Some(PkValue::Int(*v)),
            SqlValue::Uuid(v) => Some(PkValue::Uuid(*v)),
            SqlValue::Text(v) => Some(PkValue::Text(v.clone().into_owned())),
            _ => None,
        }
    }
}

impl std::fmt::Display for PkValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PkValue::Int(v) => write!(f, "{}", v),
            PkValue::Uuid(v) => write!(f, "{}", v),
            PkValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for PkValue {
    fn from(v: i64) -> Self {
        PkValue::Int(v)
    }
}

impl From<Uuid> for PkValue {
    fn from(v: Uuid) -> Self {
        PkValue::Uuid(v)
    }
}

impl From<&str> for PkValue {
    fn from(v: &str) -> Self {
        PkValue::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_column(name: &str, semantic: SemanticType) -> ColumnDescriptor {
        ColumnDescriptor::new(name, semantic)
    }

    fn make_test_table(columns: Vec<ColumnDescriptor>, pk: &[&str]) -> TableDescriptor {
        TableDescriptor {
            name: "test_table".to_string(),
            columns,
            primary_key: pk.iter().map(|s| s.to_string()).collect(),
            on_source: true,
            on_target: true,
        }
    }

    #[test]
    fn test_semantic_from_postgres() {
        assert_eq!(
            SemanticType::from_postgres("boolean", "bool"),
            SemanticType::Boolean
        );
        assert_eq!(
            SemanticType::from_postgres("integer", "int4"),
            SemanticType::Integer
        );
        assert_eq!(
            SemanticType::from_postgres("numeric", "numeric"),
            SemanticType::Decimal
        );
        assert_eq!(
            SemanticType::from_postgres("character varying", "varchar"),
            SemanticType::Text
        );
        assert_eq!(
            SemanticType::from_postgres("timestamp with time zone", "timestamptz"),
            SemanticType::Timestamp
        );
        assert_eq!(
            SemanticType::from_postgres("uuid", "uuid"),
            SemanticType::Uuid
        );
        assert_eq!(
            SemanticType::from_postgres("jsonb", "jsonb"),
            SemanticType::Json
        );
        assert_eq!(
            SemanticType::from_postgres("bytea", "bytea"),
            SemanticType::Binary
        );
        // enum types surface as USER-DEFINED with the type name in udt_name
        assert_eq!(
            SemanticType::from_postgres("USER-DEFINED", "appointment_status"),
            SemanticType::Enum
        );
        // arrays surface as ARRAY with an underscore-prefixed udt
        assert_eq!(
            SemanticType::from_postgres("ARRAY", "_text"),
            SemanticType::Array
        );
        // unknown exotic types degrade to text
        assert_eq!(
            SemanticType::from_postgres("inet", "inet"),
            SemanticType::Text
        );
    }

    #[test]
    fn test_semantic_from_mysql() {
        assert_eq!(
            SemanticType::from_mysql("tinyint", "tinyint(1)"),
            SemanticType::Boolean
        );
        assert_eq!(
            SemanticType::from_mysql("tinyint", "tinyint(4)"),
            SemanticType::Integer
        );
        assert_eq!(
            SemanticType::from_mysql("bigint", "bigint(20)"),
            SemanticType::Integer
        );
        assert_eq!(
            SemanticType::from_mysql("decimal", "decimal(10,2)"),
            SemanticType::Decimal
        );
        assert_eq!(
            SemanticType::from_mysql("varchar", "varchar(255)"),
            SemanticType::Text
        );
        assert_eq!(
            SemanticType::from_mysql("enum", "enum('a','b')"),
            SemanticType::Enum
        );
        assert_eq!(SemanticType::from_mysql("json", "json"), SemanticType::Json);
        assert_eq!(
            SemanticType::from_mysql("longblob", "longblob"),
            SemanticType::Binary
        );
        assert_eq!(
            SemanticType::from_mysql("datetime", "datetime"),
            SemanticType::Timestamp
        );
        assert_eq!(
            SemanticType::from_mysql("geometry", "geometry"),
            SemanticType::Text
        );
    }

    #[test]
    fn test_pk_value_literals() {
        let int_pk = PkValue::Int(42);
        assert_eq!(int_pk.to_sql_literal(), "42");

        let uuid_pk = PkValue::Uuid(Uuid::nil());
        assert_eq!(
            uuid_pk.to_sql_literal(),
            "'00000000-0000-0000-0000-000000000000'"
        );

        let string_pk = PkValue::Text("O'Brien".to_string());
        assert_eq!(string_pk.to_sql_literal(), "'O''Brien'");
    }

    #[test]
    fn test_pk_value_from_sql_value() {
        assert_eq!(
            PkValue::from_sql_value(&SqlValue::I32(7)),
            Some(PkValue::Int(7))
        );
        assert_eq!(
            PkValue::from_sql_value(&SqlValue::text_owned("k1".into())),
            Some(PkValue::Text("k1".into()))
        );
        assert_eq!(PkValue::from_sql_value(&SqlValue::Null), None);
        assert_eq!(PkValue::from_sql_value(&SqlValue::Bool(true)), None);
    }

    #[test]
    fn test_keyset_column() {
        let table = make_test_table(
            vec![
                make_test_column("id", SemanticType::Integer).as_primary_key(),
                make_test_column("name", SemanticType::Text),
            ],
            &["id"],
        );
        assert_eq!(table.keyset_column().map(|c| c.name.as_str()), Some("id"));

        // uuid keys paginate as literals
        let table = make_test_table(
            vec![make_test_column("id", SemanticType::Uuid).as_primary_key()],
            &["id"],
        );
        assert!(table.keyset_column().is_some());

        // composite keys do not
        let table = make_test_table(
            vec![
                make_test_column("a", SemanticType::Integer).as_primary_key(),
                make_test_column("b", SemanticType::Integer).as_primary_key(),
            ],
            &["a", "b"],
        );
        assert!(table.keyset_column().is_none());

        // timestamp keys do not
        let table = make_test_table(
            vec![make_test_column("at", SemanticType::Timestamp).as_primary_key()],
            &["at"],
        );
        assert!(table.keyset_column().is_none());

        // a pk name with no matching column does not
        let table = make_test_table(vec![], &["ghost"]);
        assert!(table.keyset_column().is_none());
    }

    #[test]
    fn test_column_lookup_is_case_sensitive() {
        let table = make_test_table(
            vec![make_test_column("CreatedAt", SemanticType::Timestamp)],
            &[],
        );
        assert!(table.column("CreatedAt").is_some());
        assert!(table.column("createdat").is_none());
    }
}
