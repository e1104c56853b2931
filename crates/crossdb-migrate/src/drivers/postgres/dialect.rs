//! PostgreSQL SQL building.
//!
//! Unlike MySQL, statements qualify table names with the configured schema,
//! and row values bind through `$N` placeholders.

use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, IndexSpec, PkValue, SemanticType};
use crate::core::traits::{ConflictPolicy, WriteSpec};

/// SQL builders shared by the PostgreSQL reader and writer.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Quote a PostgreSQL identifier, doubling embedded double quotes.
    pub fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Schema-qualified table reference.
    pub fn qualified(schema: &str, table: &str) -> String {
        format!("{}.{}", Self::quote_ident(schema), Self::quote_ident(table))
    }

    fn column_list(columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SELECT expression for one column.
    ///
    /// Types the driver cannot decode natively are cast in SQL: enum labels
    /// and exotic text-ish types (inet, citext, interval, ...) go through
    /// `::text`, arrays through `to_jsonb`, and money through `::numeric`.
    pub fn select_expr(col: &ColumnDescriptor) -> String {
        let quoted = Self::quote_ident(&col.name);
        let native = col.native_type.to_lowercase();
        match col.semantic {
            SemanticType::Enum => format!("{}::text", quoted),
            SemanticType::Array => format!("to_jsonb({})", quoted),
            SemanticType::Decimal if native == "money" => format!("{}::numeric", quoted),
            SemanticType::Timestamp if native == "timetz" => format!("{}::text", quoted),
            SemanticType::Text
                if !matches!(native.as_str(), "text" | "varchar" | "bpchar" | "name") =>
            {
                format!("{}::text", quoted)
            }
            _ => quoted,
        }
    }

    fn select_list(columns: &[ColumnDescriptor]) -> String {
        columns
            .iter()
            .map(Self::select_expr)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SELECT one page of rows ordered by the keyset column.
    ///
    /// The key bound is rendered inline, same as the MySQL side: it changes
    /// every page and covers only integer, uuid and short text shapes.
    pub fn build_keyset_page(
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        key: &str,
        after: Option<&PkValue>,
        batch_size: usize,
    ) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}",
            Self::select_list(columns),
            Self::qualified(schema, table)
        );
        if let Some(last) = after {
            sql.push_str(&format!(
                " WHERE {} > {}",
                Self::quote_ident(key),
                last.to_sql_literal()
            ));
        }
        sql.push_str(&format!(
            " ORDER BY {} LIMIT {}",
            Self::quote_ident(key),
            batch_size
        ));
        sql
    }

    /// SELECT one page of rows with OFFSET pagination, for tables without a
    /// single sortable primary key.
    pub fn build_offset_page(
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        offset: u64,
        batch_size: usize,
    ) -> String {
        format!(
            "SELECT {} FROM {} LIMIT {} OFFSET {}",
            Self::select_list(columns),
            Self::qualified(schema, table),
            batch_size,
            offset
        )
    }

    /// Single-row INSERT shaped by the conflict policy.
    ///
    /// With a primary key, `keep_existing` becomes `ON CONFLICT (pk) DO
    /// NOTHING` (zero rows affected for duplicates) and `overwrite` updates
    /// every non-key column from EXCLUDED. Without a primary key the
    /// statement degrades to the bare `ON CONFLICT DO NOTHING` form.
    pub fn build_insert(schema: &str, spec: &WriteSpec) -> String {
        let table = Self::qualified(schema, &spec.table);
        let col_list = spec
            .columns
            .iter()
            .map(|c| Self::quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=spec.columns.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");

        if spec.pk_columns.is_empty() {
            return format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
                table, col_list, placeholders
            );
        }

        let conflict_target = spec
            .pk_columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        match spec.policy {
            ConflictPolicy::KeepExisting => format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
                table, col_list, placeholders, conflict_target
            ),
            ConflictPolicy::Overwrite => {
                let non_pk: Vec<&ColumnDescriptor> = spec
                    .columns
                    .iter()
                    .filter(|c| !spec.pk_columns.contains(&c.name))
                    .collect();
                if non_pk.is_empty() {
                    // Key-only table: nothing to update on conflict.
                    return format!(
                        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
                        table, col_list, placeholders, conflict_target
                    );
                }
                let update_set = non_pk
                    .iter()
                    .map(|c| {
                        let q = Self::quote_ident(&c.name);
                        format!("{} = EXCLUDED.{}", q, q)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
                    table, col_list, placeholders, conflict_target, update_set
                )
            }
        }
    }

    /// ALTER TABLE ... ADD COLUMN. Reconciled columns are always nullable so
    /// rows already on the target stay valid.
    pub fn build_add_column(schema: &str, table: &str, column: &str, native_type: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {} NULL",
            Self::qualified(schema, table),
            Self::quote_ident(column),
            native_type
        )
    }

    /// CREATE INDEX on the qualified table.
    pub fn build_create_index(schema: &str, table: &str, spec: &IndexSpec) -> String {
        let unique = if spec.unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            Self::quote_ident(&spec.name),
            Self::qualified(schema, table),
            Self::column_list(&spec.columns)
        )
    }

    /// ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY. The referenced table
    /// lives in the same schema as the referencing one.
    pub fn build_create_foreign_key(schema: &str, table: &str, fk: &ForeignKeyRef) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            Self::qualified(schema, table),
            Self::quote_ident(&fk.name),
            Self::column_list(&fk.columns),
            Self::qualified(schema, &fk.referenced_table),
            Self::column_list(&fk.referenced_columns)
        )
    }

    /// Default PostgreSQL column type for a column sourced from another
    /// engine.
    pub fn default_type_for(semantic: SemanticType) -> &'static str {
        match semantic {
            SemanticType::Integer => "BIGINT",
            SemanticType::Decimal => "NUMERIC(38,10)",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Text => "TEXT",
            SemanticType::Timestamp => "TIMESTAMP",
            SemanticType::Uuid => "UUID",
            SemanticType::Json => "JSONB",
            SemanticType::Binary => "BYTEA",
            SemanticType::Enum => "TEXT",
            SemanticType::Array => "JSONB",
        }
    }
}
