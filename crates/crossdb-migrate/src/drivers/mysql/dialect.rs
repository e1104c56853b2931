//! MySQL/MariaDB SQL building.
//!
//! All statements run in the database the pool is pinned to, so table names
//! stay unqualified.

use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, IndexSpec, PkValue, SemanticType};
use crate::core::traits::{ConflictPolicy, WriteSpec};

/// SQL builders shared by the MySQL reader and writer.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Quote a MySQL identifier, doubling embedded backticks.
    pub fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn column_list(columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SELECT one page of rows ordered by the keyset column.
    ///
    /// `after` is rendered as an inline literal: the key advances every page,
    /// so a prepared statement would buy nothing, and key shapes are
    /// restricted to integers, uuids and short text.
    pub fn build_keyset_page(
        table: &str,
        columns: &[String],
        key: &str,
        after: Option<&PkValue>,
        batch_size: usize,
    ) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}",
            Self::column_list(columns),
            Self::quote_ident(table)
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

    /// SELECT one page of rows with OFFSET pagination.
    ///
    /// Used for tables without a single sortable primary key. Row order is
    /// not stable under concurrent writes, which the copy tolerates because
    /// it runs inside a maintenance window.
    pub fn build_offset_page(
        table: &str,
        columns: &[String],
        offset: u64,
        batch_size: usize,
    ) -> String {
        format!(
            "SELECT {} FROM {} LIMIT {} OFFSET {}",
            Self::column_list(columns),
            Self::quote_ident(table),
            batch_size,
            offset
        )
    }

    /// Single-row INSERT shaped by the conflict policy.
    ///
    /// With a primary key, `keep_existing` uses a self-assignment upsert
    /// (`pk = pk`), which reports zero affected rows for duplicates instead
    /// of erroring; `overwrite` updates every non-key column from the
    /// incoming row. Without a primary key the statement degrades to
    /// INSERT IGNORE.
    pub fn build_insert(spec: &WriteSpec) -> String {
        let table = Self::quote_ident(&spec.table);
        let col_list = spec
            .columns
            .iter()
            .map(|c| Self::quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; spec.columns.len()].join(", ");

        if spec.pk_columns.is_empty() {
            return format!(
                "INSERT IGNORE INTO {} ({}) VALUES ({})",
                table, col_list, placeholders
            );
        }

        match spec.policy {
            ConflictPolicy::KeepExisting => {
                let pk = Self::quote_ident(&spec.pk_columns[0]);
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {} = {}",
                    table, col_list, placeholders, pk, pk
                )
            }
            ConflictPolicy::Overwrite => {
                let non_pk: Vec<&ColumnDescriptor> = spec
                    .columns
                    .iter()
                    .filter(|c| !spec.pk_columns.contains(&c.name))
                    .collect();
                if non_pk.is_empty() {
                    // Key-only table: nothing to update on conflict.
                    return format!(
                        "INSERT IGNORE INTO {} ({}) VALUES ({})",
                        table, col_list, placeholders
                    );
                }
                let update_set = non_pk
                    .iter()
                    .map(|c| {
                        let q = Self::quote_ident(&c.name);
                        format!("{} = VALUES({})", q, q)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                    table, col_list, placeholders, update_set
                )
            }
        }
    }

    /// ALTER TABLE ... ADD COLUMN. Reconciled columns are always nullable so
    /// rows already on the target stay valid.
    pub fn build_add_column(table: &str, column: &str, native_type: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {} NULL",
            Self::quote_ident(table),
            Self::quote_ident(column),
            native_type
        )
    }

    /// CREATE INDEX with prefix lengths for TEXT/BLOB columns, which MySQL
    /// cannot index in full.
    pub fn build_create_index(
        table: &str,
        spec: &IndexSpec,
        table_columns: &[ColumnDescriptor],
    ) -> String {
        let idx_cols: Vec<String> = spec
            .columns
            .iter()
            .map(|col_name| {
                let quoted = Self::quote_ident(col_name);
                if let Some(col) = table_columns.iter().find(|c| &c.name == col_name) {
                    let native = col.native_type.to_lowercase();
                    if native.contains("text") || native.contains("blob") {
                        return format!("{}(255)", quoted);
                    }
                }
                quoted
            })
            .collect();

        let unique = if spec.unique { "UNIQUE " } else { "" };

        format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            Self::quote_ident(&spec.name),
            Self::quote_ident(table),
            idx_cols.join(", ")
        )
    }

    /// ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY.
    pub fn build_create_foreign_key(table: &str, fk: &ForeignKeyRef) -> String {
        let fk_cols = Self::column_list(&fk.columns);
        let ref_cols = Self::column_list(&fk.referenced_columns);

        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            Self::quote_ident(table),
            Self::quote_ident(&fk.name),
            fk_cols,
            Self::quote_ident(&fk.referenced_table),
            ref_cols
        )
    }

    /// Default MySQL column type for a column sourced from another engine.
    pub fn default_type_for(semantic: SemanticType) -> &'static str {
        match semantic {
            SemanticType::Integer => "BIGINT",
            SemanticType::Decimal => "DECIMAL(38,10)",
            SemanticType::Boolean => "TINYINT(1)",
            SemanticType::Text => "TEXT",
            SemanticType::Timestamp => "DATETIME",
            SemanticType::Uuid => "CHAR(36)",
            SemanticType::Json => "JSON",
            SemanticType::Binary => "LONGBLOB",
            SemanticType::Enum => "VARCHAR(255)",
            SemanticType::Array => "JSON",
        }
    }
}
