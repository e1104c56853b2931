//! information_schema introspection shared by the MySQL reader and writer.
//!
//! String-valued catalog columns are cast to CHAR: depending on server
//! version and collation they otherwise come back binary-collated and decode
//! inconsistently between MySQL and MariaDB.

use mysql_async::prelude::*;
use mysql_async::Conn;

use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, SemanticType};
use crate::error::Result;

use super::dialect::MysqlDialect;

pub(super) async fn list_tables(conn: &mut Conn, database: &str) -> Result<Vec<String>> {
    let query = r#"
        SELECT CAST(TABLE_NAME AS CHAR(255))
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
    "#;

    let tables: Vec<String> = conn.exec(query, (database,)).await?;
    Ok(tables)
}

pub(super) async fn list_columns(
    conn: &mut Conn,
    database: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let query = r#"
        SELECT
            CAST(COLUMN_NAME AS CHAR(255)),
            CAST(DATA_TYPE AS CHAR(64)),
            CAST(COLUMN_TYPE AS CHAR(1024)),
            CAST(IS_NULLABLE AS CHAR(3)),
            CAST(COLUMN_KEY AS CHAR(3))
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    "#;

    let rows: Vec<(String, String, String, String, String)> =
        conn.exec(query, (database, table)).await?;

    let columns = rows
        .into_iter()
        .map(
            |(name, data_type, column_type, is_nullable, column_key)| ColumnDescriptor {
                name,
                semantic: SemanticType::from_mysql(&data_type, &column_type),
                native_type: column_type,
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
                primary_key: column_key.eq_ignore_ascii_case("PRI"),
            },
        )
        .collect();

    Ok(columns)
}

pub(super) async fn list_foreign_keys(
    conn: &mut Conn,
    database: &str,
    table: &str,
) -> Result<Vec<ForeignKeyRef>> {
    let query = r#"
        SELECT
            CAST(CONSTRAINT_NAME AS CHAR(255)),
            CAST(COLUMN_NAME AS CHAR(255)),
            CAST(REFERENCED_TABLE_NAME AS CHAR(255)),
            CAST(REFERENCED_COLUMN_NAME AS CHAR(255))
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
          AND REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
    "#;

    let rows: Vec<(String, String, String, String)> =
        conn.exec(query, (database, table)).await?;

    // Rows arrive ordered by constraint then column position; fold runs of
    // the same constraint into one multi-column reference.
    let mut fks: Vec<ForeignKeyRef> = Vec::new();
    for (name, column, ref_table, ref_column) in rows {
        match fks.last_mut() {
            Some(fk) if fk.name == name => {
                fk.columns.push(column);
                fk.referenced_columns.push(ref_column);
            }
            _ => fks.push(ForeignKeyRef {
                name,
                columns: vec![column],
                referenced_table: ref_table,
                referenced_columns: vec![ref_column],
            }),
        }
    }

    Ok(fks)
}

pub(super) async fn count_rows(conn: &mut Conn, table: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}",
        MysqlDialect::quote_ident(table)
    );
    let count: Option<i64> = conn.query_first(&sql).await?;
    Ok(count.unwrap_or(0))
}

pub(super) async fn index_exists(
    conn: &mut Conn,
    database: &str,
    table: &str,
    name: &str,
) -> Result<bool> {
    let query = r#"
        SELECT COUNT(*)
        FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND INDEX_NAME = ?
    "#;

    let count: Option<i64> = conn.exec_first(query, (database, table, name)).await?;
    Ok(count.unwrap_or(0) > 0)
}

pub(super) async fn constraint_exists(
    conn: &mut Conn,
    database: &str,
    table: &str,
    name: &str,
) -> Result<bool> {
    let query = r#"
        SELECT COUNT(*)
        FROM information_schema.TABLE_CONSTRAINTS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = ?
    "#;

    let count: Option<i64> = conn.exec_first(query, (database, table, name)).await?;
    Ok(count.unwrap_or(0) > 0)
}
