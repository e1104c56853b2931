//! information_schema/pg_catalog introspection shared by the PostgreSQL
//! reader and writer.

use deadpool_postgres::Client;

use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, SemanticType};
use crate::error::Result;

use super::dialect::PostgresDialect;

pub(super) async fn list_tables(client: &Client, schema: &str) -> Result<Vec<String>> {
    let query = r#"
        SELECT table_name
        FROM information_schema.tables
        WHERE table_schema = $1 AND table_type = 'BASE TABLE'
        ORDER BY table_name
    "#;

    let rows = client.query(query, &[&schema]).await?;
    Ok(rows.into_iter().map(|r| r.get(0)).collect())
}

pub(super) async fn list_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let query = r#"
        SELECT
            column_name,
            data_type,
            udt_name,
            CASE WHEN is_nullable = 'YES' THEN true ELSE false END
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
    "#;

    let rows = client.query(query, &[&schema, &table]).await?;
    let pk = primary_key_columns(client, schema, table).await?;

    let columns = rows
        .into_iter()
        .map(|row| {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let udt_name: String = row.get(2);
            let nullable: bool = row.get(3);
            let primary_key = pk.contains(&name);
            ColumnDescriptor {
                semantic: SemanticType::from_postgres(&data_type, &udt_name),
                native_type: udt_name,
                name,
                nullable,
                primary_key,
            }
        })
        .collect();

    Ok(columns)
}

/// Primary-key column names in key order.
async fn primary_key_columns(client: &Client, schema: &str, table: &str) -> Result<Vec<String>> {
    let query = r#"
        SELECT a.attname
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
        WHERE n.nspname = $1
          AND t.relname = $2
          AND c.contype = 'p'
          AND a.attnum = ANY(c.conkey)
        ORDER BY array_position(c.conkey, a.attnum)
    "#;

    let rows = client.query(query, &[&schema, &table]).await?;
    Ok(rows.into_iter().map(|r| r.get(0)).collect())
}

pub(super) async fn list_foreign_keys(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ForeignKeyRef>> {
    // conkey/confkey are parallel arrays; unnesting them together keeps the
    // referencing/referenced column pairing for multi-column keys.
    let query = r#"
        SELECT
            con.conname,
            att.attname,
            ref.relname,
            refatt.attname
        FROM pg_catalog.pg_constraint con
        JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
        JOIN pg_catalog.pg_namespace nsp ON nsp.oid = rel.relnamespace
        JOIN pg_catalog.pg_class ref ON ref.oid = con.confrelid
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
            WITH ORDINALITY AS cols(attnum, refattnum, ord)
        JOIN pg_catalog.pg_attribute att
            ON att.attrelid = con.conrelid AND att.attnum = cols.attnum
        JOIN pg_catalog.pg_attribute refatt
            ON refatt.attrelid = con.confrelid AND refatt.attnum = cols.refattnum
        WHERE nsp.nspname = $1 AND rel.relname = $2 AND con.contype = 'f'
        ORDER BY con.conname, cols.ord
    "#;

    let rows = client.query(query, &[&schema, &table]).await?;

    // Rows arrive ordered by constraint then column position; fold runs of
    // the same constraint into one multi-column reference.
    let mut fks: Vec<ForeignKeyRef> = Vec::new();
    for row in rows {
        let name: String = row.get(0);
        let column: String = row.get(1);
        let ref_table: String = row.get(2);
        let ref_column: String = row.get(3);
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

pub(super) async fn count_rows(client: &Client, schema: &str, table: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*)::int8 FROM {}",
        PostgresDialect::qualified(schema, table)
    );
    let row = client.query_one(&sql, &[]).await?;
    Ok(row.get(0))
}

pub(super) async fn index_exists(
    client: &Client,
    schema: &str,
    table: &str,
    name: &str,
) -> Result<bool> {
    let query = r#"
        SELECT EXISTS (
            SELECT 1 FROM pg_catalog.pg_indexes
            WHERE schemaname = $1 AND tablename = $2 AND indexname = $3
        )
    "#;

    let row = client.query_one(query, &[&schema, &table, &name]).await?;
    Ok(row.get(0))
}

pub(super) async fn constraint_exists(
    client: &Client,
    schema: &str,
    table: &str,
    name: &str,
) -> Result<bool> {
    let query = r#"
        SELECT EXISTS (
            SELECT 1
            FROM information_schema.table_constraints
            WHERE table_schema = $1 AND table_name = $2 AND constraint_name = $3
        )
    "#;

    let row = client.query_one(query, &[&schema, &table, &name]).await?;
    Ok(row.get(0))
}
