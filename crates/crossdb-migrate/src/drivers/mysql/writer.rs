//! MySQL/MariaDB target writer.
//!
//! Writes rows one statement at a time in autocommit mode, so everything
//! applied before a mid-table failure stays committed and a rerun converges
//! through the idempotent insert forms.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Pool};
use tracing::{debug, info};

use crate::config::ConnectionProfile;
use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, IndexSpec, PkValue};
use crate::core::traits::{BatchOutcome, RowFailure, TargetWriter, WriteSpec};
use crate::core::value::{Row, RowBatch, SqlValue};
use crate::error::{MigrateError, Result};

use super::catalog;
use super::dialect::MysqlDialect;

/// Duplicate entry for a unique key.
const ER_DUP_ENTRY: u16 = 1062;
/// Row references a missing foreign-key parent.
const ER_NO_REFERENCED_ROW: u16 = 1452;

/// MySQL target writer over a mysql_async pool.
pub struct MysqlWriter {
    pool: Pool,
    database: String,
}

impl MysqlWriter {
    /// Connect to the target database and probe the connection.
    pub async fn connect(profile: &ConnectionProfile) -> Result<Self> {
        let pool = super::build_pool(profile)?;

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL target pool"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL target connection"))?;
        drop(conn);

        info!("Connected to MySQL target: {}", profile.endpoint());

        Ok(Self {
            pool,
            database: profile.database.clone(),
        })
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MySQL target connection"))
    }
}

#[async_trait]
impl TargetWriter for MysqlWriter {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        catalog::list_tables(&mut conn, &self.database)
            .await
            .map_err(|e| MigrateError::catalog("target", e))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut conn = self.conn().await?;
        catalog::list_columns(&mut conn, &self.database, table)
            .await
            .map_err(|e| MigrateError::catalog("target", e))
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        catalog::count_rows(&mut conn, table)
            .await
            .map_err(|e| MigrateError::catalog("target", e))
    }

    async fn add_column(&self, table: &str, column: &ColumnDescriptor) -> Result<()> {
        let mut conn = self.conn().await?;
        // The source's native type string means nothing here; the semantic
        // type picks the column type.
        let mapped = MysqlDialect::default_type_for(column.semantic);
        let sql = MysqlDialect::build_add_column(table, &column.name, mapped);
        conn.query_drop(&sql)
            .await
            .map_err(|e| MigrateError::reconcile(table, e))?;

        debug!(table, column = %column.name, r#type = mapped, "added column");
        Ok(())
    }

    async fn index_exists(&self, table: &str, name: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        catalog::index_exists(&mut conn, &self.database, table, name).await
    }

    async fn create_index(&self, table: &str, spec: &IndexSpec) -> Result<()> {
        let mut conn = self.conn().await?;
        // Prefix lengths depend on the target's own column types.
        let columns = catalog::list_columns(&mut conn, &self.database, table).await?;
        let sql = MysqlDialect::build_create_index(table, spec, &columns);
        conn.query_drop(&sql)
            .await
            .map_err(|e| MigrateError::reconcile(table, e))?;

        debug!(table, index = %spec.name, unique = spec.unique, "created index");
        Ok(())
    }

    async fn constraint_exists(&self, table: &str, name: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        catalog::constraint_exists(&mut conn, &self.database, table, name).await
    }

    async fn create_foreign_key(&self, table: &str, fk: &ForeignKeyRef) -> Result<()> {
        let mut conn = self.conn().await?;
        let sql = MysqlDialect::build_create_foreign_key(table, fk);
        conn.query_drop(&sql)
            .await
            .map_err(|e| MigrateError::reconcile(table, e))?;

        debug!(table, constraint = %fk.name, "created foreign key");
        Ok(())
    }

    async fn apply_batch(&self, spec: &WriteSpec, batch: &RowBatch) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if batch.rows.is_empty() {
            return Ok(outcome);
        }

        let mut conn = self.conn().await?;
        let sql = MysqlDialect::build_insert(spec);
        let key_index = spec
            .pk_columns
            .first()
            .and_then(|pk| spec.columns.iter().position(|c| &c.name == pk));

        for row in &batch.rows {
            let params: Vec<mysql_async::Value> = row.iter().map(sql_value_to_mysql).collect();
            match conn.exec_drop(&sql, params).await {
                // The self-assignment upsert and INSERT IGNORE both report
                // zero affected rows when the row already exists.
                Ok(()) => match conn.affected_rows() {
                    0 => outcome.skipped += 1,
                    _ => outcome.inserted += 1,
                },
                Err(e) => classify_write_error(e, spec, row, key_index, &mut outcome)?,
            }
        }

        Ok(outcome)
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.clone().disconnect().await.ok();
    }
}

/// Sort a per-row write error into the outcome, or abort on connection loss.
fn classify_write_error(
    e: mysql_async::Error,
    spec: &WriteSpec,
    row: &Row,
    key_index: Option<usize>,
    outcome: &mut BatchOutcome,
) -> Result<()> {
    match &e {
        mysql_async::Error::Server(server)
            if server.code == ER_DUP_ENTRY || server.code == ER_NO_REFERENCED_ROW =>
        {
            // The target's existing row (or missing parent) wins; the copy
            // moves on.
            outcome.skipped += 1;
            Ok(())
        }
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => {
            Err(MigrateError::connection_lost(&spec.table, e))
        }
        _ => {
            outcome.failed.push(RowFailure {
                key: key_index
                    .and_then(|i| row.get(i))
                    .and_then(PkValue::from_sql_value),
                message: e.to_string(),
            });
            Ok(())
        }
    }
}

/// Convert an engine-agnostic value into a mysql_async parameter.
fn sql_value_to_mysql(value: &SqlValue<'_>) -> mysql_async::Value {
    match value {
        SqlValue::Null => mysql_async::Value::NULL,
        SqlValue::Bool(b) => mysql_async::Value::from(*b),
        SqlValue::I16(i) => mysql_async::Value::from(*i),
        SqlValue::I32(i) => mysql_async::Value::from(*i),
        SqlValue::I64(i) => mysql_async::Value::from(*i),
        SqlValue::F32(f) => mysql_async::Value::from(*f),
        SqlValue::F64(f) => mysql_async::Value::from(*f),
        SqlValue::Text(s) => mysql_async::Value::from(s.as_ref()),
        SqlValue::Bytes(b) => mysql_async::Value::from(b.as_ref()),
        SqlValue::Uuid(u) => mysql_async::Value::from(u.to_string()),
        SqlValue::Decimal(d) => mysql_async::Value::from(d.to_string()),
        SqlValue::Json(j) => mysql_async::Value::from(j.to_string()),
        SqlValue::DateTime(dt) => mysql_async::Value::from(*dt),
        SqlValue::DateTimeOffset(dto) => mysql_async::Value::from(dto.naive_utc()),
        SqlValue::Date(d) => mysql_async::Value::from(*d),
        SqlValue::Time(t) => mysql_async::Value::from(*t),
    }
}
