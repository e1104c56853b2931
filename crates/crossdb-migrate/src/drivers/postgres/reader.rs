//! PostgreSQL source reader.
//!
//! Streams rows with keyset pagination on the primary key, falling back to
//! OFFSET pagination for tables without a usable key. Values decode straight
//! from the binary protocol by column OID; types outside the matrix are cast
//! to text in the page SQL by [`PostgresDialect::select_expr`].

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use deadpool_postgres::{Client, Pool};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_postgres::types::Type;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConnectionProfile;
use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, PkValue};
use crate::core::traits::{ReadOptions, SourceReader};
use crate::core::value::{Row, RowBatch, SqlValue};
use crate::error::{MigrateError, Result};

use super::catalog;
use super::dialect::PostgresDialect;

/// PostgreSQL source reader over a deadpool-postgres pool.
pub struct PostgresReader {
    pool: Pool,
    schema: String,
}

impl PostgresReader {
    /// Connect to the source database and probe the connection.
    pub async fn connect(profile: &ConnectionProfile) -> Result<Self> {
        let pool = super::build_pool(profile, "creating PostgreSQL source pool")?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL source connection"))?;
        client.simple_query("SELECT 1").await?;
        drop(client);

        info!("Connected to PostgreSQL source: {}", profile.endpoint());

        Ok(Self {
            pool,
            schema: profile.effective_schema(),
        })
    }

    async fn client(&self) -> Result<Client> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting PostgreSQL source connection"))
    }
}

#[async_trait]
impl SourceReader for PostgresReader {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        catalog::list_tables(&client, &self.schema)
            .await
            .map_err(|e| MigrateError::catalog("source", e))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let client = self.client().await?;
        catalog::list_columns(&client, &self.schema, table)
            .await
            .map_err(|e| MigrateError::catalog("source", e))
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRef>> {
        let client = self.client().await?;
        catalog::list_foreign_keys(&client, &self.schema, table)
            .await
            .map_err(|e| MigrateError::catalog("source", e))
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let client = self.client().await?;
        catalog::count_rows(&client, &self.schema, table)
            .await
            .map_err(|e| MigrateError::catalog("source", e))
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<RowBatch>> {
        let (tx, rx) = mpsc::channel(opts.read_ahead.max(1));
        let pool = self.pool.clone();
        let schema = self.schema.clone();

        tokio::spawn(async move {
            if let Err(e) = stream_rows(pool, schema, opts, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Page through the table and push decoded batches into the channel.
async fn stream_rows(
    pool: Pool,
    schema: String,
    opts: ReadOptions,
    tx: mpsc::Sender<Result<RowBatch>>,
) -> Result<()> {
    let client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, "getting connection for read_table"))?;

    let mut last_key: Option<PkValue> = None;
    let mut offset: u64 = 0;

    loop {
        let sql = match opts.key_index {
            Some(key_idx) => PostgresDialect::build_keyset_page(
                &schema,
                &opts.table,
                &opts.columns,
                &opts.columns[key_idx].name,
                last_key.as_ref(),
                opts.batch_size,
            ),
            None => PostgresDialect::build_offset_page(
                &schema,
                &opts.table,
                &opts.columns,
                offset,
                opts.batch_size,
            ),
        };

        let pg_rows = client
            .query(&sql, &[])
            .await
            .map_err(|e| classify_stream_error(e, &opts.table))?;
        let row_count = pg_rows.len();

        let mut rows: Vec<Row> = Vec::with_capacity(row_count);
        for pg_row in &pg_rows {
            let mut values = Vec::with_capacity(opts.columns.len());
            for (idx, col) in opts.columns.iter().enumerate() {
                let value = decode_value(pg_row, idx).map_err(|e| {
                    MigrateError::copy(
                        &opts.table,
                        format!("decoding column {}: {}", col.name, e),
                    )
                })?;
                values.push(value);
            }
            rows.push(values);
        }

        let mut batch_key: Option<SqlValue<'static>> = None;
        if let (Some(key_idx), Some(last_row)) = (opts.key_index, rows.last()) {
            let cell = last_row[key_idx].clone();
            last_key = PkValue::from_sql_value(&cell);
            if last_key.is_none() {
                // Without a usable bound the next page would repeat forever.
                return Err(MigrateError::copy(
                    &opts.table,
                    format!("keyset key decoded as {}, cannot paginate", cell.kind_name()),
                ));
            }
            batch_key = Some(cell);
        }
        offset += row_count as u64;

        let is_last = row_count < opts.batch_size;
        let mut batch = RowBatch::new(rows).with_last_key(batch_key);
        if is_last {
            batch = batch.mark_final();
        }

        debug!(
            table = %opts.table,
            rows = row_count,
            is_last,
            "fetched source batch"
        );

        // A closed receiver means the copy was cancelled or failed.
        if tx.send(Ok(batch)).await.is_err() {
            return Ok(());
        }

        if is_last {
            return Ok(());
        }
    }
}

fn classify_stream_error(e: tokio_postgres::Error, table: &str) -> MigrateError {
    if e.is_closed() {
        MigrateError::connection_lost(table, e)
    } else {
        MigrateError::Postgres(e)
    }
}

/// Decode one cell by the column type the server reported.
///
/// The page SQL already casts enums, arrays, money and exotic text types,
/// so every type reaching this match has a native decode; anything else
/// falls back to a text read.
fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
) -> std::result::Result<SqlValue<'static>, tokio_postgres::Error> {
    let value = match *row.columns()[idx].type_() {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(SqlValue::I16),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(SqlValue::I32),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::I64),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| SqlValue::I64(i64::from(v))),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(SqlValue::F32),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::F64),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)?
            .map(SqlValue::Decimal),
        Type::UUID => row.try_get::<_, Option<Uuid>>(idx)?.map(SqlValue::Uuid),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(SqlValue::Json),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|b| SqlValue::Bytes(Cow::Owned(b))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(SqlValue::DateTime),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<FixedOffset>>>(idx)?
            .map(SqlValue::DateTimeOffset),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(SqlValue::Date),
        Type::TIME => row.try_get::<_, Option<NaiveTime>>(idx)?.map(SqlValue::Time),
        _ => row
            .try_get::<_, Option<String>>(idx)?
            .map(|s| SqlValue::Text(Cow::Owned(s))),
    };

    Ok(value.unwrap_or(SqlValue::Null))
}
