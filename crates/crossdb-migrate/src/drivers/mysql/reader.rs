//! MySQL/MariaDB source reader.
//!
//! Streams rows with keyset pagination on the primary key, falling back to
//! OFFSET pagination for tables without a usable key.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::prelude::*;
use mysql_async::{Conn, Pool};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConnectionProfile;
use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, PkValue, SemanticType};
use crate::core::traits::{ReadOptions, SourceReader};
use crate::core::value::{Row, RowBatch, SqlValue};
use crate::error::{MigrateError, Result};

use super::catalog;
use super::dialect::MysqlDialect;

/// MySQL source reader over a mysql_async pool.
pub struct MysqlReader {
    pool: Pool,
    database: String,
}

impl MysqlReader {
    /// Connect to the source database and probe the connection.
    pub async fn connect(profile: &ConnectionProfile) -> Result<Self> {
        let pool = super::build_pool(profile)?;

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL source pool"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL source connection"))?;
        drop(conn);

        info!("Connected to MySQL source: {}", profile.endpoint());

        Ok(Self {
            pool,
            database: profile.database.clone(),
        })
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MySQL source connection"))
    }
}

#[async_trait]
impl SourceReader for MysqlReader {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        catalog::list_tables(&mut conn, &self.database)
            .await
            .map_err(|e| MigrateError::catalog("source", e))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut conn = self.conn().await?;
        catalog::list_columns(&mut conn, &self.database, table)
            .await
            .map_err(|e| MigrateError::catalog("source", e))
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRef>> {
        let mut conn = self.conn().await?;
        catalog::list_foreign_keys(&mut conn, &self.database, table)
            .await
            .map_err(|e| MigrateError::catalog("source", e))
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        catalog::count_rows(&mut conn, table)
            .await
            .map_err(|e| MigrateError::catalog("source", e))
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<RowBatch>> {
        let (tx, rx) = mpsc::channel(opts.read_ahead.max(1));
        let pool = self.pool.clone();

        tokio::spawn(async move {
            if let Err(e) = stream_rows(pool, opts, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.clone().disconnect().await.ok();
    }
}

/// Page through the table and push decoded batches into the channel.
async fn stream_rows(
    pool: Pool,
    opts: ReadOptions,
    tx: mpsc::Sender<Result<RowBatch>>,
) -> Result<()> {
    let mut conn = pool
        .get_conn()
        .await
        .map_err(|e| MigrateError::pool(e, "getting connection for read_table"))?;

    let column_names: Vec<String> = opts.columns.iter().map(|c| c.name.clone()).collect();
    let mut last_key: Option<PkValue> = None;
    let mut offset: u64 = 0;

    loop {
        let sql = match opts.key_index {
            Some(key_idx) => MysqlDialect::build_keyset_page(
                &opts.table,
                &column_names,
                &opts.columns[key_idx].name,
                last_key.as_ref(),
                opts.batch_size,
            ),
            None => {
                MysqlDialect::build_offset_page(&opts.table, &column_names, offset, opts.batch_size)
            }
        };

        let mysql_rows: Vec<mysql_async::Row> = conn
            .query(&sql)
            .await
            .map_err(|e| classify_stream_error(e, &opts.table))?;
        let row_count = mysql_rows.len();

        let mut rows: Vec<Row> = Vec::with_capacity(row_count);
        for mut mysql_row in mysql_rows {
            let mut values = Vec::with_capacity(opts.columns.len());
            for (idx, col) in opts.columns.iter().enumerate() {
                let raw = mysql_row
                    .take::<mysql_async::Value, _>(idx)
                    .unwrap_or(mysql_async::Value::NULL);
                values.push(decode_value(raw, col));
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

fn classify_stream_error(e: mysql_async::Error, table: &str) -> MigrateError {
    match &e {
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => {
            MigrateError::connection_lost(table, e)
        }
        _ => MigrateError::Mysql(e),
    }
}

/// Decode one mysql_async cell into the engine-agnostic value.
///
/// The text protocol returns almost everything as byte strings, so the
/// column's semantic type drives the parse. Binary-protocol values (typed
/// ints, floats, temporals) are handled directly.
fn decode_value(value: mysql_async::Value, col: &ColumnDescriptor) -> SqlValue<'static> {
    use mysql_async::Value as V;

    match value {
        V::NULL => SqlValue::Null,
        V::Int(v) => match col.semantic {
            SemanticType::Boolean => SqlValue::Bool(v != 0),
            _ => SqlValue::I64(v),
        },
        V::UInt(v) => match col.semantic {
            SemanticType::Boolean => SqlValue::Bool(v != 0),
            _ => SqlValue::I64(v as i64),
        },
        V::Float(v) => SqlValue::F32(v),
        V::Double(v) => SqlValue::F64(v),
        V::Date(year, month, day, hour, minute, second, micros) => {
            let date = match NaiveDate::from_ymd_opt(year.into(), month.into(), day.into()) {
                Some(d) => d,
                // Zero dates (0000-00-00) fail chrono validation.
                None => return SqlValue::Null,
            };
            if is_date_only(col) {
                SqlValue::Date(date)
            } else {
                match NaiveTime::from_hms_micro_opt(
                    hour.into(),
                    minute.into(),
                    second.into(),
                    micros,
                ) {
                    Some(time) => SqlValue::DateTime(NaiveDateTime::new(date, time)),
                    None => SqlValue::Null,
                }
            }
        }
        V::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = days * 24 + u32::from(hours);
            if !negative && total_hours < 24 {
                NaiveTime::from_hms_micro_opt(total_hours, minutes.into(), seconds.into(), micros)
                    .map(SqlValue::Time)
                    .unwrap_or(SqlValue::Null)
            } else {
                // TIME columns can hold durations outside the day range;
                // those only round-trip as text.
                let sign = if negative { "-" } else { "" };
                SqlValue::Text(Cow::Owned(format!(
                    "{}{:02}:{:02}:{:02}",
                    sign, total_hours, minutes, seconds
                )))
            }
        }
        V::Bytes(bytes) => decode_bytes(bytes, col),
    }
}

fn is_date_only(col: &ColumnDescriptor) -> bool {
    let native = col.native_type.to_lowercase();
    native.starts_with("date") && !native.starts_with("datetime")
}

fn decode_bytes(bytes: Vec<u8>, col: &ColumnDescriptor) -> SqlValue<'static> {
    match col.semantic {
        SemanticType::Binary => SqlValue::Bytes(Cow::Owned(bytes)),
        SemanticType::Boolean => match bytes.as_slice() {
            b"1" => SqlValue::Bool(true),
            b"0" => SqlValue::Bool(false),
            // bit(1) arrives as a raw byte rather than ASCII.
            [b] => SqlValue::Bool(*b != 0),
            _ => SqlValue::Bool(bytes.iter().any(|b| *b != 0)),
        },
        SemanticType::Json => match serde_json::from_slice(&bytes) {
            Ok(v) => SqlValue::Json(v),
            Err(_) => text_value(bytes),
        },
        SemanticType::Integer => {
            let text = String::from_utf8_lossy(&bytes);
            match text.trim().parse::<i64>() {
                Ok(v) => SqlValue::I64(v),
                Err(_) => SqlValue::Text(Cow::Owned(text.into_owned())),
            }
        }
        SemanticType::Decimal => {
            let text = String::from_utf8_lossy(&bytes);
            match text.trim().parse::<Decimal>() {
                Ok(d) => SqlValue::Decimal(d),
                Err(_) => match text.trim().parse::<f64>() {
                    Ok(f) => SqlValue::F64(f),
                    Err(_) => SqlValue::Text(Cow::Owned(text.into_owned())),
                },
            }
        }
        SemanticType::Uuid => {
            let text = String::from_utf8_lossy(&bytes);
            match Uuid::parse_str(text.trim()) {
                Ok(u) => SqlValue::Uuid(u),
                Err(_) => SqlValue::Text(Cow::Owned(text.into_owned())),
            }
        }
        SemanticType::Timestamp => {
            let text = String::from_utf8_lossy(&bytes);
            let s = text.trim();
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return SqlValue::DateTime(dt);
            }
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return SqlValue::Date(d);
            }
            if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M:%S%.f") {
                return SqlValue::Time(t);
            }
            // Zero dates and oversize TIME values stay as text.
            SqlValue::Text(Cow::Owned(s.to_string()))
        }
        SemanticType::Text | SemanticType::Enum | SemanticType::Array => text_value(bytes),
    }
}

fn text_value(bytes: Vec<u8>) -> SqlValue<'static> {
    SqlValue::Text(Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()))
}
