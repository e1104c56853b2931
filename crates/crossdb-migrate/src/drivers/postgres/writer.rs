//! PostgreSQL target writer.
//!
//! Writes rows one statement at a time in autocommit mode, so everything
//! applied before a mid-table failure stays committed and a rerun converges
//! through the idempotent insert forms.
//!
//! Parameters bind through [`PgParam`], which coerces each incoming value to
//! the prepared statement's column type. The coercion step is what lets a
//! MySQL-shaped row (hex text for binary, JSON text for documents, 0/1 for
//! booleans) land in a typed PostgreSQL column.

use std::error::Error as StdError;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Client, Pool};
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{IsNull, ToSql, Type};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConnectionProfile;
use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, IndexSpec, PkValue};
use crate::core::traits::{BatchOutcome, RowFailure, TargetWriter, WriteSpec};
use crate::core::value::{RowBatch, SqlValue};
use crate::error::{MigrateError, Result};

use super::catalog;
use super::dialect::PostgresDialect;

/// PostgreSQL target writer over a deadpool-postgres pool.
pub struct PostgresWriter {
    pool: Pool,
    schema: String,
}

impl PostgresWriter {
    /// Connect to the target database and probe the connection.
    pub async fn connect(profile: &ConnectionProfile) -> Result<Self> {
        let pool = super::build_pool(profile, "creating PostgreSQL target pool")?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;
        drop(client);

        info!("Connected to PostgreSQL target: {}", profile.endpoint());

        Ok(Self {
            pool,
            schema: profile.effective_schema(),
        })
    }

    async fn client(&self) -> Result<Client> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting PostgreSQL target connection"))
    }
}

#[async_trait]
impl TargetWriter for PostgresWriter {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        catalog::list_tables(&client, &self.schema)
            .await
            .map_err(|e| MigrateError::catalog("target", e))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let client = self.client().await?;
        catalog::list_columns(&client, &self.schema, table)
            .await
            .map_err(|e| MigrateError::catalog("target", e))
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let client = self.client().await?;
        catalog::count_rows(&client, &self.schema, table)
            .await
            .map_err(|e| MigrateError::catalog("target", e))
    }

    async fn add_column(&self, table: &str, column: &ColumnDescriptor) -> Result<()> {
        let client = self.client().await?;
        // The source's native type string means nothing here; the semantic
        // type picks the column type.
        let mapped = PostgresDialect::default_type_for(column.semantic);
        let sql = PostgresDialect::build_add_column(&self.schema, table, &column.name, mapped);
        client
            .batch_execute(&sql)
            .await
            .map_err(|e| MigrateError::reconcile(table, e))?;

        debug!(table, column = %column.name, r#type = mapped, "added column");
        Ok(())
    }

    async fn index_exists(&self, table: &str, name: &str) -> Result<bool> {
        let client = self.client().await?;
        catalog::index_exists(&client, &self.schema, table, name).await
    }

    async fn create_index(&self, table: &str, spec: &IndexSpec) -> Result<()> {
        let client = self.client().await?;
        let sql = PostgresDialect::build_create_index(&self.schema, table, spec);
        client
            .batch_execute(&sql)
            .await
            .map_err(|e| MigrateError::reconcile(table, e))?;

        debug!(table, index = %spec.name, unique = spec.unique, "created index");
        Ok(())
    }

    async fn constraint_exists(&self, table: &str, name: &str) -> Result<bool> {
        let client = self.client().await?;
        catalog::constraint_exists(&client, &self.schema, table, name).await
    }

    async fn create_foreign_key(&self, table: &str, fk: &ForeignKeyRef) -> Result<()> {
        let client = self.client().await?;
        let sql = PostgresDialect::build_create_foreign_key(&self.schema, table, fk);
        client
            .batch_execute(&sql)
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

        let client = self.client().await?;
        let sql = PostgresDialect::build_insert(&self.schema, spec);
        let stmt = client
            .prepare_cached(&sql)
            .await
            .map_err(|e| classify_table_error(e, &spec.table))?;
        let param_types = stmt.params();
        let key_index = spec
            .pk_columns
            .first()
            .and_then(|pk| spec.columns.iter().position(|c| &c.name == pk));

        for row in &batch.rows {
            let key = key_index.and_then(|i| row.get(i)).and_then(PkValue::from_sql_value);

            // Coerce the whole row first; a cell the target type cannot
            // accept fails just that row.
            let mut params: Vec<PgParam> = Vec::with_capacity(row.len());
            let mut coerce_error: Option<String> = None;
            for (value, ty) in row.iter().zip(param_types) {
                match PgParam::from_value_for_type(value, ty) {
                    Ok(p) => params.push(p),
                    Err(msg) => {
                        coerce_error = Some(msg);
                        break;
                    }
                }
            }
            if let Some(message) = coerce_error {
                outcome.failed.push(RowFailure { key, message });
                continue;
            }

            let param_refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

            match client.execute(&stmt, &param_refs).await {
                // DO NOTHING reports zero affected rows for duplicates.
                Ok(0) => outcome.skipped += 1,
                Ok(_) => outcome.inserted += 1,
                Err(e) => classify_write_error(e, spec, key, &mut outcome)?,
            }
        }

        Ok(outcome)
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Errors before any row was attempted (prepare failures) abort the table.
fn classify_table_error(e: tokio_postgres::Error, table: &str) -> MigrateError {
    if e.is_closed() {
        MigrateError::connection_lost(table, e)
    } else {
        MigrateError::copy(table, e)
    }
}

/// Sort a per-row write error into the outcome, or abort on connection loss.
fn classify_write_error(
    e: tokio_postgres::Error,
    spec: &WriteSpec,
    key: Option<PkValue>,
    outcome: &mut BatchOutcome,
) -> Result<()> {
    match e.code() {
        // The target's existing row (or missing parent) wins; the copy
        // moves on.
        Some(code)
            if *code == SqlState::UNIQUE_VIOLATION
                || *code == SqlState::FOREIGN_KEY_VIOLATION =>
        {
            outcome.skipped += 1;
            Ok(())
        }
        _ if e.is_closed() => Err(MigrateError::connection_lost(&spec.table, e)),
        _ => {
            outcome.failed.push(RowFailure {
                key,
                message: e.to_string(),
            });
            Ok(())
        }
    }
}

/// A row value coerced to one prepared-statement parameter type.
///
/// `accepts` is unconditionally true: the coercion in
/// [`from_value_for_type`](PgParam::from_value_for_type) already produced a
/// variant whose inner `ToSql` matches the target type, so the per-variant
/// delegation does the real encoding.
#[derive(Debug)]
enum PgParam {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Decimal(Decimal),
    Json(serde_json::Value),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl PgParam {
    /// Coerce an engine-agnostic value to the statement's parameter type.
    ///
    /// Text values parse into the typed form the column wants (uuid, json,
    /// temporal, numeric, hex bytes); integers widen or narrow with bounds
    /// checks; everything destined for a text column renders to text.
    fn from_value_for_type(
        value: &SqlValue<'_>,
        ty: &Type,
    ) -> std::result::Result<PgParam, String> {
        let param = match value {
            SqlValue::Null => PgParam::Null,

            SqlValue::Bool(b) => match *ty {
                Type::BOOL => PgParam::Bool(*b),
                Type::INT2 => PgParam::I16(i16::from(*b)),
                Type::INT4 => PgParam::I32(i32::from(*b)),
                Type::INT8 => PgParam::I64(i64::from(*b)),
                _ => PgParam::Text(b.to_string()),
            },

            SqlValue::I16(v) => Self::coerce_int(i64::from(*v), ty)?,
            SqlValue::I32(v) => Self::coerce_int(i64::from(*v), ty)?,
            SqlValue::I64(v) => Self::coerce_int(*v, ty)?,

            SqlValue::F32(v) => match *ty {
                Type::FLOAT8 => PgParam::F64(f64::from(*v)),
                Type::NUMERIC => PgParam::Decimal(
                    Decimal::try_from(*v).map_err(|e| format!("float {} as numeric: {}", v, e))?,
                ),
                Type::TEXT | Type::VARCHAR => PgParam::Text(v.to_string()),
                _ => PgParam::F32(*v),
            },
            SqlValue::F64(v) => match *ty {
                Type::FLOAT4 => PgParam::F32(*v as f32),
                Type::NUMERIC => PgParam::Decimal(
                    Decimal::try_from(*v).map_err(|e| format!("float {} as numeric: {}", v, e))?,
                ),
                Type::TEXT | Type::VARCHAR => PgParam::Text(v.to_string()),
                _ => PgParam::F64(*v),
            },

            SqlValue::Text(s) => Self::coerce_text(s, ty)?,

            SqlValue::Bytes(b) => PgParam::Bytes(b.to_vec()),

            SqlValue::Uuid(u) => match *ty {
                Type::UUID => PgParam::Uuid(*u),
                _ => PgParam::Text(u.to_string()),
            },

            SqlValue::Decimal(d) => match *ty {
                Type::NUMERIC => PgParam::Decimal(*d),
                Type::FLOAT8 => PgParam::F64(decimal_to_f64(d)?),
                Type::FLOAT4 => PgParam::F32(decimal_to_f64(d)? as f32),
                Type::INT2 | Type::INT4 | Type::INT8 => {
                    let i = i64::try_from(*d)
                        .map_err(|_| format!("decimal {} as {}", d, ty.name()))?;
                    Self::coerce_int(i, ty)?
                }
                _ => PgParam::Text(d.to_string()),
            },

            SqlValue::Json(j) => match *ty {
                Type::JSON | Type::JSONB => PgParam::Json(j.clone()),
                _ => PgParam::Text(j.to_string()),
            },

            SqlValue::DateTime(dt) => match *ty {
                Type::TIMESTAMPTZ => PgParam::DateTimeUtc(DateTime::from_naive_utc_and_offset(*dt, Utc)),
                Type::DATE => PgParam::Date(dt.date()),
                Type::TEXT | Type::VARCHAR => {
                    PgParam::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
                }
                _ => PgParam::DateTime(*dt),
            },
            SqlValue::DateTimeOffset(dt) => match *ty {
                Type::TIMESTAMP => PgParam::DateTime(dt.naive_utc()),
                Type::DATE => PgParam::Date(dt.naive_utc().date()),
                Type::TEXT | Type::VARCHAR => PgParam::Text(dt.to_rfc3339()),
                _ => PgParam::DateTimeUtc(dt.with_timezone(&Utc)),
            },
            SqlValue::Date(d) => match *ty {
                Type::TEXT | Type::VARCHAR => PgParam::Text(d.to_string()),
                _ => PgParam::Date(*d),
            },
            SqlValue::Time(t) => match *ty {
                Type::TEXT | Type::VARCHAR => PgParam::Text(t.to_string()),
                _ => PgParam::Time(*t),
            },
        };

        Ok(param)
    }

    fn coerce_int(v: i64, ty: &Type) -> std::result::Result<PgParam, String> {
        let param = match *ty {
            Type::INT2 => PgParam::I16(
                i16::try_from(v).map_err(|_| format!("integer {} out of int2 range", v))?,
            ),
            Type::INT4 => PgParam::I32(
                i32::try_from(v).map_err(|_| format!("integer {} out of int4 range", v))?,
            ),
            Type::BOOL => PgParam::Bool(v != 0),
            Type::FLOAT4 => PgParam::F32(v as f32),
            Type::FLOAT8 => PgParam::F64(v as f64),
            Type::NUMERIC => PgParam::Decimal(Decimal::from(v)),
            Type::TEXT | Type::VARCHAR => PgParam::Text(v.to_string()),
            _ => PgParam::I64(v),
        };
        Ok(param)
    }

    fn coerce_text(s: &str, ty: &Type) -> std::result::Result<PgParam, String> {
        let param = match *ty {
            Type::UUID => PgParam::Uuid(
                Uuid::parse_str(s.trim()).map_err(|e| format!("'{}' as uuid: {}", s, e))?,
            ),
            Type::JSON | Type::JSONB => PgParam::Json(
                serde_json::from_str(s).map_err(|e| format!("text as json: {}", e))?,
            ),
            // binary values travel as lowercase hex text
            Type::BYTEA => PgParam::Bytes(
                hex::decode(s.trim()).map_err(|e| format!("hex text as bytea: {}", e))?,
            ),
            Type::TIMESTAMP => PgParam::DateTime(parse_datetime(s)?),
            Type::TIMESTAMPTZ => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
                    PgParam::DateTimeUtc(dt.with_timezone(&Utc))
                } else {
                    PgParam::DateTimeUtc(DateTime::from_naive_utc_and_offset(
                        parse_datetime(s)?,
                        Utc,
                    ))
                }
            }
            Type::DATE => PgParam::Date(
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map_err(|e| format!("'{}' as date: {}", s, e))?,
            ),
            Type::TIME => PgParam::Time(
                NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                    .map_err(|e| format!("'{}' as time: {}", s, e))?,
            ),
            Type::BOOL => match s.trim() {
                "1" | "t" | "true" | "TRUE" => PgParam::Bool(true),
                "0" | "f" | "false" | "FALSE" => PgParam::Bool(false),
                other => return Err(format!("'{}' as bool", other)),
            },
            Type::INT2 | Type::INT4 | Type::INT8 => {
                let v: i64 = s
                    .trim()
                    .parse()
                    .map_err(|e| format!("'{}' as {}: {}", s, ty.name(), e))?;
                Self::coerce_int(v, ty)?
            }
            Type::NUMERIC => PgParam::Decimal(
                s.trim()
                    .parse()
                    .map_err(|e| format!("'{}' as numeric: {}", s, e))?,
            ),
            Type::FLOAT4 | Type::FLOAT8 => {
                let v: f64 = s
                    .trim()
                    .parse()
                    .map_err(|e| format!("'{}' as {}: {}", s, ty.name(), e))?;
                if *ty == Type::FLOAT4 {
                    PgParam::F32(v as f32)
                } else {
                    PgParam::F64(v)
                }
            }
            _ => PgParam::Text(s.to_string()),
        };
        Ok(param)
    }
}

fn parse_datetime(s: &str) -> std::result::Result<NaiveDateTime, String> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|e| format!("'{}' as timestamp: {}", s, e))
}

fn decimal_to_f64(d: &Decimal) -> std::result::Result<f64, String> {
    f64::try_from(*d).map_err(|e| format!("decimal {} as float: {}", d, e))
}

impl ToSql for PgParam {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            PgParam::Null => Ok(IsNull::Yes),
            PgParam::Bool(v) => v.to_sql(ty, out),
            PgParam::I16(v) => v.to_sql(ty, out),
            PgParam::I32(v) => v.to_sql(ty, out),
            PgParam::I64(v) => v.to_sql(ty, out),
            PgParam::F32(v) => v.to_sql(ty, out),
            PgParam::F64(v) => v.to_sql(ty, out),
            PgParam::Text(v) => v.to_sql(ty, out),
            PgParam::Bytes(v) => v.to_sql(ty, out),
            PgParam::Uuid(v) => v.to_sql(ty, out),
            PgParam::Decimal(v) => v.to_sql(ty, out),
            PgParam::Json(v) => v.to_sql(ty, out),
            PgParam::DateTime(v) => v.to_sql(ty, out),
            PgParam::DateTimeUtc(v) => v.to_sql(ty, out),
            PgParam::Date(v) => v.to_sql(ty, out),
            PgParam::Time(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}
