//! Core traits for engine-agnostic replication.
//!
//! This module defines the two seams the pipeline is built on:
//!
//! - [`SourceReader`]: catalog snapshots and row streaming from the source
//! - [`TargetWriter`]: catalog snapshots, reconciliation DDL and idempotent
//!   batch writes on the target
//!
//! Drivers implement both per engine; the copier, planner and verifier only
//! ever see these traits, which keeps them testable against in-crate mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

use super::schema::{ColumnDescriptor, ForeignKeyRef, IndexSpec, PkValue};
use super::value::RowBatch;

/// Options for streaming rows out of a source table.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Table name.
    pub table: String,
    /// Columns to read, in output order (the source/target intersection).
    pub columns: Vec<ColumnDescriptor>,
    /// Index into `columns` of the keyset pagination key, when the table
    /// has a single sortable primary key inside the copied column set.
    /// `None` falls back to offset pagination.
    pub key_index: Option<usize>,
    /// Rows per batch.
    pub batch_size: usize,
    /// Batches buffered ahead of the writer.
    pub read_ahead: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            table: String::new(),
            columns: Vec::new(),
            key_index: None,
            batch_size: 500,
            read_ahead: 4,
        }
    }
}

/// What to do when an incoming row collides with an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Insert only; rows that already exist are left untouched and
    /// counted as skipped.
    #[default]
    KeepExisting,
    /// Update the existing row with the incoming values.
    Overwrite,
}

/// Instructions for writing one table's batches.
#[derive(Debug, Clone)]
pub struct WriteSpec {
    /// Target table name.
    pub table: String,
    /// Columns being written, in row order.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary-key columns present in `columns`. Empty means the write
    /// degrades to the engine's insert-ignore form.
    pub pk_columns: Vec<String>,
    /// Conflict handling.
    pub policy: ConflictPolicy,
}

/// One row that could not be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFailure {
    /// Primary-key value of the failed row, when one could be extracted.
    pub key: Option<PkValue>,
    /// Engine error text.
    pub message: String,
}

/// Per-batch write outcome with typed row dispositions.
///
/// Duplicate-key and foreign-key conflicts are counted as skipped rather
/// than surfaced as errors; only connection loss aborts the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Rows newly inserted (or updated under [`ConflictPolicy::Overwrite`]).
    pub inserted: u64,
    /// Rows skipped on conflict.
    pub skipped: u64,
    /// Rows that failed for reasons other than conflicts.
    pub failed: Vec<RowFailure>,
}

impl BatchOutcome {
    pub fn absorb(&mut self, other: BatchOutcome) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }
}

/// Read catalog metadata and stream rows from a source database.
///
/// # Streaming
///
/// [`read_table`](SourceReader::read_table) returns a channel receiver fed by
/// a background task, so the writer applies one batch while the next is being
/// fetched. The channel is bounded by `read_ahead`, which gives backpressure
/// on large tables.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// List base-table names in the configured database/schema.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Load ordered column descriptors for a table, with semantic types
    /// derived from the engine's information-schema metadata.
    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Load best-effort foreign-key metadata for a table.
    ///
    /// Used only by the plan ordering sanity pass; an engine that cannot
    /// provide it returns an empty list.
    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRef>>;

    /// Exact row count.
    async fn count_rows(&self, table: &str) -> Result<i64>;

    /// Start streaming rows from a table.
    ///
    /// Returns a receiver that yields `Result<RowBatch>` until the table is
    /// exhausted; the final batch has `is_last` set. Errors come through the
    /// channel and terminate the stream.
    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<RowBatch>>;

    /// Engine identifier ("postgres" or "mysql").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// Write rows and apply reconciliation DDL on a target database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    // ===== Catalog Operations =====

    /// List base-table names in the configured database/schema.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Load ordered column descriptors for a table.
    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Exact row count.
    async fn count_rows(&self, table: &str) -> Result<i64>;

    // ===== Reconciliation DDL =====

    /// Add a nullable column mapped from the source descriptor.
    async fn add_column(&self, table: &str, column: &ColumnDescriptor) -> Result<()>;

    /// Check if an index with this name exists on the table.
    async fn index_exists(&self, table: &str, name: &str) -> Result<bool>;

    /// Create a declared index.
    async fn create_index(&self, table: &str, spec: &IndexSpec) -> Result<()>;

    /// Check if a named constraint exists on the table.
    async fn constraint_exists(&self, table: &str, name: &str) -> Result<bool>;

    /// Create a declared foreign key.
    async fn create_foreign_key(&self, table: &str, fk: &ForeignKeyRef) -> Result<()>;

    // ===== Data Operations =====

    /// Apply one batch of converted rows with idempotent upsert semantics.
    ///
    /// Conflicting rows are skipped (or updated under
    /// [`ConflictPolicy::Overwrite`]); other per-row errors are collected in
    /// the outcome and do not abort the batch. Connection loss returns
    /// [`MigrateError::ConnectionLost`](crate::error::MigrateError::ConnectionLost).
    async fn apply_batch(&self, spec: &WriteSpec, batch: &RowBatch) -> Result<BatchOutcome>;

    /// Engine identifier ("postgres" or "mysql").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}
