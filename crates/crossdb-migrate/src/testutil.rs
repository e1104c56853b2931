//! Scriptable in-memory reader/writer mocks for pipeline tests.
//!
//! The mocks implement the same traits the drivers do, with knobs for the
//! failure shapes the pipeline must contain: mid-stream connection loss,
//! catalog errors, DDL failures and per-row write failures.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::schema::{ColumnDescriptor, ForeignKeyRef, IndexSpec, PkValue, SemanticType};
use crate::core::traits::{
    BatchOutcome, ConflictPolicy, ReadOptions, RowFailure, SourceReader, TargetWriter, WriteSpec,
};
use crate::core::value::{Row, RowBatch, SqlValue};
use crate::error::{MigrateError, Result};

pub fn col(name: &str, semantic: SemanticType) -> ColumnDescriptor {
    ColumnDescriptor::new(name, semantic)
}

pub fn pk(name: &str, semantic: SemanticType) -> ColumnDescriptor {
    ColumnDescriptor::new(name, semantic).as_primary_key()
}

/// An in-memory source with fixed tables and rows.
#[derive(Default)]
pub struct MockSource {
    pub tables: Vec<String>,
    pub columns: HashMap<String, Vec<ColumnDescriptor>>,
    pub foreign_keys: HashMap<String, Vec<ForeignKeyRef>>,
    pub rows: HashMap<String, Vec<Row>>,
    /// Overrides the row-derived count, for mismatch scenarios.
    pub counts: HashMap<String, i64>,
    /// Tables whose `count_rows` fails.
    pub fail_counts_for: HashSet<String>,
    /// Deliver this many batches, then emit a connection-lost error.
    pub stream_error_after: Option<usize>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        mut self,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        rows: Vec<Row>,
    ) -> Self {
        self.tables.push(name.to_string());
        self.columns.insert(name.to_string(), columns);
        self.rows.insert(name.to_string(), rows);
        self
    }

    pub fn with_foreign_key(mut self, table: &str, fk: ForeignKeyRef) -> Self {
        self.foreign_keys
            .entry(table.to_string())
            .or_default()
            .push(fk);
        self
    }
}

#[async_trait]
impl SourceReader for MockSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.clone())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.columns
            .get(table)
            .cloned()
            .ok_or_else(|| MigrateError::catalog("source", format!("no columns for {}", table)))
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRef>> {
        Ok(self.foreign_keys.get(table).cloned().unwrap_or_default())
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        if self.fail_counts_for.contains(table) {
            return Err(MigrateError::catalog(
                "source",
                format!("count failed for {}", table),
            ));
        }
        if let Some(n) = self.counts.get(table) {
            return Ok(*n);
        }
        Ok(self.rows.get(table).map(|r| r.len() as i64).unwrap_or(0))
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<RowBatch>> {
        let (tx, rx) = mpsc::channel(opts.read_ahead.max(1));
        let stored = self.rows.get(&opts.table).cloned().unwrap_or_default();
        // project stored cells onto the requested columns, like a real reader
        let stored_columns = self.columns.get(&opts.table).cloned().unwrap_or_default();
        let projection: Vec<Option<usize>> = opts
            .columns
            .iter()
            .map(|c| stored_columns.iter().position(|s| s.name == c.name))
            .collect();
        let rows: Vec<Row> = stored
            .into_iter()
            .map(|row| {
                projection
                    .iter()
                    .map(|idx| match idx {
                        Some(i) => row.get(*i).cloned().unwrap_or(SqlValue::Null),
                        None => SqlValue::Null,
                    })
                    .collect()
            })
            .collect();
        let error_after = self.stream_error_after;
        tokio::spawn(async move {
            if rows.is_empty() {
                let _ = tx.send(Ok(RowBatch::empty_final())).await;
                return;
            }
            let total = rows.len();
            let mut sent = 0usize;
            let mut batches = 0usize;
            for chunk in rows.chunks(opts.batch_size.max(1)) {
                if error_after == Some(batches) {
                    let _ = tx
                        .send(Err(MigrateError::connection_lost(
                            &opts.table,
                            "simulated connection loss",
                        )))
                        .await;
                    return;
                }
                sent += chunk.len();
                let mut batch = RowBatch::new(chunk.to_vec());
                if sent == total {
                    batch = batch.mark_final();
                }
                if tx.send(Ok(batch)).await.is_err() {
                    return;
                }
                batches += 1;
            }
        });
        rx
    }

    fn db_type(&self) -> &str {
        "mock"
    }

    async fn close(&self) {}
}

/// An in-memory target that records DDL and written rows.
#[derive(Default)]
pub struct MockTarget {
    pub tables: Vec<String>,
    pub columns: Mutex<HashMap<String, Vec<ColumnDescriptor>>>,
    /// Overrides the written-row count, for mismatch scenarios.
    pub counts: HashMap<String, i64>,
    pub fail_counts_for: HashSet<String>,
    /// Tables whose `list_columns` fails.
    pub fail_columns_for: HashSet<String>,
    pub fail_add_column: bool,
    pub fail_create_index: bool,
    pub fail_create_foreign_key: bool,
    /// Existing "table.index" names.
    pub indexes: Mutex<HashSet<String>>,
    /// Existing "table.constraint" names.
    pub constraints: Mutex<HashSet<String>>,
    /// Applied DDL, in order.
    pub ddl: Mutex<Vec<String>>,
    /// Rows actually inserted, per table.
    pub written: Mutex<HashMap<String, Vec<Row>>>,
    /// Keys already present, per table. Pre-seed to simulate a re-run.
    pub seen_keys: Mutex<HashMap<String, HashSet<PkValue>>>,
    /// Integer keys whose rows fail to write.
    pub poison_keys: HashSet<i64>,
    /// Per table: apply this many batches, then return connection loss.
    pub lose_connection_after: Mutex<HashMap<String, usize>>,
}

impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, columns: Vec<ColumnDescriptor>) -> Self {
        let mut this = self;
        this.tables.push(name.to_string());
        this.columns
            .lock()
            .unwrap()
            .insert(name.to_string(), columns);
        this
    }

    pub fn with_existing_index(self, table: &str, name: &str) -> Self {
        self.indexes
            .lock()
            .unwrap()
            .insert(format!("{}.{}", table, name));
        self
    }

    pub fn with_existing_constraint(self, table: &str, name: &str) -> Self {
        self.constraints
            .lock()
            .unwrap()
            .insert(format!("{}.{}", table, name));
        self
    }

    pub fn with_seen_key(self, table: &str, key: PkValue) -> Self {
        self.seen_keys
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(key);
        self
    }

    pub fn lose_connection(self, table: &str, after_batches: usize) -> Self {
        self.lose_connection_after
            .lock()
            .unwrap()
            .insert(table.to_string(), after_batches);
        self
    }

    pub fn written_rows(&self, table: &str) -> usize {
        self.written
            .lock()
            .unwrap()
            .get(table)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub fn applied_ddl(&self) -> Vec<String> {
        self.ddl.lock().unwrap().clone()
    }
}

#[async_trait]
impl TargetWriter for MockTarget {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.clone())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        if self.fail_columns_for.contains(table) {
            return Err(MigrateError::catalog(
                "target",
                format!("columns failed for {}", table),
            ));
        }
        self.columns
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .ok_or_else(|| MigrateError::catalog("target", format!("no columns for {}", table)))
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        if self.fail_counts_for.contains(table) {
            return Err(MigrateError::catalog(
                "target",
                format!("count failed for {}", table),
            ));
        }
        if let Some(n) = self.counts.get(table) {
            return Ok(*n);
        }
        Ok(self.written_rows(table) as i64)
    }

    async fn add_column(&self, table: &str, column: &ColumnDescriptor) -> Result<()> {
        if self.fail_add_column {
            return Err(MigrateError::reconcile(table, "simulated DDL failure"));
        }
        self.ddl
            .lock()
            .unwrap()
            .push(format!("ADD COLUMN {}.{}", table, column.name));
        self.columns
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(column.clone());
        Ok(())
    }

    async fn index_exists(&self, table: &str, name: &str) -> Result<bool> {
        Ok(self
            .indexes
            .lock()
            .unwrap()
            .contains(&format!("{}.{}", table, name)))
    }

    async fn create_index(&self, table: &str, spec: &IndexSpec) -> Result<()> {
        if self.fail_create_index {
            return Err(MigrateError::reconcile(table, "simulated DDL failure"));
        }
        self.ddl
            .lock()
            .unwrap()
            .push(format!("CREATE INDEX {}.{}", table, spec.name));
        self.indexes
            .lock()
            .unwrap()
            .insert(format!("{}.{}", table, spec.name));
        Ok(())
    }

    async fn constraint_exists(&self, table: &str, name: &str) -> Result<bool> {
        Ok(self
            .constraints
            .lock()
            .unwrap()
            .contains(&format!("{}.{}", table, name)))
    }

    async fn create_foreign_key(&self, table: &str, fk: &ForeignKeyRef) -> Result<()> {
        if self.fail_create_foreign_key {
            return Err(MigrateError::reconcile(table, "simulated DDL failure"));
        }
        self.ddl
            .lock()
            .unwrap()
            .push(format!("ADD FOREIGN KEY {}.{}", table, fk.name));
        self.constraints
            .lock()
            .unwrap()
            .insert(format!("{}.{}", table, fk.name));
        Ok(())
    }

    async fn apply_batch(&self, spec: &WriteSpec, batch: &RowBatch) -> Result<BatchOutcome> {
        {
            let mut lose = self.lose_connection_after.lock().unwrap();
            if let Some(remaining) = lose.get_mut(&spec.table) {
                if *remaining == 0 {
                    return Err(MigrateError::connection_lost(
                        &spec.table,
                        "simulated connection loss",
                    ));
                }
                *remaining -= 1;
            }
        }

        let key_index = spec
            .pk_columns
            .first()
            .and_then(|pk| spec.columns.iter().position(|c| c.name == *pk));

        let mut outcome = BatchOutcome::default();
        let mut written = self.written.lock().unwrap();
        let mut seen = self.seen_keys.lock().unwrap();
        let table_written = written.entry(spec.table.clone()).or_default();
        let table_seen = seen.entry(spec.table.clone()).or_default();

        for row in &batch.rows {
            let key = key_index
                .and_then(|i| row.get(i))
                .and_then(PkValue::from_sql_value);

            if let Some(PkValue::Int(k)) = &key {
                if self.poison_keys.contains(k) {
                    outcome.failed.push(RowFailure {
                        key: key.clone(),
                        message: "simulated row failure".to_string(),
                    });
                    continue;
                }
            }

            match &key {
                Some(k) if table_seen.contains(k) => match spec.policy {
                    ConflictPolicy::KeepExisting => outcome.skipped += 1,
                    ConflictPolicy::Overwrite => outcome.inserted += 1,
                },
                Some(k) => {
                    table_seen.insert(k.clone());
                    table_written.push(row.clone());
                    outcome.inserted += 1;
                }
                None => {
                    table_written.push(row.clone());
                    outcome.inserted += 1;
                }
            }
        }

        Ok(outcome)
    }

    fn db_type(&self) -> &str {
        "mock"
    }

    async fn close(&self) {}
}
