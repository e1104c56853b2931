//! Streaming table copy with idempotent writes.
//!
//! One table at a time: the reader task streams batches over a bounded
//! channel while the writer applies them, so reads stay ahead of writes
//! without unbounded buffering. Every value passes through the conversion
//! layer on the way. Row conflicts are outcomes, not errors; only connection
//! loss fails the table, and it fails only that table.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MigrationSettings;
use crate::convert::{convert_row, TargetCaps};
use crate::core::schema::{ColumnDescriptor, SemanticType, TableDescriptor};
use crate::core::traits::{ReadOptions, SourceReader, TargetWriter, WriteSpec};
use crate::core::value::RowBatch;
use crate::report::{TableMigrationResult, TableStatus};

/// Source/target column intersection, by exact name, in source order.
pub fn intersect_columns(
    source: &[ColumnDescriptor],
    target: &[ColumnDescriptor],
) -> Vec<ColumnDescriptor> {
    source
        .iter()
        .filter(|c| target.iter().any(|t| t.name == c.name))
        .cloned()
        .collect()
}

/// Copies tables from one engine to the other, one at a time.
pub struct Copier<'a> {
    reader: &'a dyn SourceReader,
    writer: &'a dyn TargetWriter,
    settings: &'a MigrationSettings,
    caps: TargetCaps,
    cancel: CancellationToken,
}

impl<'a> Copier<'a> {
    pub fn new(
        reader: &'a dyn SourceReader,
        writer: &'a dyn TargetWriter,
        settings: &'a MigrationSettings,
        caps: TargetCaps,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader,
            writer,
            settings,
            caps,
            cancel,
        }
    }

    /// Copy one table. Never returns an error: every failure shape lands in
    /// the result so the run can move on to the next table.
    ///
    /// `target_columns` must be read after reconciliation so columns added
    /// there count toward the intersection.
    pub async fn copy_table(
        &self,
        table: &TableDescriptor,
        target_columns: &[ColumnDescriptor],
    ) -> TableMigrationResult {
        let mut result = TableMigrationResult::new(&table.name);
        let started = Instant::now();

        let columns = intersect_columns(&table.columns, target_columns);
        if columns.is_empty() {
            warn!(table = %table.name, "no columns in common with the target; nothing to copy");
            result.status = TableStatus::NoMatchingColumns;
            result
                .warnings
                .push("no columns in common with the target".to_string());
            result.finish(started.elapsed());
            return result;
        }

        match self.reader.count_rows(&table.name).await {
            Ok(n) => result.source_rows = n,
            Err(e) => {
                warn!(table = %table.name, error = %e, "source count failed");
                result.status = TableStatus::Failed;
                result.error = Some(e.to_string());
                result.finish(started.elapsed());
                return result;
            }
        }

        // primary-key columns that survived the intersection drive the
        // conflict clause; with none left the write degrades to insert-ignore
        let pk_columns: Vec<String> = table
            .primary_key
            .iter()
            .filter(|k| columns.iter().any(|c| c.name == k.as_str()))
            .cloned()
            .collect();

        let key_index = table
            .keyset_column()
            .and_then(|kc| columns.iter().position(|c| c.name == kc.name));
        if key_index.is_none() {
            debug!(table = %table.name, "no sortable single-column key; using offset pagination");
            result
                .warnings
                .push("no single sortable primary key; copied with offset pagination".to_string());
        }

        info!(
            table = %table.name,
            rows = result.source_rows,
            columns = columns.len(),
            "copying table"
        );

        let semantics: Vec<SemanticType> = columns.iter().map(|c| c.semantic).collect();
        let opts = ReadOptions {
            table: table.name.clone(),
            columns: columns.clone(),
            key_index,
            batch_size: self.settings.batch_size,
            read_ahead: self.settings.read_ahead,
        };
        let spec = WriteSpec {
            table: table.name.clone(),
            columns,
            pk_columns,
            policy: self.settings.conflict_policy,
        };

        let mut rx = self.reader.read_table(opts);

        loop {
            let Some(item) = rx.recv().await else { break };

            // checked between batches: the batch being applied always
            // finishes, committed work is preserved
            if self.cancel.is_cancelled() {
                warn!(table = %table.name, "cancellation requested; stopping this table");
                result.status = TableStatus::Cancelled;
                break;
            }

            let RowBatch {
                rows,
                last_key,
                is_last,
            } = match item {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(table = %table.name, error = %e, "source stream failed");
                    result.status = TableStatus::Failed;
                    result.error = Some(e.to_string());
                    break;
                }
            };

            if !rows.is_empty() {
                let rows = rows
                    .into_iter()
                    .map(|row| convert_row(row, &semantics, &self.caps))
                    .collect();
                let converted = RowBatch {
                    rows,
                    last_key,
                    is_last,
                };

                match self.writer.apply_batch(&spec, &converted).await {
                    Ok(outcome) => {
                        result.absorb(outcome);
                        debug!(
                            table = %table.name,
                            inserted = result.rows_inserted,
                            skipped = result.rows_skipped,
                            failed = result.rows_failed,
                            "batch applied"
                        );
                    }
                    Err(e) => {
                        warn!(table = %table.name, error = %e, "write failed; keeping committed batches");
                        result.status = TableStatus::Failed;
                        result.error = Some(e.to_string());
                        break;
                    }
                }
            }

            if is_last {
                break;
            }
        }

        result.finish(started.elapsed());
        match result.status {
            TableStatus::Completed => info!(
                table = %table.name,
                inserted = result.rows_inserted,
                skipped = result.rows_skipped,
                failed = result.rows_failed,
                elapsed_secs = result.duration_seconds,
                rows_per_sec = result.rows_per_second,
                "table copy complete"
            ),
            TableStatus::Failed => warn!(
                table = %table.name,
                error = result.error.as_deref().unwrap_or("unknown"),
                inserted = result.rows_inserted,
                "table copy failed"
            ),
            _ => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;
    use crate::core::schema::{PkValue, SemanticType};
    use crate::core::traits::ConflictPolicy;
    use crate::core::value::{Row, SqlValue};
    use crate::testutil::{col, pk, MockSource, MockTarget};
    use uuid::Uuid;

    fn settings(batch_size: usize) -> MigrationSettings {
        MigrationSettings {
            batch_size,
            read_ahead: 2,
            conflict_policy: ConflictPolicy::KeepExisting,
            tables: Vec::new(),
        }
    }

    fn passthrough_caps() -> TargetCaps {
        TargetCaps {
            native_bool: true,
            tz_fidelity: true,
        }
    }

    fn users_columns() -> Vec<ColumnDescriptor> {
        vec![pk("id", SemanticType::Integer), col("email", SemanticType::Text)]
    }

    fn users_table() -> TableDescriptor {
        TableDescriptor {
            name: "users".to_string(),
            columns: users_columns(),
            primary_key: vec!["id".to_string()],
            on_source: true,
            on_target: true,
        }
    }

    fn user_rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|i| {
                vec![
                    SqlValue::I64(i),
                    SqlValue::text_owned(format!("user{}@example.com", i)),
                ]
            })
            .collect()
    }

    fn copier<'a>(
        source: &'a MockSource,
        target: &'a MockTarget,
        settings: &'a MigrationSettings,
    ) -> Copier<'a> {
        Copier::new(
            source,
            target,
            settings,
            passthrough_caps(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_copies_all_rows_in_batches() {
        let source = MockSource::new().with_table("users", users_columns(), user_rows(5));
        let target = MockTarget::new().with_table("users", users_columns());
        let settings = settings(2);

        let result = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;

        assert_eq!(result.status, TableStatus::Completed);
        assert_eq!(result.source_rows, 5);
        assert_eq!(result.rows_inserted, 5);
        assert_eq!(result.rows_skipped, 0);
        assert_eq!(result.rows_failed, 0);
        assert_eq!(target.written_rows("users"), 5);
    }

    #[tokio::test]
    async fn test_empty_table_completes_with_zero_rows() {
        let source = MockSource::new().with_table("users", users_columns(), vec![]);
        let target = MockTarget::new().with_table("users", users_columns());
        let settings = settings(2);

        let result = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;

        assert_eq!(result.status, TableStatus::Completed);
        assert_eq!(result.rows_inserted, 0);
        assert_eq!(target.written_rows("users"), 0);
    }

    #[tokio::test]
    async fn test_empty_intersection_is_a_warning_not_an_error() {
        let source = MockSource::new().with_table("users", users_columns(), user_rows(3));
        let target =
            MockTarget::new().with_table("users", vec![col("unrelated", SemanticType::Text)]);
        let settings = settings(2);

        let result = copier(&source, &target, &settings)
            .copy_table(&users_table(), &[col("unrelated", SemanticType::Text)])
            .await;

        assert_eq!(result.status, TableStatus::NoMatchingColumns);
        assert_eq!(result.rows_inserted, 0);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.error.is_none());
        assert_eq!(target.written_rows("users"), 0);
    }

    #[tokio::test]
    async fn test_intersection_drops_source_only_columns() {
        let source_cols = vec![
            pk("id", SemanticType::Integer),
            col("email", SemanticType::Text),
            col("legacy_flag", SemanticType::Boolean),
        ];
        let rows: Vec<Row> = vec![vec![
            SqlValue::I64(1),
            SqlValue::text_owned("a@example.com".to_string()),
            SqlValue::Bool(true),
        ]];
        let source = MockSource::new().with_table("users", source_cols.clone(), rows);
        let target = MockTarget::new().with_table("users", users_columns());
        let settings = settings(10);

        let table = TableDescriptor {
            name: "users".to_string(),
            columns: source_cols,
            primary_key: vec!["id".to_string()],
            on_source: true,
            on_target: true,
        };
        let result = copier(&source, &target, &settings)
            .copy_table(&table, &users_columns())
            .await;

        assert_eq!(result.status, TableStatus::Completed);
        assert_eq!(result.rows_inserted, 1);
        let written = target.written.lock().unwrap();
        assert_eq!(written["users"][0].len(), 2, "legacy_flag must not be copied");
    }

    #[tokio::test]
    async fn test_values_are_converted_for_the_target() {
        let id = Uuid::parse_str("A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11").unwrap();
        let columns = vec![
            pk("id", SemanticType::Uuid),
            col("active", SemanticType::Boolean),
        ];
        let rows: Vec<Row> = vec![vec![SqlValue::Uuid(id), SqlValue::Bool(true)]];
        let source = MockSource::new().with_table("users", columns.clone(), rows);
        let target = MockTarget::new().with_table("users", columns.clone());
        let settings = settings(10);

        let table = TableDescriptor {
            name: "users".to_string(),
            columns: columns.clone(),
            primary_key: vec!["id".to_string()],
            on_source: true,
            on_target: true,
        };
        let mysql_caps = TargetCaps::for_engine(EngineKind::Mysql);
        let copier = Copier::new(
            &source,
            &target,
            &settings,
            mysql_caps,
            CancellationToken::new(),
        );
        let result = copier.copy_table(&table, &columns).await;

        assert_eq!(result.rows_inserted, 1);
        let written = target.written.lock().unwrap();
        let row = &written["users"][0];
        assert_eq!(
            row[0],
            SqlValue::text_owned("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11".to_string()),
            "uuid renders canonical lowercase"
        );
        assert_eq!(row[1], SqlValue::I16(1), "bool becomes 0/1 without native bool");
    }

    #[tokio::test]
    async fn test_row_failures_do_not_stop_the_copy() {
        let source = MockSource::new().with_table("users", users_columns(), user_rows(5));
        let mut target = MockTarget::new().with_table("users", users_columns());
        target.poison_keys.insert(3);
        let settings = settings(2);

        let result = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;

        assert_eq!(result.status, TableStatus::Completed);
        assert_eq!(result.rows_inserted, 4);
        assert_eq!(result.rows_failed, 1);
        assert_eq!(result.failed_rows.len(), 1);
        assert_eq!(result.failed_rows[0].key, Some(PkValue::Int(3)));
    }

    #[tokio::test]
    async fn test_rerun_skips_existing_rows() {
        let source = MockSource::new().with_table("users", users_columns(), user_rows(5));
        let target = MockTarget::new().with_table("users", users_columns());
        let settings = settings(2);

        let first = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;
        assert_eq!(first.rows_inserted, 5);

        let second = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;
        assert_eq!(second.status, TableStatus::Completed);
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(second.rows_skipped, 5);
        assert_eq!(target.written_rows("users"), 5, "rows are never duplicated");
    }

    #[tokio::test]
    async fn test_overwrite_policy_updates_existing_rows() {
        let source = MockSource::new().with_table("users", users_columns(), user_rows(3));
        let target = MockTarget::new()
            .with_table("users", users_columns())
            .with_seen_key("users", PkValue::Int(1));
        let mut settings = settings(10);
        settings.conflict_policy = ConflictPolicy::Overwrite;

        let result = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;

        assert_eq!(result.rows_inserted, 3);
        assert_eq!(result.rows_skipped, 0);
    }

    #[tokio::test]
    async fn test_connection_loss_fails_table_but_keeps_committed_batches() {
        let source = MockSource::new().with_table("users", users_columns(), user_rows(5));
        let target = MockTarget::new()
            .with_table("users", users_columns())
            .lose_connection("users", 1);
        let settings = settings(2);

        let result = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;

        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_inserted, 2, "first batch stays committed");
        let error = result.error.unwrap();
        assert!(error.contains("Connection lost"), "got: {}", error);
    }

    #[tokio::test]
    async fn test_stream_error_fails_table() {
        let mut source = MockSource::new().with_table("users", users_columns(), user_rows(5));
        source.stream_error_after = Some(1);
        let target = MockTarget::new().with_table("users", users_columns());
        let settings = settings(2);

        let result = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;

        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_inserted, 2);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_the_next_batch() {
        let source = MockSource::new().with_table("users", users_columns(), user_rows(5));
        let target = MockTarget::new().with_table("users", users_columns());
        let settings = settings(2);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let copier = Copier::new(&source, &target, &settings, passthrough_caps(), cancel);
        let result = copier.copy_table(&users_table(), &users_columns()).await;

        assert_eq!(result.status, TableStatus::Cancelled);
        assert_eq!(result.rows_inserted, 0);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_source_count_failure_fails_table() {
        let mut source = MockSource::new().with_table("users", users_columns(), user_rows(2));
        source.fail_counts_for.insert("users".to_string());
        let target = MockTarget::new().with_table("users", users_columns());
        let settings = settings(2);

        let result = copier(&source, &target, &settings)
            .copy_table(&users_table(), &users_columns())
            .await;

        assert_eq!(result.status, TableStatus::Failed);
        assert!(result.error.unwrap().contains("count failed"));
    }

    #[tokio::test]
    async fn test_composite_key_falls_back_to_offset_with_warning() {
        let columns = vec![
            pk("tenant_id", SemanticType::Integer),
            pk("user_id", SemanticType::Integer),
        ];
        let rows: Vec<Row> = vec![vec![SqlValue::I64(1), SqlValue::I64(2)]];
        let source = MockSource::new().with_table("memberships", columns.clone(), rows);
        let target = MockTarget::new().with_table("memberships", columns.clone());
        let settings = settings(10);

        let table = TableDescriptor {
            name: "memberships".to_string(),
            columns: columns.clone(),
            primary_key: vec!["tenant_id".to_string(), "user_id".to_string()],
            on_source: true,
            on_target: true,
        };
        let result = copier(&source, &target, &settings)
            .copy_table(&table, &columns)
            .await;

        assert_eq!(result.status, TableStatus::Completed);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("offset pagination")));
    }
}
