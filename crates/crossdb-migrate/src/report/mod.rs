//! Run results and the final report.
//!
//! Everything here is plain data: the copier and verifier fill these types
//! in, the orchestrator assembles them, and the CLI renders them as text or
//! serializes the whole report with `--output json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::traits::{BatchOutcome, RowFailure};
use crate::error::Result;
use crate::plan::MigrationPlan;

/// Row-failure details kept per table. Most failures in a table repeat one
/// root cause, so a bounded sample is enough to diagnose them.
pub const FAILED_ROW_SAMPLE: usize = 20;

/// Terminal status of one table's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// All batches applied.
    Completed,
    /// Source and target share no columns; nothing was copied.
    NoMatchingColumns,
    /// The copy aborted mid-table (connection loss, stream error).
    Failed,
    /// A cancellation request stopped the copy after the current batch.
    Cancelled,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Completed => "completed",
            TableStatus::NoMatchingColumns => "no_matching_columns",
            TableStatus::Failed => "failed",
            TableStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of copying one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMigrationResult {
    /// Table name.
    pub table: String,

    /// Terminal status.
    pub status: TableStatus,

    /// Source row count taken before the copy.
    pub source_rows: i64,

    /// Rows newly inserted (or updated under the overwrite policy).
    pub rows_inserted: u64,

    /// Rows skipped on conflict.
    pub rows_skipped: u64,

    /// Rows that failed to write or convert.
    pub rows_failed: u64,

    /// Wall-clock copy time.
    pub duration_seconds: f64,

    /// Throughput over processed rows.
    pub rows_per_second: i64,

    /// Error text when the table failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Non-fatal notes (reconciliation downgrades, pagination fallbacks).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Bounded sample of row-failure details.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_rows: Vec<RowFailure>,
}

impl TableMigrationResult {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::Completed,
            source_rows: 0,
            rows_inserted: 0,
            rows_skipped: 0,
            rows_failed: 0,
            duration_seconds: 0.0,
            rows_per_second: 0,
            error: None,
            warnings: Vec::new(),
            failed_rows: Vec::new(),
        }
    }

    /// Fold one batch outcome into the running counts, keeping at most
    /// [`FAILED_ROW_SAMPLE`] failure details.
    pub fn absorb(&mut self, outcome: BatchOutcome) {
        self.rows_inserted += outcome.inserted;
        self.rows_skipped += outcome.skipped;
        self.rows_failed += outcome.failed.len() as u64;
        for failure in outcome.failed {
            if self.failed_rows.len() >= FAILED_ROW_SAMPLE {
                break;
            }
            self.failed_rows.push(failure);
        }
    }

    /// Rows this copy touched on the target, regardless of disposition.
    pub fn rows_processed(&self) -> u64 {
        self.rows_inserted + self.rows_skipped + self.rows_failed
    }

    /// Record the elapsed time and derive the throughput.
    pub fn finish(&mut self, elapsed: std::time::Duration) {
        self.duration_seconds = elapsed.as_secs_f64();
        self.rows_per_second = throughput(self.rows_processed(), self.duration_seconds);
    }
}

/// One table's count comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Table name.
    pub table: String,

    /// `COUNT(*)` on the source.
    pub source_count: i64,

    /// `COUNT(*)` on the target.
    pub target_count: i64,

    /// Whether the counts agree. A table whose counts could not be read
    /// reports `false`.
    pub matched: bool,

    /// Whether the table is on the operator's key-table list.
    pub key_table: bool,

    /// Error text when a count query failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate verification outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Per-table results, in check order.
    pub results: Vec<VerificationResult>,

    /// Tables checked.
    pub tables_checked: usize,

    /// Tables whose counts disagree or could not be read.
    pub mismatched: usize,

    /// Sum of source counts over tables that produced one.
    pub total_source_rows: i64,

    /// Sum of target counts over tables that produced one.
    pub total_target_rows: i64,
}

impl VerifyReport {
    pub fn from_results(results: Vec<VerificationResult>) -> Self {
        let tables_checked = results.len();
        let mismatched = results.iter().filter(|r| !r.matched).count();
        let total_source_rows = results.iter().map(|r| r.source_count).sum();
        let total_target_rows = results.iter().map(|r| r.target_count).sum();
        Self {
            results,
            tables_checked,
            mismatched,
            total_source_rows,
            total_target_rows,
        }
    }

    /// True when every checked table matched.
    pub fn is_clean(&self) -> bool {
        self.mismatched == 0
    }

    /// Names of the tables that did not match.
    pub fn mismatched_tables(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.matched)
            .map(|r| r.table.as_str())
            .collect()
    }
}

/// Result of a full migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Final status: `completed`, `completed_with_failures` or `cancelled`.
    pub status: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// The plan the run executed, including the presence report.
    pub plan: MigrationPlan,

    /// Per-table outcomes, in copy order.
    pub tables: Vec<TableMigrationResult>,

    /// Tables processed.
    pub tables_total: usize,

    /// Tables that completed.
    pub tables_completed: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Names of the failed tables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tables: Vec<String>,

    /// Total rows inserted.
    pub rows_inserted: u64,

    /// Total rows skipped on conflict.
    pub rows_skipped: u64,

    /// Total rows that failed.
    pub rows_failed: u64,

    /// Average throughput over processed rows.
    pub rows_per_second: i64,

    /// Run-level warnings (reconciliation failures, presence gaps).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Verification outcome. Absent on dry runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerifyReport>,
}

impl MigrationReport {
    /// Assemble the report from the per-phase pieces.
    pub fn assemble(
        plan: MigrationPlan,
        tables: Vec<TableMigrationResult>,
        warnings: Vec<String>,
        verification: Option<VerifyReport>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let tables_total = tables.len();
        let tables_completed = tables
            .iter()
            .filter(|t| t.status == TableStatus::Completed)
            .count();
        let failed_tables: Vec<String> = tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| t.table.clone())
            .collect();
        let tables_failed = failed_tables.len();
        let cancelled = tables.iter().any(|t| t.status == TableStatus::Cancelled);

        let rows_inserted = tables.iter().map(|t| t.rows_inserted).sum();
        let rows_skipped = tables.iter().map(|t| t.rows_skipped).sum();
        let rows_failed = tables.iter().map(|t| t.rows_failed).sum();
        let processed: u64 = tables.iter().map(|t| t.rows_processed()).sum();

        let clean_verify = verification.as_ref().map(|v| v.is_clean()).unwrap_or(true);
        let status = if cancelled {
            "cancelled"
        } else if tables_failed > 0 || rows_failed > 0 || !clean_verify {
            "completed_with_failures"
        } else {
            "completed"
        };

        Self {
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds,
            plan,
            tables,
            tables_total,
            tables_completed,
            tables_failed,
            failed_tables,
            rows_inserted,
            rows_skipped,
            rows_failed,
            rows_per_second: throughput(processed, duration_seconds),
            warnings,
            verification,
        }
    }

    /// Whether the run earns exit code 0: nothing failed, nothing cancelled
    /// and verification (when it ran) found no mismatches.
    pub fn succeeded(&self) -> bool {
        self.status == "completed"
    }

    /// Whether a cancellation request ended the run early.
    pub fn was_cancelled(&self) -> bool {
        self.status == "cancelled"
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn throughput(rows: u64, seconds: f64) -> i64 {
    if seconds > 0.0 {
        (rows as f64 / seconds) as i64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::PkValue;

    fn outcome(inserted: u64, skipped: u64, failures: usize) -> BatchOutcome {
        BatchOutcome {
            inserted,
            skipped,
            failed: (0..failures)
                .map(|i| RowFailure {
                    key: Some(PkValue::Int(i as i64)),
                    message: "value out of range".to_string(),
                })
                .collect(),
        }
    }

    fn completed(table: &str, inserted: u64) -> TableMigrationResult {
        let mut result = TableMigrationResult::new(table);
        result.absorb(outcome(inserted, 0, 0));
        result
    }

    #[test]
    fn test_absorb_accumulates_and_bounds_the_sample() {
        let mut result = TableMigrationResult::new("users");
        result.absorb(outcome(10, 2, 15));
        result.absorb(outcome(5, 1, 15));

        assert_eq!(result.rows_inserted, 15);
        assert_eq!(result.rows_skipped, 3);
        assert_eq!(result.rows_failed, 30);
        assert_eq!(result.failed_rows.len(), FAILED_ROW_SAMPLE);
        assert_eq!(result.rows_processed(), 48);
    }

    #[test]
    fn test_finish_derives_throughput() {
        let mut result = TableMigrationResult::new("users");
        result.absorb(outcome(1000, 0, 0));
        result.finish(std::time::Duration::from_secs(2));
        assert_eq!(result.rows_per_second, 500);

        // zero elapsed must not divide by zero
        let mut instant = TableMigrationResult::new("empty");
        instant.finish(std::time::Duration::ZERO);
        assert_eq!(instant.rows_per_second, 0);
    }

    #[test]
    fn test_verify_report_aggregates() {
        let report = VerifyReport::from_results(vec![
            VerificationResult {
                table: "tenants".to_string(),
                source_count: 10,
                target_count: 10,
                matched: true,
                key_table: true,
                error: None,
            },
            VerificationResult {
                table: "users".to_string(),
                source_count: 100,
                target_count: 99,
                matched: false,
                key_table: false,
                error: None,
            },
        ]);

        assert_eq!(report.tables_checked, 2);
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.total_source_rows, 110);
        assert_eq!(report.total_target_rows, 109);
        assert!(!report.is_clean());
        assert_eq!(report.mismatched_tables(), vec!["users"]);
    }

    #[test]
    fn test_verify_error_counts_as_mismatch() {
        let report = VerifyReport::from_results(vec![VerificationResult {
            table: "users".to_string(),
            source_count: 0,
            target_count: 0,
            matched: false,
            key_table: false,
            error: Some("connection refused".to_string()),
        }]);

        assert_eq!(report.mismatched, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_report_aggregates_counts_and_failed_tables() {
        let mut failed = TableMigrationResult::new("invoices");
        failed.status = TableStatus::Failed;
        failed.error = Some("connection lost".to_string());
        failed.absorb(outcome(50, 0, 0));

        let report = MigrationReport::assemble(
            MigrationPlan::default(),
            vec![completed("tenants", 10), completed("users", 100), failed],
            vec![],
            Some(VerifyReport::default()),
            Utc::now(),
        );

        assert_eq!(report.tables_total, 3);
        assert_eq!(report.tables_completed, 2);
        assert_eq!(report.tables_failed, 1);
        assert_eq!(report.failed_tables, vec!["invoices"]);
        assert_eq!(report.rows_inserted, 160);
        assert_eq!(report.status, "completed_with_failures");
        assert!(!report.succeeded());
    }

    #[test]
    fn test_report_completed_when_everything_matches() {
        let report = MigrationReport::assemble(
            MigrationPlan::default(),
            vec![completed("tenants", 10)],
            vec![],
            Some(VerifyReport::from_results(vec![VerificationResult {
                table: "tenants".to_string(),
                source_count: 10,
                target_count: 10,
                matched: true,
                key_table: false,
                error: None,
            }])),
            Utc::now(),
        );

        assert_eq!(report.status, "completed");
        assert!(report.succeeded());
    }

    #[test]
    fn test_report_flags_verification_mismatch() {
        let report = MigrationReport::assemble(
            MigrationPlan::default(),
            vec![completed("users", 10)],
            vec![],
            Some(VerifyReport::from_results(vec![VerificationResult {
                table: "users".to_string(),
                source_count: 10,
                target_count: 9,
                matched: false,
                key_table: false,
                error: None,
            }])),
            Utc::now(),
        );

        assert_eq!(report.status, "completed_with_failures");
        assert!(!report.succeeded());
    }

    #[test]
    fn test_report_cancelled_wins_over_failures() {
        let mut cancelled = TableMigrationResult::new("users");
        cancelled.status = TableStatus::Cancelled;

        let report = MigrationReport::assemble(
            MigrationPlan::default(),
            vec![cancelled],
            vec![],
            None,
            Utc::now(),
        );

        assert_eq!(report.status, "cancelled");
        assert!(report.was_cancelled());
        assert!(!report.succeeded());
    }

    #[test]
    fn test_row_failures_alone_deny_success() {
        let mut partial = TableMigrationResult::new("users");
        partial.absorb(outcome(99, 0, 1));

        let report = MigrationReport::assemble(
            MigrationPlan::default(),
            vec![partial],
            vec![],
            Some(VerifyReport::default()),
            Utc::now(),
        );

        assert_eq!(report.status, "completed_with_failures");
        assert_eq!(report.tables_failed, 0);
    }
}
