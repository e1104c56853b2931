//! Row-count verification.
//!
//! After the copy phase (or standalone via `verify`), every planned table is
//! counted on both sides and compared. Operator-designated key tables are
//! checked as well, even when they are not part of the plan, and flagged in
//! the output. A count failure on one table never stops the remaining
//! checks; that table simply reports as unverified.

use tracing::{info, warn};

use crate::core::traits::{SourceReader, TargetWriter};
use crate::plan::MigrationPlan;
use crate::report::{VerificationResult, VerifyReport};

/// Count both sides for every planned table plus the key tables.
///
/// Key tables already in the plan are checked once and flagged; key tables
/// outside the plan are appended after it, in declaration order.
pub async fn verify_counts(
    reader: &dyn SourceReader,
    writer: &dyn TargetWriter,
    plan: &MigrationPlan,
    key_tables: &[String],
) -> VerifyReport {
    let mut results = Vec::new();

    for table in plan.table_names() {
        let key = key_tables.iter().any(|k| k == table);
        results.push(check_table(reader, writer, table, key).await);
    }

    for table in key_tables {
        if plan.position(table).is_none() {
            results.push(check_table(reader, writer, table, true).await);
        }
    }

    let report = VerifyReport::from_results(results);
    if report.is_clean() {
        info!(
            tables = report.tables_checked,
            rows = report.total_source_rows,
            "verification passed"
        );
    } else {
        warn!(
            tables = report.tables_checked,
            mismatched = report.mismatched,
            "verification found mismatches"
        );
    }
    report
}

async fn check_table(
    reader: &dyn SourceReader,
    writer: &dyn TargetWriter,
    table: &str,
    key_table: bool,
) -> VerificationResult {
    let mut result = VerificationResult {
        table: table.to_string(),
        source_count: 0,
        target_count: 0,
        matched: false,
        key_table,
        error: None,
    };

    match reader.count_rows(table).await {
        Ok(n) => result.source_count = n,
        Err(e) => {
            warn!(table = %table, error = %e, "source count failed");
            result.error = Some(format!("source: {}", e));
            return result;
        }
    }

    match writer.count_rows(table).await {
        Ok(n) => result.target_count = n,
        Err(e) => {
            warn!(table = %table, error = %e, "target count failed");
            result.error = Some(format!("target: {}", e));
            return result;
        }
    }

    result.matched = result.source_count == result.target_count;
    if result.matched {
        info!(
            table = %table,
            rows = result.source_count,
            key_table,
            "counts match"
        );
    } else {
        warn!(
            table = %table,
            source = result.source_count,
            target = result.target_count,
            key_table,
            "count mismatch"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::SemanticType;
    use crate::core::value::SqlValue;
    use crate::testutil::{pk, MockSource, MockTarget};

    fn plan_of(tables: &[&str]) -> MigrationPlan {
        let names: Vec<String> = tables.iter().map(|s| s.to_string()).collect();
        MigrationPlan::build(&[names.clone()], &names, &names)
    }

    fn source_with_counts(counts: &[(&str, i64)]) -> MockSource {
        let mut source = MockSource::new();
        for (table, n) in counts {
            source = source.with_table(table, vec![pk("id", SemanticType::Integer)], vec![]);
            source.counts.insert(table.to_string(), *n);
        }
        source
    }

    fn target_with_counts(counts: &[(&str, i64)]) -> MockTarget {
        let mut target = MockTarget::new();
        for (table, n) in counts {
            target.tables.push(table.to_string());
            target.counts.insert(table.to_string(), *n);
        }
        target
    }

    #[tokio::test]
    async fn test_matching_counts_produce_clean_report() {
        let source = source_with_counts(&[("tenants", 10), ("users", 100)]);
        let target = target_with_counts(&[("tenants", 10), ("users", 100)]);

        let report = verify_counts(&source, &target, &plan_of(&["tenants", "users"]), &[]).await;

        assert!(report.is_clean());
        assert_eq!(report.tables_checked, 2);
        assert_eq!(report.total_source_rows, 110);
        assert_eq!(report.total_target_rows, 110);
        assert!(report.results.iter().all(|r| r.matched));
    }

    #[tokio::test]
    async fn test_mismatch_is_reported_per_table() {
        let source = source_with_counts(&[("tenants", 10), ("users", 100)]);
        let target = target_with_counts(&[("tenants", 10), ("users", 99)]);

        let report = verify_counts(&source, &target, &plan_of(&["tenants", "users"]), &[]).await;

        assert!(!report.is_clean());
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.mismatched_tables(), vec!["users"]);
    }

    #[tokio::test]
    async fn test_key_tables_outside_the_plan_are_appended_and_flagged() {
        let source = source_with_counts(&[("tenants", 10), ("audit_log", 5)]);
        let target = target_with_counts(&[("tenants", 10), ("audit_log", 5)]);

        let report = verify_counts(
            &source,
            &target,
            &plan_of(&["tenants"]),
            &["audit_log".to_string()],
        )
        .await;

        assert_eq!(report.tables_checked, 2);
        assert_eq!(report.results[1].table, "audit_log");
        assert!(report.results[1].key_table);
        assert!(!report.results[0].key_table);
    }

    #[tokio::test]
    async fn test_key_table_in_the_plan_is_checked_once_and_flagged() {
        let source = source_with_counts(&[("users", 100)]);
        let target = target_with_counts(&[("users", 100)]);

        let report = verify_counts(
            &source,
            &target,
            &plan_of(&["users"]),
            &["users".to_string()],
        )
        .await;

        assert_eq!(report.tables_checked, 1);
        assert!(report.results[0].key_table);
    }

    #[tokio::test]
    async fn test_count_failure_records_error_and_continues() {
        let mut source = source_with_counts(&[("tenants", 10), ("users", 100)]);
        source.fail_counts_for.insert("tenants".to_string());
        let target = target_with_counts(&[("tenants", 10), ("users", 100)]);

        let report = verify_counts(&source, &target, &plan_of(&["tenants", "users"]), &[]).await;

        assert_eq!(report.tables_checked, 2);
        assert_eq!(report.mismatched, 1);
        let failed = &report.results[0];
        assert!(!failed.matched);
        assert!(failed.error.as_deref().unwrap().starts_with("source:"));
        assert!(report.results[1].matched, "later tables still checked");
    }

    #[tokio::test]
    async fn test_target_count_failure_is_attributed_to_the_target() {
        let source = source_with_counts(&[("users", 100)]);
        let mut target = target_with_counts(&[("users", 100)]);
        target.fail_counts_for.insert("users".to_string());

        let report = verify_counts(&source, &target, &plan_of(&["users"]), &[]).await;

        let result = &report.results[0];
        assert!(!result.matched);
        assert!(result.error.as_deref().unwrap().starts_with("target:"));
        assert_eq!(result.source_count, 100, "source side was still counted");
    }

    #[tokio::test]
    async fn test_counts_fall_back_to_written_rows() {
        // without an explicit count the mock target counts written rows
        let source = source_with_counts(&[("users", 0)]);
        let target = MockTarget::new().with_table("users", vec![pk("id", SemanticType::Integer)]);
        target
            .written
            .lock()
            .unwrap()
            .insert("users".to_string(), vec![vec![SqlValue::I64(1)]]);

        let report = verify_counts(&source, &target, &plan_of(&["users"]), &[]).await;

        assert_eq!(report.results[0].target_count, 1);
    }
}
