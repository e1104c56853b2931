//! Target schema reconciliation.
//!
//! Brings the target close enough to the source schema for the copy to land:
//! source columns missing on the target are added as nullable columns, and
//! operator-declared indexes and foreign keys are created when absent. The
//! reconciler never invents constraints and never creates tables.
//!
//! Nothing here is fatal. Every failure becomes a warning on the outcome and
//! the table downgrades to copying whatever columns both sides share.

use tracing::{debug, info, warn};

use crate::config::ReconcileSettings;
use crate::core::schema::{ForeignKeyRef, IndexSpec, TableDescriptor};
use crate::core::traits::TargetWriter;
use crate::error::MigrateError;

/// What reconciliation did to one table.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Columns added to the target.
    pub columns_added: Vec<String>,

    /// Indexes created on the target.
    pub indexes_created: Vec<String>,

    /// Foreign keys created on the target.
    pub foreign_keys_created: Vec<String>,

    /// Failures, already formatted for the report.
    pub warnings: Vec<String>,
}

impl ReconcileOutcome {
    /// True when no DDL was applied. A clean second run looks like this.
    pub fn is_noop(&self) -> bool {
        self.columns_added.is_empty()
            && self.indexes_created.is_empty()
            && self.foreign_keys_created.is_empty()
    }
}

/// Reconcile one planned table on the target.
///
/// `table` carries the source-side descriptors; the current target columns
/// are read here so the diff reflects any DDL from earlier runs.
pub async fn reconcile_table(
    writer: &dyn TargetWriter,
    table: &TableDescriptor,
    settings: &ReconcileSettings,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    let target_columns = match writer.list_columns(&table.name).await {
        Ok(cols) => cols,
        Err(e) => {
            let warning = MigrateError::reconcile(&table.name, e).to_string();
            warn!("{}", warning);
            outcome.warnings.push(warning);
            return outcome;
        }
    };

    for column in &table.columns {
        if target_columns.iter().any(|c| c.name == column.name) {
            continue;
        }
        match writer.add_column(&table.name, column).await {
            Ok(()) => {
                info!(
                    table = %table.name,
                    column = %column.name,
                    semantic = %column.semantic,
                    "added missing column"
                );
                outcome.columns_added.push(column.name.clone());
            }
            Err(e) => {
                let warning = MigrateError::reconcile(
                    &table.name,
                    format!("adding column {}: {}", column.name, e),
                )
                .to_string();
                warn!("{}", warning);
                outcome.warnings.push(warning);
            }
        }
    }

    for declared in settings.indexes.iter().filter(|i| i.table == table.name) {
        match writer.index_exists(&table.name, &declared.name).await {
            Ok(true) => {
                debug!(table = %table.name, index = %declared.name, "index already present");
            }
            Ok(false) => {
                let spec = IndexSpec::from(declared);
                match writer.create_index(&table.name, &spec).await {
                    Ok(()) => {
                        info!(table = %table.name, index = %declared.name, "created index");
                        outcome.indexes_created.push(declared.name.clone());
                    }
                    Err(e) => {
                        let warning = MigrateError::reconcile(
                            &table.name,
                            format!("creating index {}: {}", declared.name, e),
                        )
                        .to_string();
                        warn!("{}", warning);
                        outcome.warnings.push(warning);
                    }
                }
            }
            Err(e) => {
                let warning = MigrateError::reconcile(
                    &table.name,
                    format!("checking index {}: {}", declared.name, e),
                )
                .to_string();
                warn!("{}", warning);
                outcome.warnings.push(warning);
            }
        }
    }

    for declared in settings
        .foreign_keys
        .iter()
        .filter(|f| f.table == table.name)
    {
        match writer.constraint_exists(&table.name, &declared.name).await {
            Ok(true) => {
                debug!(table = %table.name, fk = %declared.name, "foreign key already present");
            }
            Ok(false) => {
                let fk = ForeignKeyRef::from(declared);
                match writer.create_foreign_key(&table.name, &fk).await {
                    Ok(()) => {
                        info!(table = %table.name, fk = %declared.name, "created foreign key");
                        outcome.foreign_keys_created.push(declared.name.clone());
                    }
                    Err(e) => {
                        let warning = MigrateError::reconcile(
                            &table.name,
                            format!("creating foreign key {}: {}", declared.name, e),
                        )
                        .to_string();
                        warn!("{}", warning);
                        outcome.warnings.push(warning);
                    }
                }
            }
            Err(e) => {
                let warning = MigrateError::reconcile(
                    &table.name,
                    format!("checking foreign key {}: {}", declared.name, e),
                )
                .to_string();
                warn!("{}", warning);
                outcome.warnings.push(warning);
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeclaredForeignKey, DeclaredIndex};
    use crate::core::schema::SemanticType;
    use crate::testutil::{col, pk, MockTarget};

    fn users_table() -> TableDescriptor {
        TableDescriptor {
            name: "users".to_string(),
            columns: vec![
                pk("id", SemanticType::Integer),
                col("email", SemanticType::Text),
                col("created_at", SemanticType::Timestamp),
            ],
            primary_key: vec!["id".to_string()],
            on_source: true,
            on_target: true,
        }
    }

    fn declared_index(table: &str, name: &str) -> DeclaredIndex {
        DeclaredIndex {
            table: table.to_string(),
            name: name.to_string(),
            columns: vec!["email".to_string()],
            unique: true,
        }
    }

    fn declared_fk(table: &str, name: &str) -> DeclaredForeignKey {
        DeclaredForeignKey {
            table: table.to_string(),
            name: name.to_string(),
            columns: vec!["tenant_id".to_string()],
            references_table: "tenants".to_string(),
            references_columns: vec!["id".to_string()],
        }
    }

    #[tokio::test]
    async fn test_adds_missing_columns_only() {
        let target = MockTarget::new().with_table(
            "users",
            vec![pk("id", SemanticType::Integer), col("email", SemanticType::Text)],
        );

        let outcome =
            reconcile_table(&target, &users_table(), &ReconcileSettings::default()).await;

        assert_eq!(outcome.columns_added, vec!["created_at"]);
        assert!(outcome.warnings.is_empty());
        assert_eq!(target.applied_ddl(), vec!["ADD COLUMN users.created_at"]);
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let target = MockTarget::new().with_table(
            "users",
            vec![pk("id", SemanticType::Integer), col("email", SemanticType::Text)],
        );
        let settings = ReconcileSettings {
            indexes: vec![declared_index("users", "idx_users_email")],
            foreign_keys: vec![declared_fk("users", "fk_users_tenant")],
            ..ReconcileSettings::default()
        };

        let first = reconcile_table(&target, &users_table(), &settings).await;
        assert!(!first.is_noop());

        let second = reconcile_table(&target, &users_table(), &settings).await;
        assert!(second.is_noop(), "second run applied DDL: {:?}", second);
        assert!(second.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_declared_index_created_when_absent() {
        let target = MockTarget::new().with_table("users", users_table().columns);
        let settings = ReconcileSettings {
            indexes: vec![declared_index("users", "idx_users_email")],
            ..ReconcileSettings::default()
        };

        let outcome = reconcile_table(&target, &users_table(), &settings).await;

        assert_eq!(outcome.indexes_created, vec!["idx_users_email"]);
    }

    #[tokio::test]
    async fn test_existing_index_is_skipped() {
        let target = MockTarget::new()
            .with_table("users", users_table().columns)
            .with_existing_index("users", "idx_users_email");
        let settings = ReconcileSettings {
            indexes: vec![declared_index("users", "idx_users_email")],
            ..ReconcileSettings::default()
        };

        let outcome = reconcile_table(&target, &users_table(), &settings).await;

        assert!(outcome.indexes_created.is_empty());
        assert!(target.applied_ddl().is_empty());
    }

    #[tokio::test]
    async fn test_declarations_for_other_tables_are_ignored() {
        let target = MockTarget::new().with_table("users", users_table().columns);
        let settings = ReconcileSettings {
            indexes: vec![declared_index("invoices", "idx_invoices_number")],
            foreign_keys: vec![declared_fk("invoices", "fk_invoices_account")],
            ..ReconcileSettings::default()
        };

        let outcome = reconcile_table(&target, &users_table(), &settings).await;

        assert!(outcome.is_noop());
    }

    #[tokio::test]
    async fn test_ddl_failure_becomes_warning() {
        let mut target = MockTarget::new().with_table(
            "users",
            vec![pk("id", SemanticType::Integer)],
        );
        target.fail_add_column = true;

        let outcome =
            reconcile_table(&target, &users_table(), &ReconcileSettings::default()).await;

        assert!(outcome.columns_added.is_empty());
        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome.warnings[0].contains("email"));
        assert!(outcome.warnings[1].contains("created_at"));
    }

    #[tokio::test]
    async fn test_unreadable_target_columns_becomes_warning() {
        let mut target = MockTarget::new().with_table("users", vec![]);
        target.fail_columns_for.insert("users".to_string());

        let outcome =
            reconcile_table(&target, &users_table(), &ReconcileSettings::default()).await;

        assert!(outcome.is_noop());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("users"));
    }

    #[tokio::test]
    async fn test_fk_failure_does_not_stop_index_creation() {
        let mut target = MockTarget::new().with_table("users", users_table().columns);
        target.fail_create_foreign_key = true;
        let settings = ReconcileSettings {
            indexes: vec![declared_index("users", "idx_users_email")],
            foreign_keys: vec![declared_fk("users", "fk_users_tenant")],
            ..ReconcileSettings::default()
        };

        let outcome = reconcile_table(&target, &users_table(), &settings).await;

        assert_eq!(outcome.indexes_created, vec!["idx_users_email"]);
        assert!(outcome.foreign_keys_created.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }
}
