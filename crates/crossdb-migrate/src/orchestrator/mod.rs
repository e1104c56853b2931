//! Migration orchestrator - main workflow coordinator.
//!
//! Owns the two connections for the whole run and drives the phases in
//! order: catalog snapshot, plan, reconcile, copy, verify, report. There is
//! no connection state outside this struct; every pool is constructed here
//! and closed here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::convert::TargetCaps;
use crate::copier::Copier;
use crate::core::schema::{ForeignKeyRef, TableDescriptor};
use crate::core::traits::{SourceReader, TargetWriter};
use crate::drivers::{connect_source, connect_target};
use crate::error::Result;
use crate::plan::MigrationPlan;
use crate::reconcile::reconcile_table;
use crate::report::{MigrationReport, TableMigrationResult, TableStatus, VerifyReport};
use crate::verify::verify_counts;

/// Connectivity probe for one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideHealth {
    /// host:port/database of the probed profile.
    pub endpoint: String,

    /// Engine name.
    pub engine: String,

    /// Whether connect and a catalog read both succeeded.
    pub ok: bool,

    /// Base tables visible in the configured schema.
    pub tables: usize,

    /// Error text when the probe failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `health-check`: both sides probed independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub source: SideHealth,
    pub target: SideHealth,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.source.ok && self.target.ok
    }
}

/// Everything the run needs from the catalogs, read once up front.
struct CatalogSnapshot {
    plan: MigrationPlan,
    /// Source-side descriptors, aligned with `plan.tables`.
    tables: Vec<TableDescriptor>,
    foreign_keys: HashMap<String, Vec<ForeignKeyRef>>,
    warnings: Vec<String>,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
}

impl Orchestrator {
    /// Connect both sides and probe them. Connection failures here are
    /// fatal; nothing has been written yet.
    pub async fn new(config: Config) -> Result<Self> {
        let source = connect_source(&config.source).await?;
        let target = connect_target(&config.target).await?;
        Ok(Self {
            config,
            source,
            target,
        })
    }

    /// Build an orchestrator over existing connections.
    pub fn with_connections(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
    ) -> Self {
        Self {
            config,
            source,
            target,
        }
    }

    /// Run the full pipeline: plan, reconcile, copy, verify.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();

        info!("Phase 1: Reading catalogs");
        let CatalogSnapshot {
            plan,
            tables,
            foreign_keys,
            mut warnings,
        } = self.snapshot().await?;

        info!(
            tables = plan.len(),
            levels = plan.level_count(),
            "Phase 2: Plan ready"
        );
        plan.check_reference_order(&foreign_keys)?;

        if self.config.reconcile.enabled {
            info!("Phase 3: Reconciling target schemas");
            for table in &tables {
                let outcome =
                    reconcile_table(self.target.as_ref(), table, &self.config.reconcile).await;
                warnings.extend(outcome.warnings);
            }
        } else {
            info!("Phase 3: Reconciliation disabled; skipping");
        }

        info!("Phase 4: Copying data");
        let results = self.copy_tables(&plan, &tables, cancel.clone()).await?;

        let cancelled = results.iter().any(|r| r.status == TableStatus::Cancelled);
        let verification = if cancelled {
            warn!("run cancelled; skipping verification");
            None
        } else {
            info!("Phase 5: Verifying row counts");
            Some(
                verify_counts(
                    self.source.as_ref(),
                    self.target.as_ref(),
                    &plan,
                    &self.config.verify.key_tables,
                )
                .await,
            )
        };

        let report = MigrationReport::assemble(plan, results, warnings, verification, started_at);
        info!(
            status = %report.status,
            tables = report.tables_total,
            inserted = report.rows_inserted,
            skipped = report.rows_skipped,
            failed = report.rows_failed,
            elapsed_secs = report.duration_seconds,
            rows_per_sec = report.rows_per_second,
            "migration finished"
        );
        Ok(report)
    }

    /// Phases 1-3 only: catalog, plan, sanity pass. Used by `--dry-run`.
    pub async fn plan_only(&self) -> Result<MigrationPlan> {
        let snapshot = self.snapshot().await?;
        snapshot.plan.check_reference_order(&snapshot.foreign_keys)?;
        Ok(snapshot.plan)
    }

    /// Standalone verification pass over the planned and key tables.
    pub async fn verify_only(&self) -> Result<VerifyReport> {
        let snapshot = self.snapshot().await?;
        snapshot.plan.check_reference_order(&snapshot.foreign_keys)?;
        info!(tables = snapshot.plan.len(), "verifying row counts");
        Ok(verify_counts(
            self.source.as_ref(),
            self.target.as_ref(),
            &snapshot.plan,
            &self.config.verify.key_tables,
        )
        .await)
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    async fn snapshot(&self) -> Result<CatalogSnapshot> {
        let source_tables = self.source.list_tables().await?;
        let target_tables = self.target.list_tables().await?;
        info!(
            source = source_tables.len(),
            target = target_tables.len(),
            "catalogs read"
        );

        let plan = MigrationPlan::build(
            &self.config.migration.tables,
            &source_tables,
            &target_tables,
        );

        let mut warnings = Vec::new();
        if !plan.missing_on_source.is_empty() {
            let w = format!(
                "declared tables missing on the source: {}",
                plan.missing_on_source.join(", ")
            );
            warn!("{}", w);
            warnings.push(w);
        }
        if !plan.missing_on_target.is_empty() {
            let w = format!(
                "declared tables missing on the target: {}",
                plan.missing_on_target.join(", ")
            );
            warn!("{}", w);
            warnings.push(w);
        }
        if !plan.undeclared.is_empty() {
            info!(
                tables = %plan.undeclared.join(", "),
                "tables present on both sides but not declared; their data is not copied"
            );
        }
        if plan.is_empty() {
            let w = "no declared table exists on both sides; nothing to copy".to_string();
            warn!("{}", w);
            warnings.push(w);
        }

        let mut tables = Vec::with_capacity(plan.len());
        let mut foreign_keys = HashMap::new();
        for planned in &plan.tables {
            let columns = self.source.list_columns(&planned.name).await?;
            let primary_key: Vec<String> = columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| c.name.clone())
                .collect();
            tables.push(TableDescriptor {
                name: planned.name.clone(),
                columns,
                primary_key,
                on_source: true,
                on_target: true,
            });

            // best-effort: the sanity pass works with whatever metadata the
            // engine hands back
            match self.source.list_foreign_keys(&planned.name).await {
                Ok(fks) if !fks.is_empty() => {
                    foreign_keys.insert(planned.name.clone(), fks);
                }
                Ok(_) => {}
                Err(e) => {
                    let w = format!(
                        "foreign-key metadata unavailable for {}: {}",
                        planned.name, e
                    );
                    warn!("{}", w);
                    warnings.push(w);
                }
            }
        }

        Ok(CatalogSnapshot {
            plan,
            tables,
            foreign_keys,
            warnings,
        })
    }

    async fn copy_tables(
        &self,
        plan: &MigrationPlan,
        tables: &[TableDescriptor],
        cancel: CancellationToken,
    ) -> Result<Vec<TableMigrationResult>> {
        let caps = TargetCaps::for_engine(self.config.target.engine);
        let copier = Copier::new(
            self.source.as_ref(),
            self.target.as_ref(),
            &self.config.migration,
            caps,
            cancel.clone(),
        );

        let mut results = Vec::with_capacity(plan.len());
        let mut current_level = None;

        for (planned, table) in plan.tables.iter().zip(tables) {
            if cancel.is_cancelled() {
                warn!(table = %planned.name, "cancellation requested; stopping before this table");
                let mut result = TableMigrationResult::new(&planned.name);
                result.status = TableStatus::Cancelled;
                results.push(result);
                break;
            }

            if current_level != Some(planned.level) {
                info!(level = planned.level, "starting level");
                current_level = Some(planned.level);
            }

            // re-read so columns added during reconciliation count toward
            // the intersection
            let target_columns = self.target.list_columns(&planned.name).await?;
            let result = copier.copy_table(table, &target_columns).await;
            let stop = result.status == TableStatus::Cancelled;
            results.push(result);
            if stop {
                break;
            }
        }

        Ok(results)
    }
}

/// Probe both profiles independently: connect, list tables, close.
pub async fn health_check(config: &Config) -> HealthReport {
    let source = match connect_source(&config.source).await {
        Ok(reader) => match reader.list_tables().await {
            Ok(tables) => {
                reader.close().await;
                SideHealth {
                    endpoint: config.source.endpoint(),
                    engine: config.source.engine.to_string(),
                    ok: true,
                    tables: tables.len(),
                    error: None,
                }
            }
            Err(e) => {
                reader.close().await;
                SideHealth {
                    endpoint: config.source.endpoint(),
                    engine: config.source.engine.to_string(),
                    ok: false,
                    tables: 0,
                    error: Some(e.to_string()),
                }
            }
        },
        Err(e) => SideHealth {
            endpoint: config.source.endpoint(),
            engine: config.source.engine.to_string(),
            ok: false,
            tables: 0,
            error: Some(e.to_string()),
        },
    };

    let target = match connect_target(&config.target).await {
        Ok(writer) => match writer.list_tables().await {
            Ok(tables) => {
                writer.close().await;
                SideHealth {
                    endpoint: config.target.endpoint(),
                    engine: config.target.engine.to_string(),
                    ok: true,
                    tables: tables.len(),
                    error: None,
                }
            }
            Err(e) => {
                writer.close().await;
                SideHealth {
                    endpoint: config.target.endpoint(),
                    engine: config.target.engine.to_string(),
                    ok: false,
                    tables: 0,
                    error: Some(e.to_string()),
                }
            }
        },
        Err(e) => SideHealth {
            endpoint: config.target.endpoint(),
            engine: config.target.engine.to_string(),
            ok: false,
            tables: 0,
            error: Some(e.to_string()),
        },
    };

    HealthReport { source, target }
}
