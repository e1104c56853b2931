//! Migration planning from declared dependency levels.
//!
//! The declared order in the configuration is authoritative: tables in
//! earlier levels are copied before tables in later levels, and order within
//! a level is preserved. The planner filters the declaration against the
//! catalogs of both sides and reports every discrepancy without failing.
//! Foreign-key metadata, when the source catalog provides it, feeds a cheap
//! ordering sanity pass; it is never used to reorder anything.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::schema::ForeignKeyRef;
use crate::error::{MigrateError, Result};

/// A table scheduled for copying, with the declared level it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTable {
    /// Table name.
    pub name: String,

    /// Zero-based index of the declared level.
    pub level: usize,
}

/// The ordered copy plan plus the presence report.
///
/// Built purely from the declared levels and the two table sets; no I/O
/// happens here. Tables land in `tables` only when they exist on both sides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Tables to copy, in declared order.
    pub tables: Vec<PlannedTable>,

    /// Declared tables absent from the source. A table absent from both
    /// sides is reported here only.
    pub missing_on_source: Vec<String>,

    /// Declared tables present on the source but absent from the target.
    pub missing_on_target: Vec<String>,

    /// Tables present on both sides but not declared. Their data is not
    /// copied.
    pub undeclared: Vec<String>,
}

impl MigrationPlan {
    /// Build the plan from the declared levels and the table sets read from
    /// each side's catalog. A name declared twice keeps its first position.
    pub fn build(
        levels: &[Vec<String>],
        source_tables: &[String],
        target_tables: &[String],
    ) -> MigrationPlan {
        let on_source: HashSet<&str> = source_tables.iter().map(|s| s.as_str()).collect();
        let on_target: HashSet<&str> = target_tables.iter().map(|s| s.as_str()).collect();

        let mut plan = MigrationPlan::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for (level, names) in levels.iter().enumerate() {
            for name in names {
                if !seen.insert(name.as_str()) {
                    continue;
                }
                match (on_source.contains(name.as_str()), on_target.contains(name.as_str())) {
                    (true, true) => plan.tables.push(PlannedTable {
                        name: name.clone(),
                        level,
                    }),
                    (true, false) => plan.missing_on_target.push(name.clone()),
                    (false, _) => plan.missing_on_source.push(name.clone()),
                }
            }
        }

        for name in source_tables {
            if on_target.contains(name.as_str()) && !seen.contains(name.as_str()) {
                plan.undeclared.push(name.clone());
            }
        }

        plan
    }

    /// Names of the planned tables, in copy order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Position of a table in the copy order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }

    /// Number of declared levels that contributed at least one planned table.
    pub fn level_count(&self) -> usize {
        self.tables
            .iter()
            .map(|t| t.level + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Verify that no planned table references a planned table copied later.
    ///
    /// `fks` maps each planned table to its foreign keys as read from the
    /// source catalog. The pass is best-effort: self-references, references
    /// to unplanned tables and tables with no metadata are all ignored. A
    /// forward reference is a configuration error since rows would hit
    /// foreign-key violations instead of being inserted.
    pub fn check_reference_order(
        &self,
        fks: &HashMap<String, Vec<ForeignKeyRef>>,
    ) -> Result<()> {
        let positions: HashMap<&str, usize> = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();

        for table in &self.tables {
            let Some(refs) = fks.get(&table.name) else {
                continue;
            };
            let from = positions[table.name.as_str()];
            for fk in refs {
                if fk.referenced_table == table.name {
                    continue;
                }
                if let Some(&to) = positions.get(fk.referenced_table.as_str()) {
                    if to > from {
                        return Err(MigrateError::Config(format!(
                            "declared order copies '{}' before '{}', which it references \
                             via {}; move '{}' to an earlier level",
                            table.name, fk.referenced_table, fk.name, fk.referenced_table
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
