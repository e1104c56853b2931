//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }

    // Cannot migrate a database onto itself
    if config.source.host == config.target.host
        && config.source.effective_port() == config.target.effective_port()
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    // Copy settings
    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.migration.read_ahead == 0 {
        return Err(MigrateError::Config(
            "migration.read_ahead must be at least 1".into(),
        ));
    }
    if config.migration.tables.iter().flatten().next().is_none() {
        return Err(MigrateError::Config(
            "migration.tables must declare at least one table".into(),
        ));
    }

    // The declared order is authoritative, so a name appearing twice is
    // ambiguous and rejected outright.
    let mut seen = HashSet::new();
    for table in config.migration.tables.iter().flatten() {
        if !seen.insert(table.as_str()) {
            return Err(MigrateError::Config(format!(
                "table '{}' is declared more than once in migration.tables",
                table
            )));
        }
    }

    for idx in &config.reconcile.indexes {
        if idx.columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "reconcile index '{}' has no columns",
                idx.name
            )));
        }
    }
    for fk in &config.reconcile.foreign_keys {
        if fk.columns.is_empty() || fk.references_columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "reconcile foreign key '{}' has no columns",
                fk.name
            )));
        }
        if fk.columns.len() != fk.references_columns.len() {
            return Err(MigrateError::Config(format!(
                "reconcile foreign key '{}' has mismatched column counts",
                fk.name
            )));
        }
    }

    Ok(())
}
