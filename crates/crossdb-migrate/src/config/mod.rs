//! Configuration loading and validation.
//!
//! Configuration comes from a YAML file, then environment variables
//! (`CDM_SOURCE_*` / `CDM_TARGET_*`) override individual connection fields.
//! Validation runs after overrides so the effective configuration is what
//! gets checked.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use crate::error::{MigrateError, Result};

/// Commented starter configuration written by `init`.
pub const STARTER_TEMPLATE: &str = r#"# crossdb-migrate configuration
#
# Connection fields can be overridden per side with environment variables:
#   CDM_SOURCE_HOST, CDM_SOURCE_PORT, CDM_SOURCE_USER, CDM_SOURCE_PASSWORD,
#   CDM_SOURCE_DATABASE, CDM_SOURCE_ENGINE, CDM_SOURCE_SSL_MODE,
#   CDM_SOURCE_SCHEMA, and the same set under CDM_TARGET_*.
# A .env file next to the binary is loaded first.

source:
  engine: mysql            # postgres | mysql
  host: localhost
  port: 3306               # optional, defaults per engine (5432 / 3306)
  database: app_production
  user: replicator
  password: change_me
  ssl_mode: require        # disable | require | verify-ca | verify-full

target:
  engine: postgres
  host: localhost
  port: 5432
  database: app_replica
  user: migrator
  password: change_me
  ssl_mode: disable
  # schema: public         # optional, defaults to public on postgres

migration:
  batch_size: 500          # rows per write batch
  read_ahead: 4            # batches buffered between reader and writer
  conflict_policy: keep_existing   # keep_existing | overwrite
  # Dependency levels: every level is copied before the next one.
  # Referenced tables must appear in earlier levels than their referrers.
  tables:
    - [tenants, roles, plans]
    - [users, locations]
    - [patients, practitioners]
    - [appointments]
    - [invoices, payments]

reconcile:
  enabled: true
  # Constraints are only ever created from these lists, never inferred.
  indexes: []
  #  - { table: users, name: users_email_key, columns: [email], unique: true }
  foreign_keys: []
  #  - table: appointments
  #    name: appointments_patient_id_fkey
  #    columns: [patient_id]
  #    references_table: patients
  #    references_columns: [id]

verify:
  key_tables: [tenants, users, patients, appointments, invoices]
"#;

impl Config {
    /// Load configuration from a YAML file, apply environment overrides,
    /// then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// No environment overrides; used for complete in-memory configs.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Override connection fields from `CDM_SOURCE_*` / `CDM_TARGET_*`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        apply_profile_overrides(&mut self.source, "CDM_SOURCE")?;
        apply_profile_overrides(&mut self.target, "CDM_TARGET")?;
        Ok(())
    }
}

fn apply_profile_overrides(profile: &mut ConnectionProfile, prefix: &str) -> Result<()> {
    if let Some(v) = env_var(prefix, "HOST") {
        profile.host = v;
    }
    if let Some(v) = env_var(prefix, "PORT") {
        let port = v.parse::<u16>().map_err(|_| {
            MigrateError::Config(format!("{}_PORT must be a port number, got '{}'", prefix, v))
        })?;
        profile.port = Some(port);
    }
    if let Some(v) = env_var(prefix, "USER") {
        profile.user = v;
    }
    if let Some(v) = env_var(prefix, "PASSWORD") {
        profile.password = v;
    }
    if let Some(v) = env_var(prefix, "DATABASE") {
        profile.database = v;
    }
    if let Some(v) = env_var(prefix, "SCHEMA") {
        profile.schema = Some(v);
    }
    if let Some(v) = env_var(prefix, "ENGINE") {
        profile.engine = v
            .parse()
            .map_err(|e| MigrateError::Config(format!("{}_ENGINE: {}", prefix, e)))?;
    }
    if let Some(v) = env_var(prefix, "SSL_MODE") {
        profile.ssl_mode = v
            .parse()
            .map_err(|e| MigrateError::Config(format!("{}_SSL_MODE: {}", prefix, e)))?;
    }
    Ok(())
}

fn env_var(prefix: &str, field: &str) -> Option<String> {
    std::env::var(format!("{}_{}", prefix, field))
        .ok()
        .filter(|v| !v.is_empty())
}
