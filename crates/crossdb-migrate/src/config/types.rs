//! Configuration type definitions.

use serde::{Deserialize, Serialize};

use crate::core::schema::{ForeignKeyRef, IndexSpec};
use crate::core::traits::ConflictPolicy;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// PostgreSQL-flavored engine.
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    /// MySQL-flavored engine.
    #[serde(alias = "mariadb")]
    Mysql,
}

impl EngineKind {
    /// Default TCP port for the engine.
    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::Postgres => 5432,
            EngineKind::Mysql => 3306,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::Mysql => "mysql",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(EngineKind::Postgres),
            "mysql" | "mariadb" => Ok(EngineKind::Mysql),
            other => Err(format!(
                "unknown engine '{}' (expected 'postgres' or 'mysql')",
                other
            )),
        }
    }
}

/// TLS behavior for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Plain TCP.
    Disable,
    /// TLS without certificate verification.
    #[default]
    Require,
    /// TLS, verify the server certificate against the system roots.
    VerifyCa,
    /// TLS, verify certificate and hostname.
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(format!(
                "unknown ssl_mode '{}' (expected disable, require, verify-ca or verify-full)",
                other
            )),
        }
    }
}

/// Connection parameters for one side of the migration.
///
/// The same shape serves source and target; `engine` selects the driver.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Database engine.
    pub engine: EngineKind,

    /// Database host.
    pub host: String,

    /// Database port. Defaults to the engine's standard port when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Schema to read/write. Defaults to "public" on Postgres and to the
    /// database name on MySQL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// TLS mode (default: "require").
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl ConnectionProfile {
    /// Port with the engine default applied.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }

    /// Schema with the engine default applied.
    pub fn effective_schema(&self) -> String {
        match &self.schema {
            Some(s) => s.clone(),
            None => match self.engine {
                EngineKind::Postgres => "public".to_string(),
                EngineKind::Mysql => self.database.clone(),
            },
        }
    }

    /// Host:port/database label for logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.effective_port(), self.database)
    }
}

// Passwords must never reach logs, so Debug is written out by hand.
impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database connection.
    pub source: ConnectionProfile,

    /// Target database connection.
    pub target: ConnectionProfile,

    /// Copy behavior.
    #[serde(default)]
    pub migration: MigrationSettings,

    /// Schema reconciliation behavior.
    #[serde(default)]
    pub reconcile: ReconcileSettings,

    /// Verification behavior.
    #[serde(default)]
    pub verify: VerifySettings,
}

/// Copy behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Rows per write batch (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches buffered between reader and writer (default: 4).
    #[serde(default = "default_read_ahead")]
    pub read_ahead: usize,

    /// What to do when a row already exists on the target
    /// (default: keep_existing).
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Declared dependency levels: tables in earlier levels are copied
    /// before tables in later levels. Order within a level is preserved.
    #[serde(default)]
    pub tables: Vec<Vec<String>>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            read_ahead: default_read_ahead(),
            conflict_policy: ConflictPolicy::default(),
            tables: Vec::new(),
        }
    }
}

impl MigrationSettings {
    /// Declared tables flattened in plan order.
    pub fn declared_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .flatten()
            .map(|s| s.as_str())
            .collect()
    }
}

/// Schema reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Whether to reconcile target schemas before copying (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Foreign keys to ensure on the target. The reconciler never invents
    /// constraints; only entries listed here are created.
    #[serde(default)]
    pub foreign_keys: Vec<DeclaredForeignKey>,

    /// Indexes to ensure on the target.
    #[serde(default)]
    pub indexes: Vec<DeclaredIndex>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }
}

/// An operator-declared foreign key to ensure during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredForeignKey {
    /// Referencing table.
    pub table: String,
    /// Constraint name.
    pub name: String,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
}

/// An operator-declared index to ensure during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredIndex {
    /// Table the index belongs to.
    pub table: String,
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness (default: false).
    #[serde(default)]
    pub unique: bool,
}

impl From<&DeclaredForeignKey> for ForeignKeyRef {
    fn from(fk: &DeclaredForeignKey) -> Self {
        ForeignKeyRef {
            name: fk.name.clone(),
            columns: fk.columns.clone(),
            referenced_table: fk.references_table.clone(),
            referenced_columns: fk.references_columns.clone(),
        }
    }
}

impl From<&DeclaredIndex> for IndexSpec {
    fn from(idx: &DeclaredIndex) -> Self {
        IndexSpec {
            name: idx.name.clone(),
            columns: idx.columns.clone(),
            unique: idx.unique,
        }
    }
}

/// Verification configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifySettings {
    /// Tables re-checked after every run even when not part of the plan
    /// (tenant/user/billing tables and the like).
    #[serde(default)]
    pub key_tables: Vec<String>,
}

// Default value functions for serde
fn default_batch_size() -> usize {
    500
}

fn default_read_ahead() -> usize {
    4
}

fn default_true() -> bool {
    true
}
