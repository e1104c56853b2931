//! Error types for the migration library.

use thiserror::Error;

/// Process exit code for configuration errors.
pub const EXIT_CONFIG: u8 = 1;
/// Process exit code when verification found mismatches or tables failed.
pub const EXIT_MISMATCH: u8 = 2;
/// Process exit code for catalog/connection failures.
pub const EXIT_CONNECT: u8 = 3;
/// Process exit code for other runtime failures.
pub const EXIT_RUNTIME: u8 = 4;
/// Process exit code for file I/O failures.
pub const EXIT_IO: u8 = 7;
/// Process exit code when the run was cancelled by a signal.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
///
/// Row-level write conflicts (duplicate key, foreign-key violation) are not
/// errors: they come back from the writer as typed
/// [`BatchOutcome`](crate::core::traits::BatchOutcome) counts.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad declared order)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog metadata could not be read. Fatal to the whole run.
    #[error("Catalog unavailable on {side}: {message}")]
    CatalogUnavailable { side: String, message: String },

    /// Connection failed mid-copy. Fatal to the affected table only.
    #[error("Connection lost while copying {table}: {message}")]
    ConnectionLost { table: String, message: String },

    /// Schema reconciliation failed; the table downgrades to a best-effort
    /// column-intersection copy.
    #[error("Schema reconciliation failed for {table}: {message}")]
    SchemaReconciliation { table: String, message: String },

    /// A single row could not be converted or bound for the target.
    #[error("Row conversion failed in {table}: {message}")]
    RowConversion { table: String, message: String },

    /// Verification found row-count mismatches.
    #[error("Verification found {0} mismatched table(s)")]
    VerificationMismatch(usize),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Copy failed for a specific table
    #[error("Copy failed for table {table}: {message}")]
    Copy { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a CatalogUnavailable error for one side of the migration
    pub fn catalog(side: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::CatalogUnavailable {
            side: side.into(),
            message: message.to_string(),
        }
    }

    /// Create a ConnectionLost error for a table
    pub fn connection_lost(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::ConnectionLost {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a SchemaReconciliation error
    pub fn reconcile(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::SchemaReconciliation {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Copy error
    pub fn copy(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::Copy {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Map the error to a process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG,
            MigrateError::VerificationMismatch(_) => EXIT_MISMATCH,
            MigrateError::CatalogUnavailable { .. } | MigrateError::Pool { .. } => EXIT_CONNECT,
            MigrateError::Io(_) => EXIT_IO,
            MigrateError::Cancelled => EXIT_CANCELLED,
            _ => EXIT_RUNTIME,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("bad".into()).exit_code(), EXIT_CONFIG);
        assert_eq!(
            MigrateError::VerificationMismatch(3).exit_code(),
            EXIT_MISMATCH
        );
        assert_eq!(
            MigrateError::catalog("source", "refused").exit_code(),
            EXIT_CONNECT
        );
        assert_eq!(
            MigrateError::Io(std::io::Error::other("boom")).exit_code(),
            EXIT_IO
        );
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
        assert_eq!(
            MigrateError::copy("users", "writer gone").exit_code(),
            EXIT_RUNTIME
        );
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err = MigrateError::Io(io);
        let detail = err.format_detailed();
        assert!(detail.starts_with("Error: IO error"));
        assert!(detail.contains("Caused by"));
        assert!(detail.contains("missing file"));
    }
}
