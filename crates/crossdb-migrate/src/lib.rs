//! # crossdb-migrate
//!
//! Cross-engine table replication between PostgreSQL and MySQL.
//!
//! The library connects to a source and a target database, plans the copy
//! from declared dependency levels, reconciles the target schema against
//! the source, copies rows with idempotent upserts, and verifies row
//! counts afterwards:
//!
//! - **Declared-order planning** from levelled table lists, with a sanity
//!   pass over foreign keys before any data moves
//! - **Schema reconciliation** that adds missing columns and creates
//!   declared indexes and foreign keys on the target
//! - **Keyset-paginated reads** with bounded read-ahead, falling back to
//!   offset pagination when a table has no single sortable key
//! - **Idempotent writes** that keep existing rows by default
//! - **Row-count verification** over planned and key tables
//!
//! ## Example
//!
//! ```rust,no_run
//! use crossdb_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> crossdb_migrate::Result<()> {
//!     let config = Config::load("migrate.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Copied {} rows", report.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod convert;
pub mod copier;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod reconcile;
pub mod report;
pub mod verify;

#[cfg(test)]
mod testutil;

// Re-exports for convenient access
pub use crate::core::traits::{ConflictPolicy, SourceReader, TargetWriter};
pub use config::{Config, ConnectionProfile, EngineKind};
pub use error::{MigrateError, Result};
pub use orchestrator::{health_check, HealthReport, Orchestrator};
pub use plan::MigrationPlan;
pub use report::{MigrationReport, TableStatus, VerifyReport};
