//! Database driver implementations.
//!
//! Each engine module implements the core traits:
//!
//! - [`postgres`]: PostgreSQL reader and writer over deadpool/tokio-postgres
//! - [`mysql`]: MySQL/MariaDB reader and writer over mysql_async
//! - [`common`]: shared TLS setup
//!
//! The [`connect_source`] and [`connect_target`] factories pick the driver
//! from the profile's engine and hand back trait objects, which is the only
//! view the planner, reconciler, copier and verifier ever get.

pub mod common;
pub mod mysql;
pub mod postgres;

pub use common::TlsBuilder;
pub use mysql::{MysqlDialect, MysqlReader, MysqlWriter};
pub use postgres::{PostgresDialect, PostgresReader, PostgresWriter};

use std::sync::Arc;

use crate::config::{ConnectionProfile, EngineKind};
use crate::core::traits::{SourceReader, TargetWriter};
use crate::error::Result;

/// Connections per pool. One streaming read or write per table plus catalog
/// and count queries never need more than a handful.
pub(crate) const POOL_SIZE: usize = 4;

/// Connect to the source database and probe it.
pub async fn connect_source(profile: &ConnectionProfile) -> Result<Arc<dyn SourceReader>> {
    match profile.engine {
        EngineKind::Postgres => Ok(Arc::new(PostgresReader::connect(profile).await?)),
        EngineKind::Mysql => Ok(Arc::new(MysqlReader::connect(profile).await?)),
    }
}

/// Connect to the target database and probe it.
pub async fn connect_target(profile: &ConnectionProfile) -> Result<Arc<dyn TargetWriter>> {
    match profile.engine {
        EngineKind::Postgres => Ok(Arc::new(PostgresWriter::connect(profile).await?)),
        EngineKind::Mysql => Ok(Arc::new(MysqlWriter::connect(profile).await?)),
    }
}
