//! PostgreSQL database driver.
//!
//! - [`PostgresDialect`]: SQL building for pagination, upserts and DDL
//! - [`PostgresReader`]: catalog snapshots and keyset row streaming
//! - [`PostgresWriter`]: reconciliation DDL and idempotent row writes
//!
//! Both sides share a deadpool-postgres pool with TCP keepalives, so long
//! streaming reads survive idle firewalls.

mod catalog;
mod dialect;
mod reader;
mod writer;

pub use dialect::PostgresDialect;
pub use reader::PostgresReader;
pub use writer::PostgresWriter;

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::Config as PgConfig;
use tracing::warn;

use crate::config::ConnectionProfile;
use crate::drivers::common::TlsBuilder;
use crate::drivers::POOL_SIZE;
use crate::error::{MigrateError, Result};

/// Build a deadpool-postgres pool from a connection profile.
fn build_pool(profile: &ConnectionProfile, context: &str) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&profile.host);
    pg_config.port(profile.effective_port());
    pg_config.dbname(&profile.database);
    pg_config.user(&profile.user);
    pg_config.password(&profile.password);
    pg_config.connect_timeout(Duration::from_secs(30));
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let pool = match TlsBuilder::new(profile.ssl_mode).build()? {
        None => {
            warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
            let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
            Pool::builder(mgr)
                .max_size(POOL_SIZE)
                .build()
                .map_err(|e| MigrateError::pool(e, context.to_string()))?
        }
        Some(tls) => {
            let mgr = Manager::from_config(pg_config, tls, mgr_config);
            Pool::builder(mgr)
                .max_size(POOL_SIZE)
                .build()
                .map_err(|e| MigrateError::pool(e, context.to_string()))?
        }
    };

    Ok(pool)
}
