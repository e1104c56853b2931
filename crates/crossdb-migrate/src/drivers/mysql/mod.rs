//! MySQL/MariaDB database driver.
//!
//! - [`MysqlDialect`]: SQL building for pagination, upserts and DDL
//! - [`MysqlReader`]: catalog snapshots and keyset row streaming
//! - [`MysqlWriter`]: reconciliation DDL and idempotent row writes
//!
//! Compatible with MySQL 5.7+, 8.0+ and MariaDB 10.2+.

mod catalog;
mod dialect;
mod reader;
mod writer;

pub use dialect::MysqlDialect;
pub use reader::MysqlReader;
pub use writer::MysqlWriter;

use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};

use crate::config::ConnectionProfile;
use crate::drivers::common::mysql_ssl_opts;
use crate::drivers::POOL_SIZE;
use crate::error::{MigrateError, Result};

/// Build a mysql_async pool from a connection profile.
///
/// The session is pinned to `utf8mb4` so multi-byte text survives the copy
/// regardless of server defaults.
fn build_pool(profile: &ConnectionProfile) -> Result<Pool> {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(&profile.host)
        .tcp_port(profile.effective_port())
        .db_name(Some(&profile.database))
        .user(Some(&profile.user))
        .pass(Some(&profile.password))
        .init(vec!["SET NAMES utf8mb4"]);

    if let Some(ssl) = mysql_ssl_opts(profile.ssl_mode) {
        builder = builder.ssl_opts(ssl);
    }

    let constraints = PoolConstraints::new(1, POOL_SIZE)
        .ok_or_else(|| MigrateError::Config(format!("invalid MySQL pool size {}", POOL_SIZE)))?;
    let pool_opts = PoolOpts::new().with_constraints(constraints);

    let opts: Opts = builder.pool_opts(pool_opts).into();
    Ok(Pool::new(opts))
}
