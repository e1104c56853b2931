//! Utilities shared across database drivers.

pub mod tls;

pub use tls::{mysql_ssl_opts, TlsBuilder};
