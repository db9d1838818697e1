//! Database driver implementations.
//!
//! Each driver provides a [`SessionFactory`](crate::core::SessionFactory)
//! backed by a connection pool:
//!
//! - [`postgres`]: tokio-postgres over deadpool-postgres
//! - [`mssql`]: tiberius over bb8
//! - [`common`]: shared utilities (TLS)
//!
//! Oracle is recognized as a dialect (templates, catalog queries) but has no
//! driver here. Loading into Oracle needs an external `SessionFactory`
//! passed to [`BatchLoader`](crate::loader::BatchLoader) or
//! [`SchemaProvisioner`](crate::provision::SchemaProvisioner) directly.

pub mod common;
pub mod mssql;
pub mod postgres;

pub use common::{pg_connector, SslMode};
pub use mssql::{MssqlSession, MssqlSessionFactory};
pub use postgres::{PgSession, PgSessionFactory};
