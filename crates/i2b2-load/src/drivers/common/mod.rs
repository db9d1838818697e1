//! Helpers shared by the database drivers.
//!
//! - [`tls`]: `ssl_mode` resolution and the PostgreSQL rustls connector

pub mod tls;

pub use tls::{pg_connector, SslMode};
