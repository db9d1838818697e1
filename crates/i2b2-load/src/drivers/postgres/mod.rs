//! PostgreSQL driver (tokio-postgres + deadpool-postgres).

mod session;

pub use session::{column_type, PgSession, PgSessionFactory, PgStatement, PRODUCT_NAME};
