//! Microsoft SQL Server driver (tiberius + bb8).

mod session;

pub use session::{
    column_type, MssqlSession, MssqlSessionFactory, MssqlStatement, TiberiusConnectionManager,
    PRODUCT_NAME,
};
