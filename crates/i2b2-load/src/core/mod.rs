//! Core abstractions shared by the load engine and the drivers.
//!
//! - [`value`]: column types, SQL values and the row batch
//! - [`traits`]: session, prepared statement and template source traits

pub mod traits;
pub mod value;

pub use traits::{PreparedStatement, Session, SessionFactory, TemplateSource};
pub use value::{Batch, CoercedRow, ColumnType, ColumnTypes, SqlValue, DEFAULT_BATCH_SIZE};
