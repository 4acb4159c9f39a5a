//! Row storage over sled.
//!
//! Each database file holds a meta tree (table definitions, cipher
//! verifier) and one tree per table, keyed by order-preserving encoded
//! primary keys.

mod config;
mod database;
mod row;
mod transaction;

pub mod key;

pub use config::{CipherKey, DatabaseConfig};
pub use database::Database;
pub use key::RowKey;
pub use row::Row;
pub use transaction::{BatchOp, WriteBatch};
