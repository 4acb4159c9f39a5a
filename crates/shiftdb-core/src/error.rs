//! Error types for the storage and query layers.

use thiserror::Error;

/// Core engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A stored key could not be decoded.
    #[error("invalid key encoding")]
    InvalidKey,

    /// The named table is not defined.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A table with this name is already defined.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// The table definition itself is unusable.
    #[error("invalid table definition for {table}: {reason}")]
    InvalidTable {
        /// Table name.
        table: String,
        /// What is wrong with the definition.
        reason: String,
    },

    /// A row does not fit the table schema.
    #[error("row does not match schema for table {table}: {reason}")]
    RowMismatch {
        /// Table name.
        table: String,
        /// What is wrong with the row.
        reason: String,
    },

    /// A write batch touched more tables than one commit can cover.
    #[error("write batch spans {0} tables, at most 2 commit atomically")]
    BatchTooWide(usize),

    /// The database file is keyed and no cipher key was supplied.
    #[error("database at {0} requires a cipher key")]
    CipherRequired(String),

    /// The supplied cipher key does not match the database file.
    #[error("cipher key mismatch for database at {0}")]
    CipherMismatch(String),
}
