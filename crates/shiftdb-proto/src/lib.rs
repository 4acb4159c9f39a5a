//! Protocol types shared between shiftdb components.
//!
//! # Modules
//!
//! - [`value`]: scalar value model for rows and keys
//! - [`statement`]: statement types accepted by the execution layer
//! - [`result`]: result types returned by executed statements
//! - [`error`]: protocol error types
//!
//! # Serialization
//!
//! All types serialize with rkyv for zero-copy access:
//!
//! ```ignore
//! use shiftdb_proto::{decode_statement, encode_statement, Select, Statement};
//!
//! let statement: Statement = Select::new("accounts").with_key(42i64).into();
//! let bytes = encode_statement(&statement)?;
//! let decoded = decode_statement(&bytes)?;
//! assert_eq!(statement, decoded);
//! ```

pub mod error;
pub mod result;
pub mod statement;
pub mod value;

pub use error::Error;
pub use result::{ResultSet, StatementOutput};
pub use statement::{Count, Delete, Insert, Select, Statement, Update};
pub use value::Value;

/// Serialize a statement for transport.
pub fn encode_statement(statement: &Statement) -> Result<Vec<u8>, Error> {
    rkyv::to_bytes::<rkyv::rancor::Error>(statement)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Deserialize a statement from transport bytes.
pub fn decode_statement(bytes: &[u8]) -> Result<Statement, Error> {
    rkyv::from_bytes::<Statement, rkyv::rancor::Error>(bytes)
        .map_err(|e| Error::Deserialization(e.to_string()))
}

/// Serialize a statement output for transport.
pub fn encode_output(output: &StatementOutput) -> Result<Vec<u8>, Error> {
    rkyv::to_bytes::<rkyv::rancor::Error>(output)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Deserialize a statement output from transport bytes.
pub fn decode_output(bytes: &[u8]) -> Result<StatementOutput, Error> {
    rkyv::from_bytes::<StatementOutput, rkyv::rancor::Error>(bytes)
        .map_err(|e| Error::Deserialization(e.to_string()))
}
