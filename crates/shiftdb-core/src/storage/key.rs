//! Order-preserving row key encoding.
//!
//! Keys encode so that byte-wise comparison of the encoded form matches
//! the logical ordering of the keys. Migration batches and merged scans
//! both rely on this: the lowest remaining source key is always the first
//! entry in the tree.

use std::fmt;

use shiftdb_proto::Value;

/// Tag byte for integer keys.
const TAG_INT: u8 = 0x01;
/// Tag byte for text keys.
const TAG_TEXT: u8 = 0x02;
/// Tag byte for blob keys.
const TAG_BLOB: u8 = 0x03;

/// Flipping the sign bit makes two's complement order match unsigned
/// byte order.
const SIGN_FLIP: u64 = 1 << 63;

/// A primary key value.
///
/// The derived ordering matches the encoded byte ordering: integers sort
/// before text, text before blobs, and values sort naturally within each
/// class.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    /// Integer key.
    Int(i64),
    /// Text key.
    Text(String),
    /// Blob key.
    Blob(Vec<u8>),
}

impl RowKey {
    /// Encode to the stored byte form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RowKey::Int(i) => {
                let mut buf = Vec::with_capacity(9);
                buf.push(TAG_INT);
                buf.extend_from_slice(&((*i as u64) ^ SIGN_FLIP).to_be_bytes());
                buf
            }
            RowKey::Text(s) => {
                let mut buf = Vec::with_capacity(1 + s.len());
                buf.push(TAG_TEXT);
                buf.extend_from_slice(s.as_bytes());
                buf
            }
            RowKey::Blob(b) => {
                let mut buf = Vec::with_capacity(1 + b.len());
                buf.push(TAG_BLOB);
                buf.extend_from_slice(b);
                buf
            }
        }
    }

    /// Decode from the stored byte form.
    ///
    /// Returns None if the bytes are not a valid key encoding.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        match tag {
            TAG_INT => {
                if rest.len() != 8 {
                    return None;
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(rest);
                Some(RowKey::Int((u64::from_be_bytes(buf) ^ SIGN_FLIP) as i64))
            }
            TAG_TEXT => std::str::from_utf8(rest)
                .ok()
                .map(|s| RowKey::Text(s.to_string())),
            TAG_BLOB => Some(RowKey::Blob(rest.to_vec())),
            _ => None,
        }
    }

    /// Build a key from a column value. Null and Real values cannot key rows.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(RowKey::Int(*i)),
            Value::Text(s) => Some(RowKey::Text(s.clone())),
            Value::Blob(b) => Some(RowKey::Blob(b.clone())),
            Value::Null | Value::Real(_) => None,
        }
    }

    /// The column value this key came from.
    pub fn to_value(&self) -> Value {
        match self {
            RowKey::Int(i) => Value::Integer(*i),
            RowKey::Text(s) => Value::Text(s.clone()),
            RowKey::Blob(b) => Value::Blob(b.clone()),
        }
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(i) => write!(f, "RowKey::Int({i})"),
            RowKey::Text(s) => write!(f, "RowKey::Text({s:?})"),
            RowKey::Blob(b) => write!(f, "RowKey::Blob(0x{})", hex::encode(b)),
        }
    }
}

impl From<i64> for RowKey {
    fn from(i: i64) -> Self {
        RowKey::Int(i)
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey::Text(s.to_string())
    }
}

impl From<String> for RowKey {
    fn from(s: String) -> Self {
        RowKey::Text(s)
    }
}

impl From<Vec<u8>> for RowKey {
    fn from(b: Vec<u8>) -> Self {
        RowKey::Blob(b)
    }
}
