//! Stored row representation.

use rkyv::{Archive, Deserialize, Serialize};

use shiftdb_proto::Value;

use crate::error::Error;

/// One stored row: column values in schema order.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Row {
    /// Column values in the table's column order.
    pub values: Vec<Value>,
}

impl Row {
    /// Create a row from values.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Value at a column position.
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let row = Row::new(vec![
            Value::Integer(1),
            Value::Text("alice".to_string()),
            Value::Null,
            Value::Blob(vec![9, 8, 7]),
        ]);
        let bytes = row.to_bytes().unwrap();
        assert_eq!(Row::from_bytes(&bytes).unwrap(), row);
    }

    #[test]
    fn test_value_access() {
        let row = Row::new(vec![Value::Integer(1), Value::Text("x".to_string())]);
        assert_eq!(row.value(0), Some(&Value::Integer(1)));
        assert_eq!(row.value(2), None);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(Row::from_bytes(&[1, 2, 3]).is_err());
    }
}
