//! Table and column definitions.

use rkyv::{Archive, Deserialize, Serialize};

use shiftdb_proto::Value;

use crate::error::Error;
use crate::storage::{Row, RowKey};

/// Storage class a column accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point. Integer values widen on read.
    Real,
    /// UTF-8 string.
    Text,
    /// Binary data.
    Blob,
}

impl ColumnType {
    /// Whether a value belongs to this storage class.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ColumnType::Integer => matches!(value, Value::Integer(_)),
            ColumnType::Real => matches!(value, Value::Real(_) | Value::Integer(_)),
            ColumnType::Text => matches!(value, Value::Text(_)),
            ColumnType::Blob => matches!(value, Value::Blob(_)),
        }
    }

    /// Whether values of this class can serve as primary keys.
    pub fn is_keyable(&self) -> bool {
        !matches!(self, ColumnType::Real)
    }
}

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Storage class the column accepts.
    pub column_type: ColumnType,
    /// Whether null values are allowed.
    pub nullable: bool,
}

impl ColumnDef {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Create a column that rejects null values.
    pub fn not_null(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }
}

/// A table definition: named columns plus the primary key column.
///
/// Rows are stored as positional value vectors in column order, keyed by
/// the encoded value of the key column.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Name of the primary key column.
    pub key_column: String,
    /// Column definitions in storage order.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Create a table definition with no columns yet.
    pub fn new(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: key_column.into(),
            columns: vec![],
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Look up a column by name, with its position.
    pub fn column(&self, name: &str) -> Option<(usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.name == name)
    }

    /// Position of the primary key column.
    pub fn key_index(&self) -> Option<usize> {
        self.column(&self.key_column).map(|(idx, _)| idx)
    }

    /// Check that the definition itself is usable.
    pub fn check(&self) -> Result<(), Error> {
        let invalid = |reason: String| Error::InvalidTable {
            table: self.name.clone(),
            reason,
        };

        if self.columns.is_empty() {
            return Err(invalid("no columns defined".to_string()));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if self.columns[..idx].iter().any(|c| c.name == column.name) {
                return Err(invalid(format!("duplicate column {}", column.name)));
            }
        }
        match self.column(&self.key_column) {
            None => Err(invalid(format!("key column {} not defined", self.key_column))),
            Some((_, column)) if column.nullable => {
                Err(invalid(format!("key column {} must be not null", column.name)))
            }
            Some((_, column)) if !column.column_type.is_keyable() => Err(invalid(format!(
                "key column {} has an unkeyable type",
                column.name
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Check that a row fits this schema.
    pub fn validate_row(&self, row: &Row) -> Result<(), Error> {
        let mismatch = |reason: String| Error::RowMismatch {
            table: self.name.clone(),
            reason,
        };

        if row.values.len() != self.columns.len() {
            return Err(mismatch(format!(
                "expected {} values, got {}",
                self.columns.len(),
                row.values.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(&row.values) {
            if value.is_null() {
                if !column.nullable {
                    return Err(mismatch(format!("column {} is not nullable", column.name)));
                }
                continue;
            }
            if !column.column_type.matches(value) {
                return Err(mismatch(format!(
                    "column {} rejects {} values",
                    column.name,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Extract the primary key of a row.
    pub fn primary_key_of(&self, row: &Row) -> Result<RowKey, Error> {
        let idx = self.key_index().ok_or_else(|| Error::InvalidTable {
            table: self.name.clone(),
            reason: format!("key column {} not defined", self.key_column),
        })?;
        let value = row.values.get(idx).ok_or_else(|| Error::RowMismatch {
            table: self.name.clone(),
            reason: "row is shorter than the schema".to_string(),
        })?;
        RowKey::from_value(value).ok_or_else(|| Error::RowMismatch {
            table: self.name.clone(),
            reason: format!("{} value cannot be a primary key", value.type_name()),
        })
    }

    /// Column names in storage order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Serialize for storage in the meta tree.
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from meta tree bytes.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
