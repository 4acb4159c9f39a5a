//! Statement types accepted by the execution layer.
//!
//! Statements address exactly one table by name. During a migration the
//! execution layer may rewrite a statement to consult or update the
//! table's source as well; the types here stay unaware of that.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::value::Value;

/// Read rows from one table.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Select {
    /// Table to read.
    pub table: String,
    /// Exact primary key to look up. None scans the table in key order.
    pub key: Option<Value>,
    /// Maximum number of rows returned by a scan.
    pub limit: Option<usize>,
}

impl Select {
    /// Create a full-table select.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: None,
            limit: None,
        }
    }

    /// Restrict the select to a single primary key.
    pub fn with_key(mut self, key: impl Into<Value>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Cap the number of rows a scan returns.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Insert (or replace) whole rows into one table.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Insert {
    /// Table to write.
    pub table: String,
    /// Rows to insert, each in schema column order.
    pub rows: Vec<Vec<Value>>,
}

impl Insert {
    /// Create an empty insert.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: vec![],
        }
    }

    /// Add a row.
    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }
}

/// Assign new values to columns of the row with the given key.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Update {
    /// Table to write.
    pub table: String,
    /// Primary key of the row to update.
    pub key: Value,
    /// Column name and new value pairs, applied in order.
    pub assignments: Vec<(String, Value)>,
}

impl Update {
    /// Create an update with no assignments.
    pub fn new(table: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            assignments: vec![],
        }
    }

    /// Add a column assignment.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }
}

/// Delete the row with the given key.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Delete {
    /// Table to write.
    pub table: String,
    /// Primary key of the row to delete.
    pub key: Value,
}

impl Delete {
    /// Create a delete.
    pub fn new(table: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

/// Count the rows in one table.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Count {
    /// Table to count.
    pub table: String,
}

impl Count {
    /// Create a count.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

/// One statement against one table.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum Statement {
    /// Read rows.
    Select(Select),
    /// Insert or replace rows.
    Insert(Insert),
    /// Update one row.
    Update(Update),
    /// Delete one row.
    Delete(Delete),
    /// Count rows.
    Count(Count),
}

impl Statement {
    /// Table this statement addresses.
    pub fn table(&self) -> &str {
        match self {
            Statement::Select(s) => &s.table,
            Statement::Insert(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
            Statement::Count(s) => &s.table,
        }
    }

    /// Whether the statement only reads.
    pub fn is_read(&self) -> bool {
        matches!(self, Statement::Select(_) | Statement::Count(_))
    }
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
    }
}

impl From<Insert> for Statement {
    fn from(s: Insert) -> Self {
        Statement::Insert(s)
    }
}

impl From<Update> for Statement {
    fn from(s: Update) -> Self {
        Statement::Update(s)
    }
}

impl From<Delete> for Statement {
    fn from(s: Delete) -> Self {
        Statement::Delete(s)
    }
}

impl From<Count> for Statement {
    fn from(s: Count) -> Self {
        Statement::Count(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_builder() {
        let select = Select::new("accounts").with_key(7i64).with_limit(10);
        assert_eq!(select.table, "accounts");
        assert_eq!(select.key, Some(Value::Integer(7)));
        assert_eq!(select.limit, Some(10));
    }

    #[test]
    fn test_update_builder() {
        let update = Update::new("accounts", 3i64)
            .set("name", "alice")
            .set("balance", 100i64);
        assert_eq!(update.assignments.len(), 2);
        assert_eq!(update.assignments[0].0, "name");
    }

    #[test]
    fn test_statement_table_and_kind() {
        let read: Statement = Select::new("accounts").into();
        let write: Statement = Delete::new("accounts", 1i64).into();
        assert_eq!(read.table(), "accounts");
        assert_eq!(write.table(), "accounts");
        assert!(read.is_read());
        assert!(!write.is_read());
        assert!(Statement::from(Count::new("accounts")).is_read());
    }
}
