//! Result types returned by executed statements.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::value::Value;

/// Rows produced by a select.
#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct ResultSet {
    /// Column names in schema order.
    pub columns: Vec<String>,
    /// Row values, one inner vector per row, ordered by primary key.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Create a result set.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column across all rows.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(idx)).collect())
    }
}

/// Output of one executed statement.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum StatementOutput {
    /// Rows from a select.
    Rows(ResultSet),
    /// Number of rows written or removed.
    Affected(u64),
    /// Number of rows counted.
    Count(u64),
}

impl StatementOutput {
    /// Get the result set if this is Rows.
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            StatementOutput::Rows(set) => Some(set),
            _ => None,
        }
    }

    /// Get the affected row count if this is Affected.
    pub fn affected(&self) -> Option<u64> {
        match self {
            StatementOutput::Affected(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the count if this is Count.
    pub fn count(&self) -> Option<u64> {
        match self {
            StatementOutput::Count(n) => Some(*n),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_set_column_lookup() {
        let set = ResultSet::new(
            vec!["id".to_string(), "name".to_string()],
            vec![
                vec![Value::Integer(1), Value::Text("a".to_string())],
                vec![Value::Integer(2), Value::Text("b".to_string())],
            ],
        );
        assert_eq!(set.len(), 2);
        let names = set.column("name").unwrap();
        assert_eq!(names, vec![&Value::Text("a".to_string()), &Value::Text("b".to_string())]);
        assert!(set.column("missing").is_none());
    }

    #[test]
    fn test_output_accessors() {
        let rows = StatementOutput::Rows(ResultSet::default());
        assert!(rows.rows().is_some());
        assert_eq!(rows.affected(), None);
        assert_eq!(StatementOutput::Affected(3).affected(), Some(3));
        assert_eq!(StatementOutput::Count(10).count(), Some(10));
    }
}
