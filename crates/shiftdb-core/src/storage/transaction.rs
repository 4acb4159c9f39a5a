//! Atomic multi-table write batches.
//!
//! A batch queues puts and deletes and commits them in one sled
//! transaction. Commits may span at most two tables of the same database,
//! which is exactly what a migration step needs: inserts into the
//! destination and deletes from the source.

use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Transactional, Tree};

use super::database::Database;
use super::key::RowKey;
use super::row::Row;
use crate::error::Error;

/// A queued write operation.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or replace a row.
    Put {
        /// Target table.
        table: String,
        /// Row to store.
        row: Row,
    },
    /// Delete a row by key.
    Delete {
        /// Target table.
        table: String,
        /// Key to remove.
        key: RowKey,
    },
}

/// A pre-encoded operation bound to its tree.
struct EncodedOp {
    tree_index: usize,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

/// Queued writes that commit atomically.
pub struct WriteBatch<'a> {
    database: &'a Database,
    ops: Vec<BatchOp>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(database: &'a Database) -> Self {
        Self {
            database,
            ops: vec![],
        }
    }

    /// Queue an insert-or-replace.
    pub fn put(&mut self, table: impl Into<String>, row: Row) -> &mut Self {
        self.ops.push(BatchOp::Put {
            table: table.into(),
            row,
        });
        self
    }

    /// Queue a delete.
    pub fn delete(&mut self, table: impl Into<String>, key: RowKey) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            table: table.into(),
            key,
        });
        self
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Commit all queued operations atomically.
    ///
    /// Rows are validated and encoded before the transaction starts, so a
    /// bad row aborts the whole batch without touching storage.
    pub fn commit(self) -> Result<(), Error> {
        if self.ops.is_empty() {
            return Ok(());
        }

        let mut tables: Vec<String> = vec![];
        let mut encoded: Vec<EncodedOp> = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            let (table, key, value) = match op {
                BatchOp::Put { table, row } => {
                    let def = self.database.schemas().require(table)?;
                    def.validate_row(row)?;
                    let key = def.primary_key_of(row)?;
                    (table, key.encode(), Some(row.to_bytes()?))
                }
                BatchOp::Delete { table, key } => (table, key.encode(), None),
            };
            let tree_index = match tables.iter().position(|t| t == table) {
                Some(idx) => idx,
                None => {
                    tables.push(table.clone());
                    tables.len() - 1
                }
            };
            encoded.push(EncodedOp {
                tree_index,
                key,
                value,
            });
        }

        let trees: Vec<Tree> = tables
            .iter()
            .map(|table| self.database.table_tree(table))
            .collect::<Result<_, _>>()?;

        match trees.as_slice() {
            [single] => Self::finish(single.transaction(|tx| {
                for op in &encoded {
                    Self::apply(tx, op)?;
                }
                Ok(())
            })),
            [first, second] => Self::finish((first, second).transaction(
                |(first_tx, second_tx)| {
                    for op in &encoded {
                        let tx = if op.tree_index == 0 { first_tx } else { second_tx };
                        Self::apply(tx, op)?;
                    }
                    Ok(())
                },
            )),
            wider => Err(Error::BatchTooWide(wider.len())),
        }
    }

    /// Discard all queued operations.
    pub fn rollback(self) {}

    fn apply(
        tx: &TransactionalTree,
        op: &EncodedOp,
    ) -> Result<(), ConflictableTransactionError<Error>> {
        match &op.value {
            Some(bytes) => {
                tx.insert(op.key.clone(), bytes.clone())?;
            }
            None => {
                tx.remove(op.key.clone())?;
            }
        }
        Ok(())
    }

    fn finish(result: Result<(), TransactionError<Error>>) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType, TableDef};
    use crate::storage::DatabaseConfig;
    use shiftdb_proto::Value;

    fn test_db() -> Database {
        let db = Database::open(DatabaseConfig::temporary()).unwrap();
        for name in ["a", "b", "c"] {
            db.create_table(
                TableDef::new(name, "id")
                    .with_column(ColumnDef::not_null("id", ColumnType::Integer))
                    .with_column(ColumnDef::new("val", ColumnType::Text)),
            )
            .unwrap();
        }
        db
    }

    fn row(id: i64, val: &str) -> Row {
        Row::new(vec![Value::Integer(id), Value::Text(val.to_string())])
    }

    #[test]
    fn test_empty_batch_commits() {
        let db = test_db();
        let batch = db.write_batch();
        assert!(batch.is_empty());
        assert!(batch.commit().is_ok());
    }

    #[test]
    fn test_single_table_commit() {
        let db = test_db();
        let mut batch = db.write_batch();
        batch.put("a", row(1, "x")).put("a", row(2, "y"));
        batch.commit().unwrap();
        assert_eq!(db.count("a").unwrap(), 2);
    }

    #[test]
    fn test_two_table_move_commits_together() {
        let db = test_db();
        db.put("a", row(1, "x")).unwrap();

        let mut batch = db.write_batch();
        batch.put("b", row(1, "x"));
        batch.delete("a", RowKey::Int(1));
        batch.commit().unwrap();

        assert_eq!(db.count("a").unwrap(), 0);
        assert_eq!(db.get("b", &RowKey::Int(1)).unwrap(), Some(row(1, "x")));
    }

    #[test]
    fn test_three_tables_rejected() {
        let db = test_db();
        let mut batch = db.write_batch();
        batch.put("a", row(1, "x"));
        batch.put("b", row(1, "x"));
        batch.put("c", row(1, "x"));
        assert!(matches!(batch.commit(), Err(Error::BatchTooWide(3))));
    }

    #[test]
    fn test_invalid_row_aborts_whole_batch() {
        let db = test_db();
        let mut batch = db.write_batch();
        batch.put("a", row(1, "x"));
        batch.put("b", Row::new(vec![Value::Null, Value::Null]));
        assert!(matches!(batch.commit(), Err(Error::RowMismatch { .. })));
        // The valid op must not have been applied.
        assert_eq!(db.count("a").unwrap(), 0);
    }

    #[test]
    fn test_rollback_applies_nothing() {
        let db = test_db();
        let mut batch = db.write_batch();
        batch.put("a", row(1, "x"));
        batch.rollback();
        assert_eq!(db.count("a").unwrap(), 0);
    }
}
