//! Statement execution over direct and migrating tables.
//!
//! Direct statements hit storage as written. Statements against a
//! migrating table keep their plain semantics from the caller's side:
//! reads merge the destination with the unmigrated source rows, and
//! writes land in the destination while consuming whatever stale copy
//! the source still holds.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::warn;

use shiftdb_proto::{ResultSet, Statement, StatementOutput, Value};

use super::interceptor::{QueryInterceptor, RoutedStatement};
use super::router::{SourceRef, TableRouter};
use crate::error::Error;
use crate::schema::TableDef;
use crate::storage::{Database, Row, RowKey};

/// Executes statements against one database, honoring table routes.
pub struct StatementExecutor {
    database: Arc<Database>,
    interceptor: QueryInterceptor,
}

impl StatementExecutor {
    /// Create an executor over the shared routing table.
    pub fn new(database: Arc<Database>, router: Arc<TableRouter>) -> Self {
        Self {
            database,
            interceptor: QueryInterceptor::new(router),
        }
    }

    /// Execute one statement.
    pub fn execute(&self, statement: Statement) -> Result<StatementOutput, Error> {
        match self.interceptor.rewrite(statement) {
            RoutedStatement::Direct(statement) => self.execute_direct(statement),
            RoutedStatement::UnionRead { statement, source } => {
                self.execute_union_read(statement, &source)
            }
            RoutedStatement::WriteThrough { statement, source } => {
                self.execute_write_through(statement, &source)
            }
        }
    }

    fn execute_direct(&self, statement: Statement) -> Result<StatementOutput, Error> {
        match statement {
            Statement::Select(select) => {
                let def = self.require_table(&select.table)?;
                let rows = match &select.key {
                    Some(key) => {
                        let key = Self::row_key(&def, key)?;
                        self.database
                            .get(&select.table, &key)?
                            .into_iter()
                            .map(|row| row.values)
                            .collect()
                    }
                    None => self
                        .database
                        .scan_from(&select.table, None, select.limit)?
                        .into_iter()
                        .map(|(_, row)| row.values)
                        .collect(),
                };
                Ok(StatementOutput::Rows(ResultSet::new(
                    def.column_names(),
                    rows,
                )))
            }
            Statement::Insert(insert) => {
                let _gate = self.database.lock_writes();
                let mut affected = 0u64;
                for values in insert.rows {
                    self.database.put(&insert.table, Row::new(values))?;
                    affected += 1;
                }
                Ok(StatementOutput::Affected(affected))
            }
            Statement::Update(update) => {
                let def = self.require_table(&update.table)?;
                let key = Self::row_key(&def, &update.key)?;
                let _gate = self.database.lock_writes();
                match self.database.get(&update.table, &key)? {
                    Some(mut row) => {
                        Self::apply_assignments(&def, &mut row, &update.assignments)?;
                        self.database.put(&update.table, row)?;
                        Ok(StatementOutput::Affected(1))
                    }
                    None => Ok(StatementOutput::Affected(0)),
                }
            }
            Statement::Delete(delete) => {
                let def = self.require_table(&delete.table)?;
                let key = Self::row_key(&def, &delete.key)?;
                let _gate = self.database.lock_writes();
                let existed = self.database.delete(&delete.table, &key)?;
                Ok(StatementOutput::Affected(u64::from(existed)))
            }
            Statement::Count(count) => {
                Ok(StatementOutput::Count(self.database.count(&count.table)?))
            }
        }
    }

    fn execute_union_read(
        &self,
        statement: Statement,
        source: &SourceRef,
    ) -> Result<StatementOutput, Error> {
        match statement {
            Statement::Select(select) => {
                let def = self.require_table(&select.table)?;
                let rows = match &select.key {
                    Some(key) => {
                        let key = Self::row_key(&def, key)?;
                        self.merged_get(&select.table, source, &key)?
                            .into_iter()
                            .map(|row| row.values)
                            .collect()
                    }
                    None => self
                        .union_scan(&select.table, source, select.limit)?
                        .into_iter()
                        .map(|(_, row)| row.values)
                        .collect(),
                };
                Ok(StatementOutput::Rows(ResultSet::new(
                    def.column_names(),
                    rows,
                )))
            }
            Statement::Count(count) => {
                let mut total = self.database.count(&count.table)?;
                for (key, _) in self.source_rows(source, None)? {
                    if !self.database.contains_key(&count.table, &key)? {
                        total += 1;
                    }
                }
                Ok(StatementOutput::Count(total))
            }
            // The route can change between interception and execution.
            other => self.execute_write_through(other, source),
        }
    }

    fn execute_write_through(
        &self,
        statement: Statement,
        source: &SourceRef,
    ) -> Result<StatementOutput, Error> {
        match statement {
            Statement::Insert(insert) => {
                let def = self.require_table(&insert.table)?;
                let _gate = self.database.lock_writes();
                let mut affected = 0u64;
                for values in insert.rows {
                    let row = Row::new(values);
                    let key = def.primary_key_of(&row)?;
                    self.write_and_consume(&insert.table, source, key, row)?;
                    affected += 1;
                }
                Ok(StatementOutput::Affected(affected))
            }
            Statement::Update(update) => {
                let def = self.require_table(&update.table)?;
                let key = Self::row_key(&def, &update.key)?;
                let _gate = self.database.lock_writes();
                match self.merged_get(&update.table, source, &key)? {
                    Some(mut row) => {
                        Self::apply_assignments(&def, &mut row, &update.assignments)?;
                        self.write_and_consume(&update.table, source, key, row)?;
                        Ok(StatementOutput::Affected(1))
                    }
                    None => Ok(StatementOutput::Affected(0)),
                }
            }
            Statement::Delete(delete) => {
                let def = self.require_table(&delete.table)?;
                let key = Self::row_key(&def, &delete.key)?;
                let _gate = self.database.lock_writes();
                if !source.database.has_table(&source.table) {
                    let existed = self.database.delete(&delete.table, &key)?;
                    return Ok(StatementOutput::Affected(u64::from(existed)));
                }
                if Arc::ptr_eq(&self.database, &source.database) {
                    let in_destination = self.database.contains_key(&delete.table, &key)?;
                    let in_source = self.database.contains_key(&source.table, &key)?;
                    let mut batch = self.database.write_batch();
                    batch.delete(&delete.table, key.clone());
                    batch.delete(&source.table, key);
                    batch.commit()?;
                    Ok(StatementOutput::Affected(u64::from(
                        in_destination || in_source,
                    )))
                } else {
                    // The source copy goes first. A failure in between
                    // leaves the current destination row in place rather
                    // than resurfacing the stale source copy.
                    let in_source = match source.database.delete(&source.table, &key) {
                        Ok(existed) => existed,
                        Err(error) if Self::source_gone(&error) => false,
                        Err(error) => return Err(error),
                    };
                    let in_destination = self.database.delete(&delete.table, &key)?;
                    Ok(StatementOutput::Affected(u64::from(
                        in_source || in_destination,
                    )))
                }
            }
            other => self.execute_union_read(other, source),
        }
    }

    /// Land `row` in the destination and remove any stale copy under the
    /// same key from the source. The caller holds the write gate.
    fn write_and_consume(
        &self,
        table: &str,
        source: &SourceRef,
        key: RowKey,
        row: Row,
    ) -> Result<(), Error> {
        if !source.database.has_table(&source.table) {
            // Completed migrations drop their source while a cached
            // route may briefly linger.
            self.database.put(table, row)?;
            return Ok(());
        }
        if Arc::ptr_eq(&self.database, &source.database) {
            let mut batch = self.database.write_batch();
            batch.put(table, row);
            batch.delete(&source.table, key);
            batch.commit()
        } else {
            self.database.put(table, row)?;
            if let Err(error) = source.database.delete(&source.table, &key) {
                if !Self::source_gone(&error) {
                    // The destination write stands; migration consumes
                    // the stale copy when it reaches this key.
                    warn!(
                        table = %source.table,
                        error = %error,
                        "Failed to consume stale source copy"
                    );
                }
            }
            Ok(())
        }
    }

    /// Point lookup across destination and source. The destination copy
    /// shadows the source copy.
    fn merged_get(
        &self,
        table: &str,
        source: &SourceRef,
        key: &RowKey,
    ) -> Result<Option<Row>, Error> {
        if let Some(row) = self.database.get(table, key)? {
            return Ok(Some(row));
        }
        match source.database.get(&source.table, key) {
            Ok(row) => Ok(row),
            Err(error) if Self::source_gone(&error) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Key-ordered union of destination and source rows. Keys present on
    /// both sides yield the destination row.
    fn union_scan(
        &self,
        table: &str,
        source: &SourceRef,
        limit: Option<usize>,
    ) -> Result<Vec<(RowKey, Row)>, Error> {
        let destination_rows = self.database.scan_from(table, None, limit)?;
        let source_rows = self.source_rows(source, limit)?;

        let mut merged = Vec::with_capacity(destination_rows.len());
        let mut destination = destination_rows.into_iter().peekable();
        let mut source_iter = source_rows.into_iter().peekable();
        loop {
            if limit.map_or(false, |n| merged.len() >= n) {
                break;
            }
            let take_source = match (destination.peek(), source_iter.peek()) {
                (None, None) => break,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some((destination_key, _)), Some((source_key, _))) => {
                    match destination_key.cmp(source_key) {
                        Ordering::Less => false,
                        Ordering::Greater => true,
                        Ordering::Equal => {
                            // Same key on both sides: the migrated copy wins.
                            source_iter.next();
                            false
                        }
                    }
                }
            };
            let item = if take_source {
                source_iter.next()
            } else {
                destination.next()
            };
            if let Some(item) = item {
                merged.push(item);
            }
        }
        Ok(merged)
    }

    /// Source rows in key order, treating a vanished table as empty.
    fn source_rows(
        &self,
        source: &SourceRef,
        limit: Option<usize>,
    ) -> Result<Vec<(RowKey, Row)>, Error> {
        match source.database.scan_from(&source.table, None, limit) {
            Ok(rows) => Ok(rows),
            Err(error) if Self::source_gone(&error) => Ok(Vec::new()),
            Err(error) => Err(error),
        }
    }

    /// Whether an error means the source table no longer exists. A
    /// drained source is dropped while cached readers may still hold a
    /// handle to it, so the schema miss and the stale tree handle both
    /// read as an empty source.
    fn source_gone(error: &Error) -> bool {
        matches!(
            error,
            Error::UnknownTable(_) | Error::Storage(sled::Error::CollectionNotFound(_))
        )
    }

    fn require_table(&self, table: &str) -> Result<TableDef, Error> {
        self.database
            .table(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    fn row_key(def: &TableDef, value: &Value) -> Result<RowKey, Error> {
        RowKey::from_value(value).ok_or_else(|| Error::RowMismatch {
            table: def.name.clone(),
            reason: format!("{} cannot key a row", value.type_name()),
        })
    }

    fn apply_assignments(
        def: &TableDef,
        row: &mut Row,
        assignments: &[(String, Value)],
    ) -> Result<(), Error> {
        for (column, value) in assignments {
            let (idx, _) = def.column(column).ok_or_else(|| Error::RowMismatch {
                table: def.name.clone(),
                reason: format!("unknown column {column}"),
            })?;
            if *column == def.key_column {
                return Err(Error::RowMismatch {
                    table: def.name.clone(),
                    reason: "the key column cannot be assigned".to_string(),
                });
            }
            let slot = row.values.get_mut(idx).ok_or_else(|| Error::RowMismatch {
                table: def.name.clone(),
                reason: format!("row is missing column {column}"),
            })?;
            *slot = value.clone();
        }
        Ok(())
    }
}
